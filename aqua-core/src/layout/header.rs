//! C header rendering for the data plane.
//!
//! The data plane consumes the layout as X-macro lists
//! (`lb_foreach_<struct>`), so both sides compile against the same schema.

use crate::error::Result;
use crate::schema::{Count, FieldDescriptor, SchemaDocument};

/// Renders `shm.h` from a schema document.
#[derive(Debug, Clone)]
pub struct CHeader<'a> {
    doc: &'a SchemaDocument,
    macros: Vec<String>,
}

impl<'a> CHeader<'a> {
    /// Create a renderer for a document.
    pub fn new(doc: &'a SchemaDocument) -> Self {
        Self {
            doc,
            macros: Vec::new(),
        }
    }

    /// Prepend a bare `#define <name>` (e.g. `LB_STATS`).
    pub fn with_macro(mut self, name: impl Into<String>) -> Self {
        self.macros.push(name.into());
        self
    }

    /// Render the header text.
    pub fn render(&self) -> Result<String> {
        let mut lines: Vec<String> = self
            .macros
            .iter()
            .map(|m| format!("#define {}", m))
            .collect();
        lines.push(String::new());

        for (name, value) in self.doc.global.iter() {
            if name.contains("_FMT") {
                continue;
            }
            lines.push(format!("#define {} {}", name, literal(value)));
        }
        lines.push(String::new());

        for (name, fields) in self.doc.vpp.structs.iter() {
            lines.push(format!("#define lb_foreach_{} \\", name));
            let rendered = fields
                .iter()
                .map(|f| self.field_line(name, f, true))
                .collect::<Result<Vec<_>>>()?;
            push_continued(&mut lines, rendered);
            lines.push(String::new());
        }

        lines.push("#define lb_foreach_typedef_struct \\".to_string());
        for (name, _) in self.doc.vpp.structs.iter() {
            lines.push(format!("_construct({}) \\", name));
        }
        lines.push(String::new());

        for (name, entries) in self.doc.vpp.enums.iter() {
            lines.push(format!("#define lb_foreach_{} \\", name));
            let rendered = entries
                .iter()
                .map(|e| format!("_({}, \"{}\") ", e.0, e.1))
                .collect();
            push_continued(&mut lines, rendered);
            lines.push(String::new());
        }

        lines.push("#define lb_foreach_layout \\".to_string());
        let rendered = self
            .doc
            .layout
            .iter()
            .map(|f| self.field_line("layout", f, false))
            .collect::<Result<Vec<_>>>()?;
        push_continued(&mut lines, rendered);
        lines.push(String::new());

        Ok(lines.join("\n"))
    }

    /// One `_(type, name, count, "doc", default)` entry.
    ///
    /// Inside structs, arrays sized by a constant use the `__` macro so the
    /// data plane can declare them as arrays.
    fn field_line(&self, owner: &str, field: &FieldDescriptor, mark_arrays: bool) -> Result<String> {
        let count = self
            .doc
            .resolve_count(&field.count, &format!("{}.{}", owner, field.name))?;
        let prefix = match field.count {
            Count::Symbol(_) if mark_arrays && count > 1 => "_",
            _ => "",
        };
        let ctype = if self.doc.map.is_scalar(&field.ctype) {
            field.ctype.clone()
        } else {
            format!("{}_t", field.ctype)
        };
        Ok(format!(
            "{}_({}, {}, {}, \"{}\", {}) ",
            prefix,
            ctype,
            field.name,
            count,
            field.doc,
            literal(&field.default)
        ))
    }
}

fn literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_continued(lines: &mut Vec<String>, rendered: Vec<String>) {
    let last = rendered.len().saturating_sub(1);
    for (i, line) in rendered.into_iter().enumerate() {
        if i < last {
            lines.push(format!("{}\\", line));
        } else {
            lines.push(line);
        }
    }
}
