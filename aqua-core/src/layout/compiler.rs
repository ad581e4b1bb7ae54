//! Schema to layout compilation.

use super::{CompiledField, CompiledStruct, Layout, PackCode, ScalarKind, TypeRef};
use crate::error::{AquaError, Result};
use crate::schema::{FieldDescriptor, SchemaDocument};
use std::collections::BTreeMap;
use tracing::debug;

/// Compiles struct definitions depth-first, memoizing each struct once.
pub struct LayoutCompiler<'a> {
    doc: &'a SchemaDocument,
    scalars: BTreeMap<&'a str, ScalarKind>,
    compiled: Vec<Option<CompiledStruct>>,
    in_progress: Vec<bool>,
    shm_offset: usize,
    shm_size: usize,
}

impl<'a> LayoutCompiler<'a> {
    /// Create a compiler for a document.
    pub fn new(doc: &'a SchemaDocument) -> Self {
        let n = doc.vpp.structs.len();
        Self {
            doc,
            scalars: BTreeMap::new(),
            compiled: vec![None; n],
            in_progress: vec![false; n],
            shm_offset: 0,
            shm_size: usize::MAX,
        }
    }

    /// Run the compilation.
    pub fn compile(mut self) -> Result<Layout> {
        let doc = self.doc;
        let constants = doc.constants()?;
        self.scalars = scalar_table(doc)?;
        self.shm_offset = constants.shm_offset;
        self.shm_size = constants.shm_size;

        for index in 0..self.compiled.len() {
            self.compile_struct(index)?;
        }
        let (fields, size, pack) = self.compile_fields("layout", &doc.layout)?;

        if constants.shm_offset.saturating_add(size) > constants.shm_size {
            return Err(self.overflow(size));
        }

        let structs = self.compiled.into_iter().flatten().collect::<Vec<_>>();
        debug!(
            structs = structs.len(),
            root_fields = fields.len(),
            total_size = size,
            "Compiled layout"
        );

        Ok(Layout {
            constants,
            roles: doc.roles.clone(),
            structs,
            root: CompiledStruct {
                name: "layout".to_string(),
                fields,
                size,
                pack,
            },
        })
    }

    fn compile_struct(&mut self, index: usize) -> Result<()> {
        if self.compiled[index].is_some() {
            return Ok(());
        }
        let doc = self.doc;
        let Some((name, fields)) = doc.vpp.structs.entry(index) else {
            return Ok(());
        };
        if self.in_progress[index] {
            return Err(AquaError::RecursiveStruct {
                name: name.to_string(),
            });
        }
        self.in_progress[index] = true;
        let (fields, size, pack) = self.compile_fields(name, fields)?;
        self.in_progress[index] = false;

        self.compiled[index] = Some(CompiledStruct {
            name: name.to_string(),
            fields,
            size,
            pack,
        });
        Ok(())
    }

    fn compile_fields(
        &mut self,
        owner: &str,
        descriptors: &[FieldDescriptor],
    ) -> Result<(Vec<CompiledField>, usize, PackCode)> {
        let mut fields = Vec::with_capacity(descriptors.len());
        let mut kinds = Vec::new();
        let mut offset = 0usize;

        for desc in descriptors {
            let path = format!("{}.{}", owner, desc.name);
            let count = self.doc.resolve_count(&desc.count, &path)?;
            let (ty, elem_size, pack) = self.resolve_type(&desc.ctype, &path)?;

            // Every struct and array must fit the region on its own, which
            // also bounds the pack expansion below.
            let budget = self.shm_size.saturating_sub(self.shm_offset);
            let end = elem_size
                .checked_mul(count)
                .and_then(|len| len.checked_add(offset))
                .filter(|&end| end <= budget && count <= budget)
                .ok_or_else(|| {
                    self.overflow(elem_size.saturating_mul(count).saturating_add(offset))
                })?;

            for _ in 0..count {
                kinds.extend_from_slice(pack.kinds());
            }
            fields.push(CompiledField {
                name: desc.name.clone(),
                ctype: desc.ctype.clone(),
                ty,
                count,
                offset,
                elem_size,
                pack,
                doc: desc.doc.clone(),
                default: desc.default.clone(),
                default_value: self.doc.default_value(&desc.default),
            });
            offset = end;
        }

        Ok((fields, offset, PackCode::new(kinds)))
    }

    fn overflow(&self, required: usize) -> AquaError {
        AquaError::LayoutOverflow {
            required,
            offset: self.shm_offset,
            available: self.shm_size,
        }
    }

    fn resolve_type(&mut self, ctype: &str, path: &str) -> Result<(TypeRef, usize, PackCode)> {
        if let Some(&kind) = self.scalars.get(ctype) {
            return Ok((TypeRef::Scalar(kind), kind.size(), PackCode::new(vec![kind])));
        }
        let index = self
            .doc
            .vpp
            .structs
            .position(ctype)
            .ok_or_else(|| AquaError::UnknownType {
                type_name: ctype.to_string(),
                field: path.to_string(),
            })?;
        self.compile_struct(index)?;
        let compiled = self.compiled[index]
            .as_ref()
            .ok_or_else(|| AquaError::RecursiveStruct {
                name: ctype.to_string(),
            })?;
        Ok((TypeRef::Struct(index), compiled.size, compiled.pack.clone()))
    }
}

/// Build the ctype -> kind table, checking the two maps agree.
fn scalar_table(doc: &SchemaDocument) -> Result<BTreeMap<&str, ScalarKind>> {
    let mut table = BTreeMap::new();
    for (ctype, code) in &doc.map.pack_codes {
        let mut chars = code.chars();
        let kind = match (chars.next(), chars.next()) {
            (Some(c), None) => ScalarKind::from_code(c),
            _ => None,
        }
        .ok_or_else(|| AquaError::InvalidScalar {
            ctype: ctype.clone(),
            cause: format!("unsupported pack code '{}'", code),
        })?;

        let size = doc
            .map
            .byte_sizes
            .get(ctype)
            .copied()
            .ok_or_else(|| AquaError::InvalidScalar {
                ctype: ctype.clone(),
                cause: "missing from byte_sizes".to_string(),
            })?;
        if size != kind.size() {
            return Err(AquaError::InvalidScalar {
                ctype: ctype.clone(),
                cause: format!("declared {} bytes, pack code '{}' is {}", size, code, kind.size()),
            });
        }
        table.insert(ctype.as_str(), kind);
    }

    if let Some(ctype) = doc
        .map
        .byte_sizes
        .keys()
        .find(|k| !doc.map.pack_codes.contains_key(*k))
    {
        return Err(AquaError::InvalidScalar {
            ctype: ctype.clone(),
            cause: "missing from pack_codes".to_string(),
        });
    }
    Ok(table)
}
