//! Declarative schema of the shared region.
//!
//! The schema file is JSON with the sections `global` (constants), `map`
//! (scalar pack codes and byte widths), `vpp` (struct and enum definitions),
//! `layout` (root field list) and the optional `meta` and `roles`.

mod constants;
mod document;
mod roles;

pub use constants::{
    Constants, DEFAULT_FILE_FMT, DEFAULT_RES_DECAY, DEFAULT_UPDATE_DT, MAX_SERVERS,
};
pub(crate) use constants::resolve_symbol;
pub use document::{
    Count, DataPlaneTypes, EnumEntry, FieldDescriptor, NamedList, SchemaDocument, TypeMaps,
};
pub use roles::LayoutRoles;

use crate::error::{AquaError, Result};
use std::path::Path;

impl SchemaDocument {
    /// Load a schema document from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AquaError::SchemaLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| AquaError::SchemaLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Parse a schema document from a JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validated layout constants.
    pub fn constants(&self) -> Result<Constants> {
        Constants::from_globals(&self.global)
    }

    /// Field list of a named struct.
    pub fn struct_fields(&self, name: &str) -> Option<&[FieldDescriptor]> {
        self.vpp.structs.get(name).map(Vec::as_slice)
    }

    /// Resolve a count to a positive integer.
    pub fn resolve_count(&self, count: &Count, field: &str) -> Result<usize> {
        let value = match count {
            Count::Literal(n) => *n,
            Count::Symbol(symbol) => {
                resolve_symbol(&self.global, symbol).ok_or_else(|| AquaError::UnresolvedCount {
                    symbol: symbol.clone(),
                    field: field.to_string(),
                })?
            }
        };
        if value <= 0 {
            return Err(AquaError::InvalidCount {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(value as usize)
    }

    /// Numeric value of a field default, resolving constant names.
    ///
    /// Non-numeric defaults that do not name a constant read as zero.
    pub fn default_value(&self, default: &serde_json::Value) -> f64 {
        match default {
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
            serde_json::Value::String(s) => self
                .global
                .get(s)
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0),
            serde_json::Value::Bool(b) => f64::from(u8::from(*b)),
            _ => 0.0,
        }
    }
}
