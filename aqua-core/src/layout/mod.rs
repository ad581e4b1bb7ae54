//! Compiled byte layout of the shared region.
//!
//! The [`LayoutCompiler`] turns a [`SchemaDocument`](crate::schema::SchemaDocument)
//! into a [`Layout`]: every struct and root field gets a byte offset, an
//! element size and a flattened [`PackCode`]. Fields are packed back to back
//! with no padding, matching the data plane's packed C structs.

mod codec;
mod compiler;
pub mod header;

pub use codec::{PackCode, ScalarKind, ScalarValue};
pub use compiler::LayoutCompiler;
pub use header::CHeader;

use crate::schema::{Constants, LayoutRoles, SchemaDocument};
use crate::error::Result;

/// Resolved type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    /// A scalar.
    Scalar(ScalarKind),
    /// A struct, by index into [`Layout::structs`].
    Struct(usize),
}

/// A field with its resolved count, offset and encoding.
#[derive(Debug, Clone)]
pub struct CompiledField {
    /// Field name.
    pub name: String,
    /// Declared type name.
    pub ctype: String,
    /// Resolved type.
    pub ty: TypeRef,
    /// Number of elements.
    pub count: usize,
    /// Byte offset relative to the enclosing struct (or to `SHM_OFFSET` for
    /// root fields).
    pub offset: usize,
    /// Size of one element in bytes.
    pub elem_size: usize,
    /// Pack code of one element.
    pub pack: PackCode,
    /// Description from the schema.
    pub doc: String,
    /// Default value from the schema.
    pub default: serde_json::Value,
    /// Default as a number, with constant names resolved.
    pub default_value: f64,
}

impl CompiledField {
    /// Total size in bytes (`elem_size * count`).
    pub fn byte_len(&self) -> usize {
        self.elem_size * self.count
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.byte_len()
    }

    /// Offset of element `index` relative to the enclosing struct.
    pub fn element_offset(&self, index: usize) -> usize {
        self.offset + index * self.elem_size
    }

    /// The scalar kind, if the field is a scalar.
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self.ty {
            TypeRef::Scalar(kind) => Some(kind),
            TypeRef::Struct(_) => None,
        }
    }
}

/// A compiled named struct.
#[derive(Debug, Clone)]
pub struct CompiledStruct {
    /// Struct name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<CompiledField>,
    /// Packed size in bytes.
    pub size: usize,
    /// Flattened pack code of the whole struct.
    pub pack: PackCode,
}

impl CompiledStruct {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The compiled layout of the whole region. Immutable after compilation.
#[derive(Debug, Clone)]
pub struct Layout {
    pub(crate) constants: Constants,
    pub(crate) roles: LayoutRoles,
    pub(crate) structs: Vec<CompiledStruct>,
    pub(crate) root: CompiledStruct,
}

impl Layout {
    /// Compile a schema document.
    pub fn compile(doc: &SchemaDocument) -> Result<Self> {
        LayoutCompiler::new(doc).compile()
    }

    /// Validated constants.
    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    /// Field roles.
    pub fn roles(&self) -> &LayoutRoles {
        &self.roles
    }

    /// Absolute offset of the root layout (`SHM_OFFSET`).
    pub fn base_offset(&self) -> usize {
        self.constants.shm_offset
    }

    /// Size of the root layout in bytes.
    pub fn total_size(&self) -> usize {
        self.root.size
    }

    /// Absolute offset one past the last laid-out byte.
    pub fn end_offset(&self) -> usize {
        self.base_offset() + self.total_size()
    }

    /// Whether the layout tiles `SHM_SIZE - SHM_OFFSET` exactly.
    pub fn is_exact(&self) -> bool {
        self.end_offset() == self.constants.shm_size
    }

    /// Root fields in declaration order.
    pub fn root_fields(&self) -> &[CompiledField] {
        &self.root.fields
    }

    /// Look up a root field by name.
    pub fn root_field(&self, name: &str) -> Option<&CompiledField> {
        self.root.field(name)
    }

    /// All compiled structs, in schema order.
    pub fn structs(&self) -> &[CompiledStruct] {
        &self.structs
    }

    /// Look up a compiled struct by name.
    pub fn struct_named(&self, name: &str) -> Option<&CompiledStruct> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// The struct type of a field, if it has one.
    pub fn struct_of(&self, field: &CompiledField) -> Option<&CompiledStruct> {
        match field.ty {
            TypeRef::Struct(index) => self.structs.get(index),
            TypeRef::Scalar(_) => None,
        }
    }
}
