//! Scalar kinds and the flattened pack codes used to move bytes in and out
//! of the region.

use crate::error::{AquaError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Cursor};
use std::sync::Arc;

/// A fixed-width little-endian scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl ScalarKind {
    /// Parse a single-character pack code (`B b H h I i Q q f d`).
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'B' => ScalarKind::U8,
            'b' => ScalarKind::I8,
            'H' => ScalarKind::U16,
            'h' => ScalarKind::I16,
            'I' => ScalarKind::U32,
            'i' => ScalarKind::I32,
            'Q' => ScalarKind::U64,
            'q' => ScalarKind::I64,
            'f' => ScalarKind::F32,
            'd' => ScalarKind::F64,
            _ => return None,
        })
    }

    /// The pack code character.
    pub fn code(self) -> char {
        match self {
            ScalarKind::U8 => 'B',
            ScalarKind::I8 => 'b',
            ScalarKind::U16 => 'H',
            ScalarKind::I16 => 'h',
            ScalarKind::U32 => 'I',
            ScalarKind::I32 => 'i',
            ScalarKind::U64 => 'Q',
            ScalarKind::I64 => 'q',
            ScalarKind::F32 => 'f',
            ScalarKind::F64 => 'd',
        }
    }

    /// Width in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarKind::U8 | ScalarKind::I8 => 1,
            ScalarKind::U16 | ScalarKind::I16 => 2,
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => 4,
            ScalarKind::U64 | ScalarKind::I64 | ScalarKind::F64 => 8,
        }
    }

    /// Whether the kind is a floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    /// Decode one value from the start of `bytes`.
    pub fn read(self, bytes: &[u8]) -> Result<ScalarValue> {
        let mut cursor = Cursor::new(bytes);
        self.read_from(&mut cursor).map_err(|_| AquaError::RegionBounds {
            start: 0,
            end: self.size(),
            size: bytes.len(),
        })
    }

    fn read_from(self, cursor: &mut Cursor<&[u8]>) -> io::Result<ScalarValue> {
        Ok(match self {
            ScalarKind::U8 => ScalarValue::U8(cursor.read_u8()?),
            ScalarKind::I8 => ScalarValue::I8(cursor.read_i8()?),
            ScalarKind::U16 => ScalarValue::U16(cursor.read_u16::<LittleEndian>()?),
            ScalarKind::I16 => ScalarValue::I16(cursor.read_i16::<LittleEndian>()?),
            ScalarKind::U32 => ScalarValue::U32(cursor.read_u32::<LittleEndian>()?),
            ScalarKind::I32 => ScalarValue::I32(cursor.read_i32::<LittleEndian>()?),
            ScalarKind::U64 => ScalarValue::U64(cursor.read_u64::<LittleEndian>()?),
            ScalarKind::I64 => ScalarValue::I64(cursor.read_i64::<LittleEndian>()?),
            ScalarKind::F32 => ScalarValue::F32(cursor.read_f32::<LittleEndian>()?),
            ScalarKind::F64 => ScalarValue::F64(cursor.read_f64::<LittleEndian>()?),
        })
    }

    /// Convert a number to this kind, saturating integers.
    pub fn coerce(self, value: f64) -> ScalarValue {
        match self {
            ScalarKind::U8 => ScalarValue::U8(value as u8),
            ScalarKind::I8 => ScalarValue::I8(value as i8),
            ScalarKind::U16 => ScalarValue::U16(value as u16),
            ScalarKind::I16 => ScalarValue::I16(value as i16),
            ScalarKind::U32 => ScalarValue::U32(value as u32),
            ScalarKind::I32 => ScalarValue::I32(value as i32),
            ScalarKind::U64 => ScalarValue::U64(value as u64),
            ScalarKind::I64 => ScalarValue::I64(value as i64),
            ScalarKind::F32 => ScalarValue::F32(value as f32),
            ScalarKind::F64 => ScalarValue::F64(value),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A decoded scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// `u8`
    U8(u8),
    /// `i8`
    I8(i8),
    /// `u16`
    U16(u16),
    /// `i16`
    I16(i16),
    /// `u32`
    U32(u32),
    /// `i32`
    I32(i32),
    /// `u64`
    U64(u64),
    /// `i64`
    I64(i64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
}

impl ScalarValue {
    /// The kind of this value.
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::U8(_) => ScalarKind::U8,
            ScalarValue::I8(_) => ScalarKind::I8,
            ScalarValue::U16(_) => ScalarKind::U16,
            ScalarValue::I16(_) => ScalarKind::I16,
            ScalarValue::U32(_) => ScalarKind::U32,
            ScalarValue::I32(_) => ScalarKind::I32,
            ScalarValue::U64(_) => ScalarKind::U64,
            ScalarValue::I64(_) => ScalarKind::I64,
            ScalarValue::F32(_) => ScalarKind::F32,
            ScalarValue::F64(_) => ScalarKind::F64,
        }
    }

    /// Numeric value as `f64`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            ScalarValue::U8(v) => f64::from(v),
            ScalarValue::I8(v) => f64::from(v),
            ScalarValue::U16(v) => f64::from(v),
            ScalarValue::I16(v) => f64::from(v),
            ScalarValue::U32(v) => f64::from(v),
            ScalarValue::I32(v) => f64::from(v),
            ScalarValue::U64(v) => v as f64,
            ScalarValue::I64(v) => v as f64,
            ScalarValue::F32(v) => f64::from(v),
            ScalarValue::F64(v) => v,
        }
    }

    /// Integer value as `u64` (floats truncate, negatives clamp to zero).
    pub fn as_u64(&self) -> u64 {
        match *self {
            ScalarValue::U8(v) => u64::from(v),
            ScalarValue::U16(v) => u64::from(v),
            ScalarValue::U32(v) => u64::from(v),
            ScalarValue::U64(v) => v,
            ScalarValue::I8(v) => v.max(0) as u64,
            ScalarValue::I16(v) => v.max(0) as u64,
            ScalarValue::I32(v) => v.max(0) as u64,
            ScalarValue::I64(v) => v.max(0) as u64,
            ScalarValue::F32(v) => v as u64,
            ScalarValue::F64(v) => v as u64,
        }
    }

    /// Append the little-endian encoding of this value converted to `kind`.
    pub fn write_as(&self, kind: ScalarKind, out: &mut Vec<u8>) {
        let value = if self.kind() == kind {
            *self
        } else {
            match *self {
                ScalarValue::U64(v) if !kind.is_float() => ScalarValue::U64(v).narrow(kind),
                ScalarValue::I64(v) if !kind.is_float() => ScalarValue::I64(v).narrow(kind),
                other => kind.coerce(other.as_f64()),
            }
        };
        // Writing to a Vec cannot fail.
        let _ = value.write_to(out);
    }

    fn narrow(self, kind: ScalarKind) -> ScalarValue {
        let wide = match self {
            ScalarValue::U64(v) => v as i128,
            ScalarValue::I64(v) => v as i128,
            other => other.as_f64() as i128,
        };
        match kind {
            ScalarKind::U8 => ScalarValue::U8(wide as u8),
            ScalarKind::I8 => ScalarValue::I8(wide as i8),
            ScalarKind::U16 => ScalarValue::U16(wide as u16),
            ScalarKind::I16 => ScalarValue::I16(wide as i16),
            ScalarKind::U32 => ScalarValue::U32(wide as u32),
            ScalarKind::I32 => ScalarValue::I32(wide as i32),
            ScalarKind::U64 => ScalarValue::U64(wide as u64),
            ScalarKind::I64 => ScalarValue::I64(wide as i64),
            ScalarKind::F32 => ScalarValue::F32(wide as f32),
            ScalarKind::F64 => ScalarValue::F64(wide as f64),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        match *self {
            ScalarValue::U8(v) => out.write_u8(v),
            ScalarValue::I8(v) => out.write_i8(v),
            ScalarValue::U16(v) => out.write_u16::<LittleEndian>(v),
            ScalarValue::I16(v) => out.write_i16::<LittleEndian>(v),
            ScalarValue::U32(v) => out.write_u32::<LittleEndian>(v),
            ScalarValue::I32(v) => out.write_i32::<LittleEndian>(v),
            ScalarValue::U64(v) => out.write_u64::<LittleEndian>(v),
            ScalarValue::I64(v) => out.write_i64::<LittleEndian>(v),
            ScalarValue::F32(v) => out.write_f32::<LittleEndian>(v),
            ScalarValue::F64(v) => out.write_f64::<LittleEndian>(v),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::U8(v) => write!(f, "{}", v),
            ScalarValue::I8(v) => write!(f, "{}", v),
            ScalarValue::U16(v) => write!(f, "{}", v),
            ScalarValue::I16(v) => write!(f, "{}", v),
            ScalarValue::U32(v) => write!(f, "{}", v),
            ScalarValue::I32(v) => write!(f, "{}", v),
            ScalarValue::U64(v) => write!(f, "{}", v),
            ScalarValue::I64(v) => write!(f, "{}", v),
            ScalarValue::F32(v) => write!(f, "{}", v),
            ScalarValue::F64(v) => write!(f, "{}", v),
        }
    }
}

/// Flattened scalar sequence of a field element, e.g. `IfQ` followed by the
/// body struct codes repeated.
///
/// Cloning is cheap; repeated fields share one code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackCode(Arc<[ScalarKind]>);

impl PackCode {
    /// Build a pack code from scalar kinds.
    pub fn new(kinds: Vec<ScalarKind>) -> Self {
        Self(kinds.into())
    }

    /// Parse a pack code string such as `"IfQ"`.
    pub fn parse(code: &str) -> Option<Self> {
        code.chars()
            .map(ScalarKind::from_code)
            .collect::<Option<Vec<_>>>()
            .map(Self::new)
    }

    /// Scalar kinds in order.
    pub fn kinds(&self) -> &[ScalarKind] {
        &self.0
    }

    /// Number of scalars.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the code is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded size in bytes.
    pub fn byte_size(&self) -> usize {
        self.0.iter().map(|k| k.size()).sum()
    }

    /// Decode `bytes` into scalars. `bytes` must be exactly `byte_size()` long.
    pub fn unpack(&self, bytes: &[u8]) -> Result<Vec<ScalarValue>> {
        let size = self.byte_size();
        if bytes.len() != size {
            return Err(AquaError::RegionBounds {
                start: 0,
                end: size,
                size: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        self.0
            .iter()
            .map(|kind| kind.read_from(&mut cursor).map_err(AquaError::from))
            .collect()
    }

    /// Encode values, converting each to its slot's kind.
    pub fn pack(&self, values: &[ScalarValue]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.byte_size());
        self.pack_into(values, &mut out)?;
        Ok(out)
    }

    /// Encode values into a reusable buffer (cleared first).
    pub fn pack_into(&self, values: &[ScalarValue], out: &mut Vec<u8>) -> Result<()> {
        if values.len() != self.0.len() {
            return Err(AquaError::Serialization(format!(
                "pack code {} expects {} values, got {}",
                self,
                self.0.len(),
                values.len()
            )));
        }
        out.clear();
        for (value, kind) in values.iter().zip(self.0.iter()) {
            value.write_as(*kind, out);
        }
        Ok(())
    }

    /// Concatenate `count` copies of `self`.
    pub fn repeat(&self, count: usize) -> PackCode {
        if count == 1 {
            return self.clone();
        }
        PackCode::new(self.0.repeat(count))
    }
}

impl fmt::Display for PackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in self.0.iter() {
            write!(f, "{}", kind.code())?;
        }
        Ok(())
    }
}

impl Serialize for PackCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_code_parse_and_display() {
        let code = PackCode::parse("IfQ").unwrap();
        assert_eq!(code.kinds(), &[ScalarKind::U32, ScalarKind::F32, ScalarKind::U64]);
        assert_eq!(code.byte_size(), 16);
        assert_eq!(code.to_string(), "IfQ");
        assert!(PackCode::parse("Ix").is_none());
    }

    #[test]
    fn pack_unpack_little_endian() {
        let code = PackCode::parse("Ifi").unwrap();
        let bytes = code
            .pack(&[ScalarValue::U32(7), ScalarValue::F64(1.5), ScalarValue::I64(-3)])
            .unwrap();
        assert_eq!(&bytes[..4], &7u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[8..], &(-3i32).to_le_bytes());

        let values = code.unpack(&bytes).unwrap();
        assert_eq!(values[0], ScalarValue::U32(7));
        assert_eq!(values[1], ScalarValue::F32(1.5));
        assert_eq!(values[2], ScalarValue::I32(-3));
    }

    #[test]
    fn unpack_rejects_wrong_length() {
        let code = PackCode::parse("II").unwrap();
        assert!(code.unpack(&[0u8; 7]).is_err());
    }

    #[test]
    fn pack_rejects_wrong_arity() {
        let code = PackCode::parse("II").unwrap();
        assert!(code.pack(&[ScalarValue::U32(1)]).is_err());
    }

    #[test]
    fn large_u64_survives_packing() {
        let code = PackCode::parse("Q").unwrap();
        let bytes = code.pack(&[ScalarValue::U64(u64::MAX - 1)]).unwrap();
        assert_eq!(code.unpack(&bytes).unwrap()[0], ScalarValue::U64(u64::MAX - 1));
    }

    #[test]
    fn repeat_shares_single_copy() {
        let code = PackCode::parse("fI").unwrap();
        assert_eq!(code.repeat(1), code);
        assert_eq!(code.repeat(3).to_string(), "fIfIfI");
    }
}
