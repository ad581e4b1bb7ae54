//! Active-server bitmap.

use crate::error::{AquaError, Result};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::fmt;

/// Fixed-width bitset over server ids `0..width`.
///
/// The data plane renders the bitmap most-significant-bit first: server `i`
/// is active when bit `width - 1 - i` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveServers {
    bits: u64,
    width: usize,
}

impl ActiveServers {
    /// An empty set over `width` servers (at most 64).
    pub fn new(width: usize) -> Self {
        Self {
            bits: 0,
            width: width.min(64),
        }
    }

    /// Interpret a header word. Bits above `width` are ignored.
    pub fn from_header(header: u64, width: usize) -> Self {
        let width = width.min(64);
        Self {
            bits: header & mask(width),
            width,
        }
    }

    /// Build a set from server ids.
    pub fn from_ids(ids: impl IntoIterator<Item = usize>, width: usize) -> Result<Self> {
        let mut set = Self::new(width);
        for id in ids {
            set.insert(id)?;
        }
        Ok(set)
    }

    /// Mark a server active.
    pub fn insert(&mut self, server: usize) -> Result<()> {
        let bit = self.bit(server)?;
        self.bits |= bit;
        Ok(())
    }

    /// Mark a server inactive.
    pub fn remove(&mut self, server: usize) -> Result<()> {
        let bit = self.bit(server)?;
        self.bits &= !bit;
        Ok(())
    }

    /// Whether a server is active. Out-of-range ids are inactive.
    pub fn contains(&self, server: usize) -> bool {
        self.bit(server).map(|b| self.bits & b != 0).unwrap_or(false)
    }

    /// Active server ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.width).filter(move |&i| self.contains(i))
    }

    /// Active server ids as a vector.
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Number of active servers.
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Whether no server is active.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Raw header word.
    pub fn header(&self) -> u64 {
        self.bits
    }

    /// Bitmap width.
    pub fn width(&self) -> usize {
        self.width
    }

    fn bit(&self, server: usize) -> Result<u64> {
        if server >= self.width {
            return Err(AquaError::ServerOutOfRange {
                server,
                max: self.width,
            });
        }
        Ok(1u64 << (self.width - 1 - server))
    }
}

fn mask(width: usize) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

impl fmt::Display for ActiveServers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$b}", self.bits, width = self.width)
    }
}

impl Serialize for ActiveServers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for id in self.iter() {
            seq.serialize_element(&id)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first_ordering() {
        let set = ActiveServers::from_header(0b1010_0000, 8);
        assert_eq!(set.to_vec(), vec![0, 2]);
        assert_eq!(set.to_string(), "10100000");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn full_width_header() {
        let set = ActiveServers::from_header(1 | (1 << 63), 64);
        assert_eq!(set.to_vec(), vec![0, 63]);
    }

    #[test]
    fn insert_and_bounds() {
        let mut set = ActiveServers::new(4);
        set.insert(3).unwrap();
        set.insert(1).unwrap();
        assert_eq!(set.header(), 0b0101);
        assert!(set.contains(1));
        assert!(!set.contains(9));
        assert!(matches!(set.insert(4), Err(AquaError::ServerOutOfRange { server: 4, max: 4 })));
        set.remove(1).unwrap();
        assert_eq!(set.to_vec(), vec![3]);
    }

    #[test]
    fn bits_beyond_width_ignored() {
        let set = ActiveServers::from_header(0xFF, 4);
        assert_eq!(set.header(), 0x0F);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn serializes_as_id_list() {
        let set = ActiveServers::from_ids([2, 0], 4).unwrap();
        assert_eq!(serde_json::to_string(&set).unwrap(), "[0,2]");
        assert!(ActiveServers::new(4).is_empty());
    }
}
