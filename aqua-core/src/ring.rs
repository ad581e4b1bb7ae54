//! Frame ring protocol.
//!
//! A ring holds `SHM_N_FRAME` slots; sequence id `n` lives in slot
//! `n & SHM_FRAME_MASK`. Writers fill a slot's body first and publish it by
//! writing the id last. Readers only trust a slot whose id exceeds the last id
//! they have seen, and re-read the id after copying the body: if it moved, the
//! writer lapped the reader mid-copy and the copy is discarded.

use crate::error::{AquaError, Result};
use crate::layout::{Layout, PackCode, ScalarKind, ScalarValue};
use crate::pointer::{FieldNode, PointerTree};
use crate::region::SharedRegion;
use std::ops::Range;
use std::sync::atomic::{Ordering, fence};
use tracing::{trace, warn};

/// Copy attempts before a reader gives up on a slot.
pub const MAX_COPY_ATTEMPTS: u32 = 8;

/// Geometry of one ring of frame slots.
#[derive(Debug, Clone)]
pub struct FrameRing {
    name: String,
    slots: Vec<FieldNode>,
    id_offset: usize,
    ts_offset: usize,
    ts_kind: ScalarKind,
    mask: u32,
}

impl FrameRing {
    /// Resolve the ring stored in root field `field`.
    ///
    /// The slot struct must contain the role's `u32` id field and a scalar
    /// timestamp field.
    pub fn from_tree(layout: &Layout, tree: &PointerTree, field: &str) -> Result<Self> {
        let roles = layout.roles();
        let compiled = layout.root_field(field).ok_or_else(|| role_error(field, "not a root layout field"))?;
        let slot_struct = layout
            .struct_of(compiled)
            .ok_or_else(|| role_error(field, "frames must be structs"))?;
        let n_frame = layout.constants().n_frame;
        if compiled.count != n_frame {
            return Err(role_error(
                field,
                format!("has {} slots, SHM_N_FRAME is {}", compiled.count, n_frame),
            ));
        }

        let id = slot_struct
            .field(&roles.id_field)
            .filter(|f| f.count == 1 && f.scalar() == Some(ScalarKind::U32))
            .ok_or_else(|| role_error(field, format!("needs a u32 '{}' field", roles.id_field)))?;
        let ts = slot_struct
            .field(&roles.ts_field)
            .filter(|f| f.count == 1)
            .ok_or_else(|| role_error(field, format!("needs a scalar '{}' field", roles.ts_field)))?;
        let ts_kind = ts
            .scalar()
            .ok_or_else(|| role_error(field, format!("'{}' must be a scalar", roles.ts_field)))?;

        Ok(Self {
            name: field.to_string(),
            slots: tree.require(field)?.to_vec(),
            id_offset: id.offset,
            ts_offset: ts.offset,
            ts_kind,
            mask: layout.constants().frame_mask,
        })
    }

    /// Root field name of the ring.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot index of a sequence id.
    pub fn slot_index(&self, id: u32) -> usize {
        (id & self.mask) as usize
    }

    /// Pointer node of a slot.
    pub fn slot(&self, index: usize) -> &FieldNode {
        &self.slots[index & self.mask as usize]
    }

    /// Pack code of a whole slot.
    pub fn pack(&self) -> &PackCode {
        &self.slots[0].pack
    }

    /// Size of one slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slots[0].len()
    }

    /// Offset of the id field within a slot.
    pub fn id_offset(&self) -> usize {
        self.id_offset
    }

    /// Range of a sub-field element, relative to the start of its slot.
    pub fn relative_range(&self, name: &str, index: usize) -> Result<Range<usize>> {
        let slot = &self.slots[0];
        Ok(slot.require(name, index)?.relative_to(slot.range.start))
    }

    /// Read the id stored in a slot.
    pub fn load_id(&self, region: &SharedRegion, slot: usize) -> Result<u32> {
        region.load_u32_acquire(self.slot(slot).range.start + self.id_offset)
    }

    /// Publish `body` (a full encoded slot) as sequence id `id`.
    ///
    /// The id is cleared before the body is copied and written last, so a
    /// concurrent reader sees either the old frame, a zero id, or the new
    /// frame, never a new id over an old body.
    pub fn publish(&self, region: &mut SharedRegion, id: u32, body: &[u8]) -> Result<()> {
        let slot = self.slot(self.slot_index(id));
        if body.len() != slot.len() {
            return Err(AquaError::Serialization(format!(
                "frame for '{}' is {} bytes, slot is {}",
                self.name,
                body.len(),
                slot.len()
            )));
        }
        let id_at = slot.range.start + self.id_offset;
        region.store_u32_release(id_at, 0)?;
        // The cleared id must be visible before any body byte changes.
        fence(Ordering::Release);
        region.write(slot.range.start, &body[..self.id_offset])?;
        region.write(id_at + 4, &body[self.id_offset + 4..])?;
        region.store_u32_release(id_at, id)?;
        trace!(ring = %self.name, id, "Published frame");
        Ok(())
    }
}

fn role_error(field: &str, cause: impl Into<String>) -> AquaError {
    AquaError::LayoutRole {
        field: field.to_string(),
        cause: cause.into(),
    }
}

/// A validated copy of one published frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSnapshot<'a> {
    /// Sequence id of the frame.
    pub sequence_id: u32,
    /// Frame timestamp.
    pub timestamp: f64,
    /// Slot bytes, starting at the slot's first byte.
    pub bytes: &'a [u8],
}

impl FrameSnapshot<'_> {
    /// Decode one scalar at a slot-relative range.
    pub fn scalar(&self, range: &Range<usize>, kind: ScalarKind) -> Result<ScalarValue> {
        let bytes = self.bytes.get(range.clone()).ok_or(AquaError::RegionBounds {
            start: range.start,
            end: range.end,
            size: self.bytes.len(),
        })?;
        kind.read(bytes)
    }
}

/// Walks a ring forward, never returning an id lower than one already seen.
///
/// The bridge reads telemetry with it; the simulated data plane reads the
/// control ring the same way.
#[derive(Debug)]
pub struct TelemetryReader {
    ring: FrameRing,
    last_seen: u32,
    buf: Vec<u8>,
    max_attempts: u32,
}

/// The data plane's view of the control ring uses the same walk.
pub type ControlReader = TelemetryReader;

impl TelemetryReader {
    /// Create a reader that has seen nothing (`last_seen == 0`).
    pub fn new(ring: FrameRing) -> Self {
        let capacity = ring.slot_size();
        Self {
            ring,
            last_seen: 0,
            buf: Vec::with_capacity(capacity),
            max_attempts: MAX_COPY_ATTEMPTS,
        }
    }

    /// Override the copy retry bound.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// The ring being read.
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Highest sequence id observed so far.
    pub fn last_seen(&self) -> u32 {
        self.last_seen
    }

    /// Walk forward over every slot published since the last call and return
    /// the newest id. Does not copy any body.
    pub fn advance(&mut self, region: &SharedRegion) -> Result<u32> {
        loop {
            let next = self.ring.slot_index(self.last_seen.wrapping_add(1));
            let id = self.ring.load_id(region, next)?;
            if id <= self.last_seen {
                return Ok(self.last_seen);
            }
            trace!(ring = %self.ring.name, id, "Observed new frame id");
            self.last_seen = id;
        }
    }

    /// Step exactly one published frame forward.
    ///
    /// Returns `None` when the slot after `last_seen` holds nothing newer.
    pub fn next_frame(&mut self, region: &SharedRegion) -> Result<Option<FrameSnapshot<'_>>> {
        let slot = self.ring.slot_index(self.last_seen.wrapping_add(1));
        let mut attempts = 0;
        let accepted = loop {
            attempts += 1;
            let id = self.ring.load_id(region, slot)?;
            if id <= self.last_seen {
                return Ok(None);
            }
            if self.copy_slot(region, slot, id)? {
                break id;
            }
            if attempts >= self.max_attempts {
                return Err(AquaError::FrameOverrun {
                    sequence_id: id,
                    attempts,
                });
            }
            warn!(ring = %self.ring.name, id, attempts, "Frame overwritten during copy, retrying");
        };
        self.last_seen = accepted;
        self.snapshot(accepted).map(Some)
    }

    /// Advance to the newest published frame and copy it.
    ///
    /// Returns `None` while nothing has been published.
    pub fn latest_frame(&mut self, region: &SharedRegion) -> Result<Option<FrameSnapshot<'_>>> {
        let mut attempts = 0;
        let accepted = loop {
            attempts += 1;
            let id = self.advance(region)?;
            if id == 0 {
                return Ok(None);
            }
            let slot = self.ring.slot_index(id);
            if self.copy_slot(region, slot, id)? {
                break id;
            }
            if attempts >= self.max_attempts {
                return Err(AquaError::FrameOverrun {
                    sequence_id: id,
                    attempts,
                });
            }
            warn!(ring = %self.ring.name, id, attempts, "Latest frame overwritten during copy, retrying");
        };
        self.snapshot(accepted).map(Some)
    }

    /// Copy a slot and confirm its id still reads `expected` before and after.
    fn copy_slot(&mut self, region: &SharedRegion, slot: usize, expected: u32) -> Result<bool> {
        if self.ring.load_id(region, slot)? != expected {
            return Ok(false);
        }
        let range = self.ring.slot(slot).range.clone();
        region.read_into(range, &mut self.buf)?;
        // Body reads may not sink below the id re-check.
        fence(Ordering::Acquire);
        Ok(self.ring.load_id(region, slot)? == expected)
    }

    fn snapshot(&self, sequence_id: u32) -> Result<FrameSnapshot<'_>> {
        let ts_end = self.ring.ts_offset + self.ring.ts_kind.size();
        let timestamp = self
            .ring
            .ts_kind
            .read(&self.buf[self.ring.ts_offset..ts_end])?
            .as_f64();
        Ok(FrameSnapshot {
            sequence_id,
            timestamp,
            bytes: &self.buf,
        })
    }
}

/// Writes control frames with strictly increasing ids starting at 1.
#[derive(Debug)]
pub struct ControlWriter {
    ring: FrameRing,
    next_id: u32,
    buf: Vec<u8>,
}

impl ControlWriter {
    /// Create a writer whose first frame is id 1.
    pub fn new(ring: FrameRing) -> Self {
        let capacity = ring.slot_size();
        Self {
            ring,
            next_id: 1,
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Resume after an existing sequence (e.g. ids already in the ring).
    pub fn with_next_id(mut self, next_id: u32) -> Self {
        self.next_id = next_id.max(1);
        self
    }

    /// The ring being written.
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Id the next publish will use.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Encode `values` against the slot pack code and publish them.
    ///
    /// The value at the id position is ignored; the real id is written last.
    pub fn publish(&mut self, region: &mut SharedRegion, values: &[ScalarValue]) -> Result<u32> {
        let id = self.next_id;
        self.ring.pack().pack_into(values, &mut self.buf)?;
        let id_at = self.ring.id_offset;
        self.buf[id_at..id_at + 4].copy_from_slice(&0u32.to_le_bytes());
        self.ring.publish(region, id, &self.buf)?;
        // Zero marks an unpublished slot, so the sequence skips it on wrap.
        self.next_id = match id.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        Ok(id)
    }
}
