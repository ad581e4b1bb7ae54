//! Alias-method action encoder.
//!
//! Weights are published to the data plane as an alias table: slot `i`
//! holds `(probability, alias)`. The data plane picks a slot uniformly and
//! keeps it with `probability`, otherwise it takes `alias`. Tables are built
//! over the full weight vector, so indices are server ids and a zero weight
//! always defers to its alias.

use crate::clock::ClockProvider;
use crate::error::{AquaError, Result};
use crate::layout::{Layout, ScalarKind, ScalarValue};
use crate::region::SharedRegion;
use crate::ring::ControlWriter;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Keeps the average of the weight vector away from a division by zero.
const EPSILON: f64 = 1e-6;

/// One slot of an alias table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AliasEntry {
    /// Probability of keeping the slot's own index.
    pub probability: f64,
    /// Index taken otherwise.
    pub alias: usize,
}

/// Alias table over a weight vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    /// Build a table in linear time.
    ///
    /// Weights must be finite and non-negative with a positive sum.
    pub fn build(weights: &[f64]) -> Result<Self> {
        if let Some((i, w)) = weights
            .iter()
            .enumerate()
            .find(|&(_, w)| !w.is_finite() || *w < 0.0)
        {
            return Err(AquaError::InvalidWeights {
                cause: format!("weight {} is {}", i, w),
            });
        }
        let sum: f64 = weights.iter().sum();
        if weights.is_empty() || sum <= 0.0 {
            return Err(AquaError::DegenerateWeights);
        }

        let n = weights.len();
        // Normalized weights add up to slightly more than `n`, so small
        // entries never outlast the big ones.
        let avg = sum / (n as f64 + EPSILON);
        let mut small = Vec::with_capacity(n);
        let mut big = Vec::with_capacity(n);
        for (i, &w) in weights.iter().enumerate() {
            let norm = w / avg;
            if w < avg {
                small.push((i, norm));
            } else {
                big.push((i, norm));
            }
        }

        let mut entries: Vec<AliasEntry> = (0..n)
            .map(|i| AliasEntry {
                probability: 1.0,
                alias: i,
            })
            .collect();
        let mut small = small.into_iter();
        let mut big = big.into_iter();
        let mut current_small = small.next();
        let mut current_big = big.next();
        while let (Some((s, s_norm)), Some((b, b_rem))) = (current_small, current_big) {
            entries[s] = AliasEntry {
                probability: s_norm,
                alias: b,
            };
            let remainder = b_rem - (1.0 - s_norm);
            if remainder < 1.0 {
                // The big entry is now under-full and is handed out next.
                current_small = Some((b, remainder));
                current_big = big.next();
            } else {
                current_big = Some((b, remainder));
                current_small = small.next();
            }
        }

        // Rounding can still leave a slot unvisited. An inactive slot must
        // never keep itself.
        let heaviest = weights
            .iter()
            .enumerate()
            .fold(0, |best, (i, &w)| if w > weights[best] { i } else { best });
        for (i, entry) in entries.iter_mut().enumerate() {
            if weights[i] == 0.0 && entry.alias == i {
                *entry = AliasEntry {
                    probability: 0.0,
                    alias: heaviest,
                };
            }
        }

        Ok(Self { entries })
    }

    /// Table slots.
    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Draw one index.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let slot = rng.gen_range(0..self.entries.len());
        let entry = self.entries[slot];
        if rng.r#gen::<f64>() < entry.probability {
            slot
        } else {
            entry.alias
        }
    }

    /// The distribution the table encodes.
    pub fn probabilities(&self) -> Vec<f64> {
        let n = self.entries.len() as f64;
        let mut p = vec![0.0; self.entries.len()];
        for (i, entry) in self.entries.iter().enumerate() {
            p[i] += entry.probability / n;
            p[entry.alias] += (1.0 - entry.probability) / n;
        }
        p
    }
}

/// A published control frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionMessage {
    /// Sequence id the frame was published under.
    pub sequence_id: u32,
    /// Timestamp written into the frame.
    pub timestamp: f64,
    /// Raw weights.
    pub weights: Vec<f64>,
    /// Alias table derived from the weights.
    pub table: AliasTable,
}

/// How each field of a control slot is filled.
#[derive(Debug, Clone)]
enum Segment {
    Id,
    Timestamp(ScalarKind),
    Weights(ScalarKind),
    Table(ScalarKind, ScalarKind),
    Fixed(Vec<ScalarValue>),
}

/// Encodes weight vectors into control frames.
pub struct ActionEncoder {
    writer: ControlWriter,
    plan: Vec<Segment>,
    n_bin: usize,
    clock: Arc<dyn ClockProvider>,
    values: Vec<ScalarValue>,
}

impl ActionEncoder {
    /// Build an encoder for the control ring `writer` publishes to.
    ///
    /// The slot must hold `SHM_N_BIN` scalar weights and `SHM_N_BIN`
    /// `(probability, alias)` pairs. Any other field is written with its
    /// schema default.
    pub fn new(layout: &Layout, writer: ControlWriter, clock: Arc<dyn ClockProvider>) -> Result<Self> {
        let roles = layout.roles();
        let n_bin = layout.constants().n_bin;
        let ring = writer.ring().name().to_string();
        let slot = layout
            .root_field(&ring)
            .and_then(|f| layout.struct_of(f))
            .ok_or_else(|| role_error(&ring, "control frames must be structs"))?;

        let mut plan = Vec::with_capacity(slot.fields.len());
        for field in &slot.fields {
            let path = format!("{}.{}", slot.name, field.name);
            let segment = if field.name == roles.id_field {
                Segment::Id
            } else if field.name == roles.ts_field {
                Segment::Timestamp(field.scalar().ok_or_else(|| role_error(&path, "must be a scalar"))?)
            } else if field.name == roles.score_field {
                match field.scalar() {
                    Some(kind) if field.count == n_bin => Segment::Weights(kind),
                    _ => return Err(role_error(&path, format!("needs {} scalar weights", n_bin))),
                }
            } else if field.name == roles.alias_field {
                let pair = layout
                    .struct_of(field)
                    .filter(|s| field.count == n_bin && s.fields.len() == 2)
                    .and_then(|s| match (s.fields[0].scalar(), s.fields[1].scalar()) {
                        (Some(p), Some(a)) if s.fields.iter().all(|f| f.count == 1) => Some((p, a)),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        role_error(&path, format!("needs {} (probability, alias) pairs", n_bin))
                    })?;
                Segment::Table(pair.0, pair.1)
            } else {
                let fill = field.scalar().map(|_| field.default_value).unwrap_or(0.0);
                let values = (0..field.count)
                    .flat_map(|_| field.pack.kinds().iter().map(move |k| k.coerce(fill)))
                    .collect();
                Segment::Fixed(values)
            };
            plan.push(segment);
        }

        for (wanted, name) in [
            (plan.iter().any(|s| matches!(s, Segment::Weights(_))), &roles.score_field),
            (plan.iter().any(|s| matches!(s, Segment::Table(..))), &roles.alias_field),
        ] {
            if !wanted {
                return Err(role_error(&format!("{}.{}", slot.name, name), "field not present"));
            }
        }

        Ok(Self {
            values: Vec::with_capacity(writer.ring().pack().len()),
            writer,
            plan,
            n_bin,
            clock,
        })
    }

    /// Number of weights a publish expects.
    pub fn width(&self) -> usize {
        self.n_bin
    }

    /// Id the next publish will use.
    pub fn next_id(&self) -> u32 {
        self.writer.next_id()
    }

    /// Build the alias table for `weights` and publish it in the next
    /// control slot.
    pub fn publish(&mut self, region: &mut SharedRegion, weights: &[f64]) -> Result<ActionMessage> {
        if weights.len() != self.n_bin {
            return Err(AquaError::InvalidWeights {
                cause: format!("expected {} weights, got {}", self.n_bin, weights.len()),
            });
        }
        let table = AliasTable::build(weights)?;
        let timestamp = self.clock.now_secs();

        self.values.clear();
        for segment in &self.plan {
            match segment {
                Segment::Id => self.values.push(ScalarValue::U32(0)),
                Segment::Timestamp(kind) => self.values.push(kind.coerce(timestamp)),
                Segment::Weights(kind) => self.values.extend(weights.iter().map(|&w| kind.coerce(w))),
                Segment::Table(p, a) => {
                    for entry in table.entries() {
                        self.values.push(p.coerce(entry.probability));
                        self.values.push(a.coerce(entry.alias as f64));
                    }
                }
                Segment::Fixed(values) => self.values.extend_from_slice(values),
            }
        }

        let sequence_id = self.writer.publish(region, &self.values)?;
        debug!(sequence_id, timestamp, "Published weights");
        Ok(ActionMessage {
            sequence_id,
            timestamp,
            weights: weights.to_vec(),
            table,
        })
    }
}

impl std::fmt::Debug for ActionEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEncoder")
            .field("ring", &self.writer.ring().name())
            .field("next_id", &self.writer.next_id())
            .field("n_bin", &self.n_bin)
            .finish()
    }
}

fn role_error(field: &str, cause: impl Into<String>) -> AquaError {
    AquaError::LayoutRole {
        field: field.to_string(),
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::pointer::PointerTree;
    use crate::ring::{ControlReader, FrameRing};
    use crate::schema::SchemaDocument;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;
    use tempfile::tempdir;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn three_to_one_sampling() {
        let table = AliasTable::build(&[3.0, 1.0]).unwrap();
        let p = table.probabilities();
        assert!(close(p[0], 0.75, 1e-5));
        assert!(close(p[1], 0.25, 1e-5));

        let mut rng = StdRng::seed_from_u64(7);
        let draws = 100_000;
        let hits = (0..draws).filter(|_| table.sample(&mut rng) == 0).count();
        let freq = hits as f64 / draws as f64;
        assert!(close(freq, 0.75, 0.01), "frequency of index 0 was {}", freq);
    }

    #[test]
    fn zero_weights_always_defer() {
        let table = AliasTable::build(&[0.0, 0.0, 5.0, 0.0]).unwrap();
        for entry in &table.entries()[..2] {
            assert_eq!(entry.probability, 0.0);
            assert_eq!(entry.alias, 2);
        }
        assert_eq!(table.entries()[2].alias, 2);
        let p = table.probabilities();
        assert!(close(p[2], 1.0, 1e-5));
        assert!(close(p[0] + p[1] + p[3], 0.0, 1e-5));
    }

    #[test]
    fn uneven_weights_reproduce_distribution() {
        let weights = [1.0, 2.0, 0.0, 4.0, 3.0, 0.5];
        let sum: f64 = weights.iter().sum();
        let p = AliasTable::build(&weights).unwrap().probabilities();
        for (w, p) in weights.iter().zip(&p) {
            assert!(close(w / sum, *p, 1e-5), "{} vs {}", w / sum, p);
        }
    }

    #[test]
    fn tiny_weights_leave_no_mass_on_inactive_slots() {
        let mut weights = vec![0.0; 64];
        weights[0] = 0.001;
        weights[1] = 0.001;
        let table = AliasTable::build(&weights).unwrap();
        for (i, entry) in table.entries().iter().enumerate().skip(2) {
            assert_eq!(entry.probability, 0.0, "slot {} keeps itself", i);
            assert!(entry.alias < 2, "slot {} aliases inactive {}", i, entry.alias);
        }
        let p = table.probabilities();
        let inactive: f64 = p[2..].iter().sum();
        assert_eq!(inactive, 0.0);
        assert!(close(p[0], 0.5, 1e-5));
        assert!(close(p[1], 0.5, 1e-5));
    }

    #[test]
    fn sparse_weights_over_many_slots_reproduce_distribution() {
        let mut weights = vec![0.0; 64];
        weights[5] = 3e-4;
        weights[17] = 1e-4;
        weights[63] = 2e-7;
        let sum: f64 = weights.iter().sum();
        let p = AliasTable::build(&weights).unwrap().probabilities();
        for (i, (w, p)) in weights.iter().zip(&p).enumerate() {
            if *w == 0.0 {
                assert_eq!(*p, 0.0, "inactive slot {} has mass", i);
            } else {
                assert!(close(w / sum, *p, 1e-5), "slot {}: {} vs {}", i, w / sum, p);
            }
        }
    }

    #[test]
    fn uniform_weights_are_self_aliased() {
        let table = AliasTable::build(&[2.0; 4]).unwrap();
        for (i, entry) in table.entries().iter().enumerate() {
            assert_eq!(entry.alias, i);
        }
    }

    #[test]
    fn degenerate_and_invalid_weights() {
        assert!(matches!(AliasTable::build(&[]), Err(AquaError::DegenerateWeights)));
        assert!(matches!(AliasTable::build(&[0.0, 0.0]), Err(AquaError::DegenerateWeights)));
        assert!(matches!(AliasTable::build(&[1.0, -1.0]), Err(AquaError::InvalidWeights { .. })));
        assert!(matches!(AliasTable::build(&[f64::NAN]), Err(AquaError::InvalidWeights { .. })));
    }

    fn layout() -> Layout {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "global": {
                "SHM_SIZE": 512, "SHM_OFFSET": 0, "SHM_N_FRAME": 2, "SHM_FRAME_MASK": 1,
                "SHM_N_BIN": 3, "RESERVOIR_N_BIN": 1
            },
            "map": {
                "pack_codes": {"u32": "I", "f32": "f"},
                "byte_sizes": {"u32": 4, "f32": 4}
            },
            "vpp": {"struct": {
                "alias": [["f32", "odd", 1, "", 1.0], ["u32", "alias", 1, "", 0]],
                "msg_in": [
                    ["u32", "id", 1, "", 0],
                    ["f32", "ts", 1, "", 0.0],
                    ["f32", "score", "SHM_N_BIN", "", 1.0],
                    ["alias", "weights", "SHM_N_BIN", "", 0]
                ]
            }},
            "layout": [["msg_in", "msg_in_frames", "SHM_N_FRAME", "", 0]]
        }))
        .unwrap();
        Layout::compile(&doc).unwrap()
    }

    #[test]
    fn publish_writes_weights_then_table() {
        let layout = layout();
        let tree = PointerTree::build(&layout);
        let ring = FrameRing::from_tree(&layout, &tree, "msg_in_frames").unwrap();
        assert_eq!(ring.pack().len(), 2 + 3 * 3);

        let dir = tempdir().unwrap();
        let mut region = SharedRegion::create(dir.path().join("shm"), 512).unwrap();
        let clock = Arc::new(MockClock::at_secs(12.5));
        let mut encoder = ActionEncoder::new(&layout, ControlWriter::new(ring.clone()), clock).unwrap();

        let msg = encoder.publish(&mut region, &[3.0, 0.0, 1.0]).unwrap();
        assert_eq!(msg.sequence_id, 1);
        assert_eq!(msg.timestamp, 12.5);
        assert_eq!(encoder.next_id(), 2);

        let mut reader = ControlReader::new(ring.clone());
        let frame = reader.latest_frame(&region).unwrap().unwrap();
        assert_eq!(frame.sequence_id, 1);
        assert_eq!(frame.timestamp, 12.5);
        let values = ring.pack().unpack(frame.bytes).unwrap();
        assert_eq!(values[0], ScalarValue::U32(1));
        let weights: Vec<f64> = values[2..5].iter().map(ScalarValue::as_f64).collect();
        assert_eq!(weights, vec![3.0, 0.0, 1.0]);
        // Zero weight at slot 1 always takes its alias.
        assert_eq!(values[7], ScalarValue::F32(0.0));
        assert_eq!(values[8], ScalarValue::U32(msg.table.entries()[1].alias as u32));
    }

    #[test]
    fn publish_rejects_wrong_width() {
        let layout = layout();
        let tree = PointerTree::build(&layout);
        let ring = FrameRing::from_tree(&layout, &tree, "msg_in_frames").unwrap();
        let dir = tempdir().unwrap();
        let mut region = SharedRegion::create(dir.path().join("shm"), 512).unwrap();
        let mut encoder =
            ActionEncoder::new(&layout, ControlWriter::new(ring), Arc::new(MockClock::new())).unwrap();
        assert!(matches!(
            encoder.publish(&mut region, &[1.0]),
            Err(AquaError::InvalidWeights { .. })
        ));
        assert_eq!(encoder.next_id(), 1);
    }
}
