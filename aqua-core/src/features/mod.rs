//! Feature extraction from telemetry frames.
//!
//! A telemetry frame carries an active-server bitmap and one counter struct
//! per server. The [`FeatureProcessor`] turns it into one feature row per
//! active server: counter columns (deltas for cumulative counters) followed
//! by five statistics for every reservoir the data plane keeps for that
//! server. Reservoirs live outside the frame ring and are read straight from
//! the region at processing time.

mod active;
mod counters;
mod reservoir;
mod schema;

pub use active::ActiveServers;
pub use counters::{CounterSnapshot, CounterTracker};
pub use reservoir::{RES_FEATURE_SUFFIXES, ReservoirStats, linear_percentile, weighted_percentile};
pub use schema::{CounterColumn, FeatureSchema, ReservoirField};

use crate::error::{AquaError, Result};
use crate::layout::{Layout, ScalarKind};
use crate::pointer::PointerTree;
use crate::region::SharedRegion;
use crate::ring::{FrameRing, FrameSnapshot};
use serde::Serialize;
use std::ops::Range;
use tracing::debug;

/// Features extracted from one telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFeatures {
    /// Sequence id of the source frame.
    pub sequence_id: u32,
    /// Timestamp of the source frame.
    pub timestamp: f64,
    /// Servers active in the frame.
    pub active: ActiveServers,
    /// One row per active server, in ascending server order.
    pub features: Vec<Vec<f64>>,
    /// Load-balancer row; only computed outside deploy mode.
    pub lb_features: Option<Vec<f64>>,
}

impl ServerFeatures {
    /// Feature row of a server, if it was active.
    pub fn row(&self, server: usize) -> Option<&[f64]> {
        self.active
            .iter()
            .position(|s| s == server)
            .and_then(|i| self.features.get(i))
            .map(Vec::as_slice)
    }
}

/// Derives feature rows from telemetry frames.
#[derive(Debug)]
pub struct FeatureProcessor {
    schema: FeatureSchema,
    tracker: CounterTracker,
    header: (Range<usize>, ScalarKind),
    bodies: Vec<Range<usize>>,
    server_reservoirs: Vec<Range<usize>>,
    lb_reservoir: Option<Range<usize>>,
    n_bin: usize,
    decay: f64,
    deploy: bool,
    counters: Vec<f64>,
    res_buf: Vec<u8>,
    samples: Vec<(f64, f64)>,
}

impl FeatureProcessor {
    /// Resolve the frame and reservoir geometry for `ring`.
    pub fn new(layout: &Layout, tree: &PointerTree, ring: &FrameRing) -> Result<Self> {
        let roles = layout.roles();
        let schema = FeatureSchema::from_layout(layout)?;
        let n_bin = layout.constants().n_bin;

        let header_kind = layout
            .root_field(ring.name())
            .and_then(|f| layout.struct_of(f))
            .and_then(|s| s.field(&roles.header_field))
            .and_then(|f| f.scalar())
            .ok_or_else(|| AquaError::LayoutRole {
                field: roles.header_field.clone(),
                cause: "header must be a scalar bitmap".to_string(),
            })?;
        let header = (ring.relative_range(&roles.header_field, 0)?, header_kind);

        let bodies = (0..n_bin)
            .map(|i| ring.relative_range(&roles.body_field, i))
            .collect::<Result<Vec<_>>>()?;

        let server_reservoirs = if schema.server_reservoirs().is_empty() {
            Vec::new()
        } else {
            let nodes = tree.require(&roles.server_reservoirs)?;
            if nodes.len() < n_bin {
                return Err(AquaError::LayoutRole {
                    field: roles.server_reservoirs.clone(),
                    cause: format!("has {} entries, SHM_N_BIN is {}", nodes.len(), n_bin),
                });
            }
            nodes.iter().map(|n| n.range.clone()).collect()
        };
        let lb_reservoir = if schema.lb_reservoirs().is_empty() {
            None
        } else {
            Some(tree.require(&roles.lb_reservoir)?[0].range.clone())
        };

        let tracker = CounterTracker::new(schema.counters(), n_bin);
        Ok(Self {
            tracker,
            header,
            bodies,
            server_reservoirs,
            lb_reservoir,
            n_bin,
            decay: layout.constants().res_decay,
            deploy: true,
            counters: Vec::with_capacity(schema.counters().len()),
            res_buf: Vec::new(),
            samples: Vec::new(),
            schema,
        })
    }

    /// In deploy mode (the default) the load-balancer row is skipped.
    pub fn with_deploy(mut self, deploy: bool) -> Self {
        self.deploy = deploy;
        self
    }

    /// Column layout of the feature rows.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Counter state.
    pub fn tracker(&self) -> &CounterTracker {
        &self.tracker
    }

    /// Decode the active-server bitmap of a frame.
    pub fn active_servers(&self, frame: &FrameSnapshot<'_>) -> Result<ActiveServers> {
        let (range, kind) = &self.header;
        let header = frame.scalar(range, *kind)?.as_u64();
        Ok(ActiveServers::from_header(header, self.n_bin))
    }

    /// Extract the feature rows of one frame.
    ///
    /// Counter deltas are taken against the previous frame processed for each
    /// server, so every frame should pass through here exactly once.
    pub fn process(&mut self, frame: &FrameSnapshot<'_>, region: &SharedRegion) -> Result<ServerFeatures> {
        let active = self.active_servers(frame)?;
        let mut features = Vec::with_capacity(active.len());

        for server in active.iter() {
            let mut row = Vec::with_capacity(self.schema.len());
            let body = self.bodies[server].start;
            self.counters.clear();
            for column in self.schema.counters() {
                let at = body + column.offset;
                let value = frame.scalar(&(at..at + column.kind.size()), column.kind)?;
                self.counters.push(value.as_f64());
            }
            self.tracker
                .update_into(server, frame.timestamp, &self.counters, &mut row)?;

            if let Some(range) = self.server_reservoirs.get(server) {
                region.read_into(range.clone(), &mut self.res_buf)?;
                for field in self.schema.server_reservoirs() {
                    read_samples(&self.res_buf, field, &mut self.samples)?;
                    row.extend(ReservoirStats::compute(&self.samples, frame.timestamp, self.decay));
                }
            }
            features.push(row);
        }

        let lb_features = if self.deploy {
            None
        } else {
            Some(self.lb_row(&features, frame.timestamp, region)?)
        };

        debug!(
            sequence_id = frame.sequence_id,
            active = active.len(),
            "Processed telemetry frame"
        );
        Ok(ServerFeatures {
            sequence_id: frame.sequence_id,
            timestamp: frame.timestamp,
            active,
            features,
            lb_features,
        })
    }

    /// Column means over the active rows followed by the load balancer's own
    /// reservoir statistics.
    fn lb_row(&mut self, rows: &[Vec<f64>], now: f64, region: &SharedRegion) -> Result<Vec<f64>> {
        let width = self.schema.len();
        let mut lb = vec![0.0; width];
        if !rows.is_empty() {
            for row in rows {
                for (acc, v) in lb.iter_mut().zip(row) {
                    *acc += v;
                }
            }
            let n = rows.len() as f64;
            lb.iter_mut().for_each(|v| *v /= n);
        }
        if let Some(range) = &self.lb_reservoir {
            region.read_into(range.clone(), &mut self.res_buf)?;
            for field in self.schema.lb_reservoirs() {
                read_samples(&self.res_buf, field, &mut self.samples)?;
                lb.extend(ReservoirStats::compute(&self.samples, now, self.decay));
            }
        }
        Ok(lb)
    }
}

/// Decode the `(t, v)` samples of one reservoir from its owner's bytes.
pub(crate) fn read_samples(bytes: &[u8], field: &ReservoirField, out: &mut Vec<(f64, f64)>) -> Result<()> {
    out.clear();
    for k in 0..field.count {
        let at = field.offset + k * field.elem_size;
        let (t_at, t_kind) = field.time;
        let (v_at, v_kind) = field.value;
        let t = read_at(bytes, at + t_at, t_kind)?;
        let v = read_at(bytes, at + v_at, v_kind)?;
        out.push((t, v));
    }
    Ok(())
}

fn read_at(bytes: &[u8], at: usize, kind: ScalarKind) -> Result<f64> {
    let end = at + kind.size();
    let slice = bytes.get(at..end).ok_or(AquaError::RegionBounds {
        start: at,
        end,
        size: bytes.len(),
    })?;
    Ok(kind.read(slice)?.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::TelemetryReader;
    use crate::schema::SchemaDocument;
    use crate::testing::DataPlaneSim;
    use serde_json::json;
    use tempfile::tempdir;

    fn layout() -> Layout {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "global": {
                "SHM_SIZE": 1024, "SHM_OFFSET": 0, "SHM_N_FRAME": 2, "SHM_FRAME_MASK": 1,
                "SHM_N_BIN": 4, "RESERVOIR_N_BIN": 2, "RES_DECAY": 0.5
            },
            "map": {
                "pack_codes": {"u32": "I", "int32_t": "i", "u64": "Q", "f32": "f"},
                "byte_sizes": {"u32": 4, "int32_t": 4, "u64": 8, "f32": 4}
            },
            "vpp": {"struct": {
                "pair": [["f32", "t", 1, "", 0.0], ["f32", "v", 1, "", 0.0]],
                "stat": [
                    ["u32", "as_index", 1, "", 0],
                    ["int32_t", "n_flow_on", 1, "", 0],
                    ["u32", "n_flow", 1, "", 0]
                ],
                "res": [["pair", "lat", "RESERVOIR_N_BIN", "", 0]],
                "res_lb": [["pair", "iat", "RESERVOIR_N_BIN", "", 0]],
                "msg_out": [
                    ["u32", "id", 1, "", 0],
                    ["f32", "ts", 1, "", 0.0],
                    ["u64", "b_header", 1, "", 0],
                    ["stat", "body", "SHM_N_BIN", "", 0]
                ]
            }},
            "layout": [
                ["msg_out", "msg_out_frames", "SHM_N_FRAME", "", 0],
                ["res_lb", "res_lb", 1, "", 0],
                ["res", "res_as", "SHM_N_BIN", "", 0]
            ]
        }))
        .unwrap();
        Layout::compile(&doc).unwrap()
    }

    #[test]
    fn rows_follow_active_order() {
        let layout = layout();
        let dir = tempdir().unwrap();
        let mut sim = DataPlaneSim::create(&layout, dir.path().join("shm")).unwrap();
        let tree = PointerTree::build(&layout);
        let ring = FrameRing::from_tree(&layout, &tree, "msg_out_frames").unwrap();
        let mut processor = FeatureProcessor::new(&layout, &tree, &ring).unwrap();
        let mut reader = TelemetryReader::new(ring);

        sim.set_reservoir(Some(2), "lat", &[(0.0, 10.0), (1.0, 20.0)]).unwrap();
        sim.publish_telemetry(
            2.0,
            &[
                (0, vec![("n_flow_on", 3.0), ("n_flow", 5.0)]),
                (2, vec![("n_flow_on", 1.0), ("n_flow", 7.0)]),
            ],
        )
        .unwrap();

        let frame = reader.next_frame(sim.region()).unwrap().unwrap();
        let out = processor.process(&frame, sim.region()).unwrap();
        assert_eq!(out.sequence_id, 1);
        assert_eq!(out.active.to_vec(), vec![0, 2]);
        assert_eq!(processor.schema().names()[..2], ["n_flow_on", "n_flow"]);
        assert_eq!(out.features.len(), 2);
        assert_eq!(out.features[0][..2], [3.0, 5.0]);
        assert_eq!(out.features[0][2..], [0.0; 5]);

        let row = out.row(2).unwrap();
        assert_eq!(row[..3], [1.0, 7.0, 15.0]);
        let expected = (10.0 * 0.25 + 20.0 * 0.5) / 0.75;
        assert!((row[5] - expected).abs() < 1e-9);
        assert!(out.lb_features.is_none());
    }

    #[test]
    fn counters_become_deltas_across_frames() {
        let layout = layout();
        let dir = tempdir().unwrap();
        let mut sim = DataPlaneSim::create(&layout, dir.path().join("shm")).unwrap();
        let tree = PointerTree::build(&layout);
        let ring = FrameRing::from_tree(&layout, &tree, "msg_out_frames").unwrap();
        let mut processor = FeatureProcessor::new(&layout, &tree, &ring).unwrap();
        let mut reader = TelemetryReader::new(ring);

        let mut deltas = Vec::new();
        for (ts, n_flow) in [(1.0, 5.0), (2.0, 5.0), (3.0, 8.0)] {
            sim.publish_telemetry(ts, &[(1, vec![("n_flow", n_flow)])]).unwrap();
            let frame = reader.next_frame(sim.region()).unwrap().unwrap();
            let out = processor.process(&frame, sim.region()).unwrap();
            deltas.push(out.row(1).unwrap()[1]);
        }
        assert_eq!(deltas, vec![5.0, 0.0, 3.0]);
    }

    #[test]
    fn lb_row_outside_deploy_mode() {
        let layout = layout();
        let dir = tempdir().unwrap();
        let mut sim = DataPlaneSim::create(&layout, dir.path().join("shm")).unwrap();
        let tree = PointerTree::build(&layout);
        let ring = FrameRing::from_tree(&layout, &tree, "msg_out_frames").unwrap();
        let mut processor = FeatureProcessor::new(&layout, &tree, &ring)
            .unwrap()
            .with_deploy(false);
        let mut reader = TelemetryReader::new(ring);

        sim.set_reservoir(None, "iat", &[(1.0, 4.0), (1.0, 4.0)]).unwrap();
        sim.publish_telemetry(
            1.0,
            &[(0, vec![("n_flow", 2.0)]), (3, vec![("n_flow", 6.0)])],
        )
        .unwrap();
        let frame = reader.next_frame(sim.region()).unwrap().unwrap();
        let out = processor.process(&frame, sim.region()).unwrap();
        let lb = out.lb_features.unwrap();
        assert_eq!(lb.len(), processor.schema().lb_names().len());
        assert_eq!(lb[1], 4.0);
        assert_eq!(lb[lb.len() - 5], 4.0);
    }

    #[test]
    fn empty_frame_has_zero_lb_means() {
        let layout = layout();
        let dir = tempdir().unwrap();
        let mut sim = DataPlaneSim::create(&layout, dir.path().join("shm")).unwrap();
        let tree = PointerTree::build(&layout);
        let ring = FrameRing::from_tree(&layout, &tree, "msg_out_frames").unwrap();
        let mut processor = FeatureProcessor::new(&layout, &tree, &ring)
            .unwrap()
            .with_deploy(false);
        let mut reader = TelemetryReader::new(ring);

        sim.publish_telemetry(1.0, &[]).unwrap();
        let frame = reader.next_frame(sim.region()).unwrap().unwrap();
        let out = processor.process(&frame, sim.region()).unwrap();
        assert!(out.active.is_empty());
        assert!(out.features.is_empty());
        assert!(out.lb_features.unwrap()[..7].iter().all(|&v| v == 0.0));
    }
}
