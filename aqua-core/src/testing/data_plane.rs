//! Simulated data plane.

use crate::error::{AquaError, Result};
use crate::features::ActiveServers;
use crate::layout::{CompiledField, CompiledStruct, Layout, ScalarKind};
use crate::pointer::PointerTree;
use crate::region::SharedRegion;
use crate::ring::{ControlReader, FrameRing};
use std::path::{Path, PathBuf};

/// A control frame as the data plane reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    /// Sequence id.
    pub sequence_id: u32,
    /// Frame timestamp.
    pub timestamp: f64,
    /// Raw weights.
    pub weights: Vec<f64>,
    /// `(probability, alias)` per slot.
    pub table: Vec<(f64, usize)>,
}

/// Writes telemetry the way the data plane does (body first, id last) and
/// reads control frames with the same forward walk.
pub struct DataPlaneSim {
    layout: Layout,
    tree: PointerTree,
    region: SharedRegion,
    telemetry: FrameRing,
    frame: CompiledStruct,
    stats: CompiledStruct,
    control: Option<ControlReader>,
    next_id: u32,
    buf: Vec<u8>,
}

impl DataPlaneSim {
    /// Create a zeroed region file at `path` and fill scalar root fields with
    /// their schema defaults.
    pub fn create(layout: &Layout, path: impl AsRef<Path>) -> Result<Self> {
        let roles = layout.roles();
        let mut region = SharedRegion::create(path, layout.constants().shm_size)?;
        let tree = PointerTree::build(layout);
        let telemetry = FrameRing::from_tree(layout, &tree, &roles.frames_out)?;
        let frame = struct_field(layout, &roles.frames_out)?.clone();
        let body = frame
            .field(&roles.body_field)
            .and_then(|f| layout.struct_of(f))
            .ok_or_else(|| missing(&format!("{}.{}", frame.name, roles.body_field)))?
            .clone();
        let control = match layout.root_field(&roles.frames_in) {
            Some(_) => Some(ControlReader::new(FrameRing::from_tree(layout, &tree, &roles.frames_in)?)),
            None => None,
        };

        let mut scratch = Vec::new();
        for field in layout.root_fields() {
            if let (Some(kind), 1) = (field.scalar(), field.count) {
                scratch.clear();
                kind.coerce(field.default_value).write_as(kind, &mut scratch);
                region.write(layout.base_offset() + field.offset, &scratch)?;
            }
        }

        Ok(Self {
            layout: layout.clone(),
            tree,
            region,
            telemetry,
            frame,
            stats: body,
            control,
            next_id: 1,
            buf: Vec::new(),
        })
    }

    /// The shared region.
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Mutable access, e.g. to stage a torn write.
    pub fn region_mut(&mut self) -> &mut SharedRegion {
        &mut self.region
    }

    /// Region file path.
    pub fn path(&self) -> PathBuf {
        self.region.path().to_path_buf()
    }

    /// The telemetry ring.
    pub fn telemetry_ring(&self) -> &FrameRing {
        &self.telemetry
    }

    /// Id the next telemetry frame will use.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Encode a telemetry frame without publishing it. The id bytes are zero.
    ///
    /// `servers` lists the active servers and the counter values to set for
    /// each; unnamed counters are zero.
    pub fn encode_telemetry(&mut self, timestamp: f64, servers: &[(usize, Vec<(&str, f64)>)]) -> Result<Vec<u8>> {
        let roles = self.layout.roles();
        let n_bin = self.layout.constants().n_bin;
        self.buf.clear();
        self.buf.resize(self.telemetry.slot_size(), 0);

        let ts = scalar_field(&self.frame, &roles.ts_field)?;
        put(&mut self.buf, ts.offset, ts.kind, timestamp);
        let header = scalar_field(&self.frame, &roles.header_field)?;
        let active = ActiveServers::from_ids(servers.iter().map(|(s, _)| *s), n_bin)?;
        put(&mut self.buf, header.offset, header.kind, active.header() as f64);

        let body = self
            .frame
            .field(&roles.body_field)
            .ok_or_else(|| missing(&roles.body_field))?;
        for (server, counters) in servers {
            let base = body.element_offset(*server);
            for (name, value) in counters {
                let counter = scalar_field(&self.stats, name)?;
                put(&mut self.buf, base + counter.offset, counter.kind, *value);
            }
        }
        Ok(self.buf.clone())
    }

    /// Publish a telemetry frame and mirror it into the cache field.
    pub fn publish_telemetry(&mut self, timestamp: f64, servers: &[(usize, Vec<(&str, f64)>)]) -> Result<u32> {
        let mut bytes = self.encode_telemetry(timestamp, servers)?;
        let id = self.next_id;
        self.telemetry.publish(&mut self.region, id, &bytes)?;
        self.next_id += 1;

        if let Some(cache) = self.tree.node(&self.layout.roles().cache_out, 0) {
            let at = self.telemetry.id_offset();
            bytes[at..at + 4].copy_from_slice(&id.to_le_bytes());
            self.region.write(cache.range.start, &bytes)?;
        }
        Ok(id)
    }

    /// Fill one reservoir. `server` selects a per-server reservoir; `None`
    /// selects the load balancer's. Slots past `samples` are zeroed.
    pub fn set_reservoir(&mut self, server: Option<usize>, field: &str, samples: &[(f64, f64)]) -> Result<()> {
        let roles = self.layout.roles();
        let (root, index) = match server {
            Some(s) => (&roles.server_reservoirs, s),
            None => (&roles.lb_reservoir, 0),
        };
        let elements = self
            .tree
            .node(root, index)
            .and_then(|n| n.children(field))
            .ok_or_else(|| missing(&format!("{}[{}].{}", root, index, field)))?;
        if samples.len() > elements.len() {
            return Err(AquaError::Configuration(format!(
                "reservoir '{}' holds {} samples, got {}",
                field,
                elements.len(),
                samples.len()
            )));
        }

        let mut scratch = Vec::new();
        for (k, element) in elements.iter().enumerate() {
            let (t, v) = samples.get(k).copied().unwrap_or((0.0, 0.0));
            let pair: Vec<_> = element.fields().filter_map(|(_, nodes)| nodes.first()).collect();
            for (node, value) in pair.iter().zip([t, v]) {
                let kind = node.pack.kinds()[0];
                scratch.clear();
                kind.coerce(value).write_as(kind, &mut scratch);
                self.region.write(node.range.start, &scratch)?;
            }
        }
        Ok(())
    }

    /// Read the newest control frame, if any has been published.
    pub fn latest_control(&mut self) -> Result<Option<ControlFrame>> {
        let roles = self.layout.roles();
        let Some(reader) = self.control.as_mut() else {
            return Err(missing(&roles.frames_in));
        };
        let Some(frame) = reader.latest_frame(&self.region)? else {
            return Ok(None);
        };

        let slot = struct_field(&self.layout, &roles.frames_in)?;
        let score = slot.field(&roles.score_field).ok_or_else(|| missing(&roles.score_field))?;
        let alias = slot.field(&roles.alias_field).ok_or_else(|| missing(&roles.alias_field))?;
        let pair = self
            .layout
            .struct_of(alias)
            .filter(|s| s.fields.len() == 2)
            .ok_or_else(|| missing(&roles.alias_field))?;

        let weights = (0..score.count)
            .map(|i| read_scalar(frame.bytes, score, score.element_offset(i)))
            .collect::<Result<Vec<_>>>()?;
        let table = (0..alias.count)
            .map(|i| {
                let base = alias.element_offset(i);
                let p = read_scalar(frame.bytes, &pair.fields[0], base + pair.fields[0].offset)?;
                let a = read_scalar(frame.bytes, &pair.fields[1], base + pair.fields[1].offset)?;
                Ok((p, a as usize))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ControlFrame {
            sequence_id: frame.sequence_id,
            timestamp: frame.timestamp,
            weights,
            table,
        }))
    }
}

impl std::fmt::Debug for DataPlaneSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPlaneSim")
            .field("region", &self.region)
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Offset and kind of a single scalar field.
struct ScalarAt {
    offset: usize,
    kind: ScalarKind,
}

fn scalar_field(owner: &CompiledStruct, name: &str) -> Result<ScalarAt> {
    owner
        .field(name)
        .and_then(|f| f.scalar().map(|kind| ScalarAt { offset: f.offset, kind }))
        .ok_or_else(|| missing(&format!("{}.{}", owner.name, name)))
}

fn struct_field<'a>(layout: &'a Layout, name: &str) -> Result<&'a CompiledStruct> {
    layout
        .root_field(name)
        .and_then(|f| layout.struct_of(f))
        .ok_or_else(|| missing(name))
}

fn read_scalar(bytes: &[u8], field: &CompiledField, at: usize) -> Result<f64> {
    let kind = field.scalar().ok_or_else(|| missing(&field.name))?;
    let slice = bytes.get(at..at + kind.size()).ok_or(AquaError::RegionBounds {
        start: at,
        end: at + kind.size(),
        size: bytes.len(),
    })?;
    Ok(kind.read(slice)?.as_f64())
}

fn put(buf: &mut [u8], at: usize, kind: ScalarKind, value: f64) {
    let mut scratch = Vec::with_capacity(8);
    kind.coerce(value).write_as(kind, &mut scratch);
    buf[at..at + scratch.len()].copy_from_slice(&scratch);
}

fn missing(field: &str) -> AquaError {
    AquaError::LayoutRole {
        field: field.to_string(),
        cause: "field not present".to_string(),
    }
}
