//! Raw region diagnostics.

use crate::error::Result;
use crate::features::{ActiveServers, FeatureSchema, read_samples};
use crate::layout::{Layout, ScalarValue};
use crate::pointer::PointerTree;
use crate::region::SharedRegion;
use serde::Serialize;

/// Header of the data plane's latest-telemetry cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHeader {
    /// Sequence id.
    pub sequence_id: u32,
    /// Timestamp.
    pub timestamp: f64,
    /// Raw bitmap word.
    pub header: u64,
    /// Decoded bitmap.
    pub active: ActiveServers,
}

/// Raw reservoir samples of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerReservoirs {
    /// Server id.
    pub server: usize,
    /// `(field, samples)` in schema order.
    pub fields: Vec<(String, Vec<(f64, f64)>)>,
}

/// Snapshot of the region's bookkeeping fields, for eyeballing a live
/// data plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionDump {
    /// The `n_as` root field, when the layout has one.
    pub n_as: Option<u64>,
    /// Latest-telemetry cache header, when the layout has a cache.
    pub cache: Option<CacheHeader>,
    /// Reservoirs of the requested servers.
    pub reservoirs: Vec<ServerReservoirs>,
}

impl RegionDump {
    /// Read the dump from a mapped region.
    pub fn capture(
        layout: &Layout,
        tree: &PointerTree,
        region: &SharedRegion,
        servers: &[usize],
    ) -> Result<Self> {
        let roles = layout.roles();
        let n_bin = layout.constants().n_bin;

        let n_as = match layout.root_field("n_as").and_then(|f| f.scalar().map(|k| (f, k))) {
            Some((field, kind)) => {
                let at = layout.base_offset() + field.offset;
                Some(kind.read(&region.read(at..at + kind.size())?)?.as_u64())
            }
            None => None,
        };

        let cache = match (
            tree.node(&roles.cache_out, 0),
            layout.root_field(&roles.cache_out).and_then(|f| layout.struct_of(f)),
        ) {
            (Some(node), Some(slot)) => {
                let bytes = region.read(node.range.clone())?;
                let read = |name: &str| -> Result<Option<ScalarValue>> {
                    match slot.field(name).and_then(|f| f.scalar().map(|k| (f.offset, k))) {
                        Some((at, kind)) => Ok(Some(kind.read(&bytes[at..at + kind.size()])?)),
                        None => Ok(None),
                    }
                };
                let header = read(&roles.header_field)?.map(|v| v.as_u64()).unwrap_or(0);
                Some(CacheHeader {
                    sequence_id: read(&roles.id_field)?.map(|v| v.as_u64() as u32).unwrap_or(0),
                    timestamp: read(&roles.ts_field)?.map(|v| v.as_f64()).unwrap_or(0.0),
                    header,
                    active: ActiveServers::from_header(header, n_bin),
                })
            }
            _ => None,
        };

        let schema = FeatureSchema::from_layout(layout)?;
        let mut reservoirs = Vec::with_capacity(servers.len());
        if let Some(nodes) = tree.field(&roles.server_reservoirs) {
            let mut samples = Vec::new();
            for &server in servers {
                let Some(node) = nodes.get(server) else { continue };
                let bytes = region.read(node.range.clone())?;
                let mut fields = Vec::with_capacity(schema.server_reservoirs().len());
                for field in schema.server_reservoirs() {
                    read_samples(&bytes, field, &mut samples)?;
                    fields.push((field.name.clone(), samples.clone()));
                }
                reservoirs.push(ServerReservoirs { server, fields });
            }
        }

        Ok(Self {
            n_as,
            cache,
            reservoirs,
        })
    }
}

impl std::fmt::Display for RegionDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.n_as {
            Some(n) => writeln!(f, "n_as: {}", n)?,
            None => writeln!(f, "n_as: -")?,
        }
        if let Some(cache) = &self.cache {
            writeln!(
                f,
                "cache: id={:#010x} ts={:.3} header={:#018x} active={:?}",
                cache.sequence_id,
                cache.timestamp,
                cache.header,
                cache.active.to_vec()
            )?;
        }
        for server in &self.reservoirs {
            writeln!(f, "server {}:", server.server)?;
            for (name, samples) in &server.fields {
                let pairs: Vec<String> = samples.iter().map(|(t, v)| format!("({:.3}, {})", t, v)).collect();
                writeln!(f, "  {}: {}", name, pairs.join(" "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDocument;
    use crate::testing::DataPlaneSim;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn dump_of_canonical_region() {
        let doc = SchemaDocument::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/shm_layout.json"))
            .unwrap();
        let layout = Layout::compile(&doc).unwrap();
        let dir = tempdir().unwrap();
        let mut sim = DataPlaneSim::create(&layout, dir.path().join("shm_vip_1")).unwrap();
        sim.set_reservoir(Some(1), "win", &[(0.5, 1460.0)]).unwrap();
        sim.publish_telemetry(3.25, &[(0, vec![("n_flow", 4.0)]), (1, vec![])])
            .unwrap();

        let tree = PointerTree::build(&layout);
        let dump = RegionDump::capture(&layout, &tree, sim.region(), &[0, 1]).unwrap();
        assert_eq!(dump.n_as, Some(64));
        let cache = dump.cache.clone().unwrap();
        assert_eq!(cache.sequence_id, 1);
        assert_eq!(cache.timestamp, 3.25);
        assert_eq!(cache.active.to_vec(), vec![0, 1]);
        assert_eq!(cache.header, 0b11 << 62);

        assert_eq!(dump.reservoirs.len(), 2);
        let (name, samples) = &dump.reservoirs[1].fields[2];
        assert_eq!(name, "win");
        assert_eq!(samples[0], (0.5, 1460.0));
        assert_eq!(samples.len(), 32);

        let text = dump.to_string();
        assert!(text.starts_with("n_as: 64\n"));
        assert!(text.contains("id=0x00000001"));
    }
}
