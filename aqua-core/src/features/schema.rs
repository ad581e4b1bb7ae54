//! Feature columns derived from the layout.

use super::reservoir::RES_FEATURE_SUFFIXES;
use crate::error::{AquaError, Result};
use crate::layout::{CompiledStruct, Layout, ScalarKind};

/// One counter column of the per-server stats struct.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterColumn {
    /// Field name.
    pub name: String,
    /// Scalar kind.
    pub kind: ScalarKind,
    /// Offset within the stats struct.
    pub offset: usize,
    /// Reported as a delta since the previous poll.
    pub cumulative: bool,
    /// Value assumed before the first poll.
    pub baseline: f64,
}

/// One reservoir of `(t, v)` pairs within a reservoir struct.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservoirField {
    /// Field name.
    pub name: String,
    /// Offset within the reservoir struct.
    pub offset: usize,
    /// Number of samples.
    pub count: usize,
    /// Size of one sample.
    pub elem_size: usize,
    /// Offset and kind of the timestamp within a sample.
    pub time: (usize, ScalarKind),
    /// Offset and kind of the value within a sample.
    pub value: (usize, ScalarKind),
}

/// Ordered feature columns: counters, then per-server reservoir statistics,
/// then (for the load-balancer vector) the LB reservoir statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    counters: Vec<CounterColumn>,
    server_reservoirs: Vec<ReservoirField>,
    lb_reservoirs: Vec<ReservoirField>,
}

impl FeatureSchema {
    /// Derive the columns from the layout's roles.
    ///
    /// Reservoir roles whose root field is absent contribute no columns.
    pub fn from_layout(layout: &Layout) -> Result<Self> {
        let roles = layout.roles();
        let frame = root_struct(layout, &roles.frames_out)?;
        let body = frame
            .field(&roles.body_field)
            .ok_or_else(|| role_error(&roles.body_field, format!("missing from '{}'", frame.name)))?;
        let stats = layout
            .struct_of(body)
            .ok_or_else(|| role_error(&roles.body_field, "must be a struct array"))?;

        let counters = stats
            .fields
            .iter()
            .filter(|f| !roles.is_excluded(&f.name))
            .map(|f| match (f.scalar(), f.count) {
                (Some(kind), 1) => Ok(CounterColumn {
                    name: f.name.clone(),
                    kind,
                    offset: f.offset,
                    cumulative: roles.is_cumulative(&f.name),
                    baseline: f.default_value,
                }),
                _ => Err(role_error(
                    &format!("{}.{}", stats.name, f.name),
                    "counters must be single scalars",
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        let server_reservoirs = match layout.root_field(&roles.server_reservoirs) {
            Some(_) => reservoir_fields(layout, root_struct(layout, &roles.server_reservoirs)?)?,
            None => Vec::new(),
        };
        let lb_reservoirs = match layout.root_field(&roles.lb_reservoir) {
            Some(_) => reservoir_fields(layout, root_struct(layout, &roles.lb_reservoir)?)?,
            None => Vec::new(),
        };

        Ok(Self {
            counters,
            server_reservoirs,
            lb_reservoirs,
        })
    }

    /// Counter columns.
    pub fn counters(&self) -> &[CounterColumn] {
        &self.counters
    }

    /// Reservoirs tracked per server.
    pub fn server_reservoirs(&self) -> &[ReservoirField] {
        &self.server_reservoirs
    }

    /// Reservoirs tracked for the load balancer itself.
    pub fn lb_reservoirs(&self) -> &[ReservoirField] {
        &self.lb_reservoirs
    }

    /// Number of per-server features.
    pub fn len(&self) -> usize {
        self.counters.len() + self.server_reservoirs.len() * RES_FEATURE_SUFFIXES.len()
    }

    /// Whether there are no per-server features.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-server feature names (`FEATURE_AS_ALL`).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counters.iter().map(|c| c.name.clone()).collect();
        names.extend(expand(&self.server_reservoirs));
        names
    }

    /// Load-balancer feature names (`FEATURE_LB_ALL`): the per-server names
    /// followed by the LB reservoir statistics.
    pub fn lb_names(&self) -> Vec<String> {
        let mut names = self.names();
        names.extend(expand(&self.lb_reservoirs));
        names
    }
}

fn expand(fields: &[ReservoirField]) -> impl Iterator<Item = String> + '_ {
    fields.iter().flat_map(|f| {
        RES_FEATURE_SUFFIXES
            .iter()
            .map(move |suffix| format!("{}_{}", f.name, suffix))
    })
}

fn root_struct<'a>(layout: &'a Layout, name: &str) -> Result<&'a CompiledStruct> {
    let field = layout
        .root_field(name)
        .ok_or_else(|| role_error(name, "not a root layout field"))?;
    layout
        .struct_of(field)
        .ok_or_else(|| role_error(name, "must be a struct"))
}

fn reservoir_fields(layout: &Layout, owner: &CompiledStruct) -> Result<Vec<ReservoirField>> {
    owner
        .fields
        .iter()
        .map(|f| {
            let pair = layout.struct_of(f).filter(|s| s.fields.len() == 2);
            let scalars = pair.and_then(|s| {
                let t = &s.fields[0];
                let v = &s.fields[1];
                match (t.scalar(), v.scalar(), t.count, v.count) {
                    (Some(tk), Some(vk), 1, 1) => Some(((t.offset, tk), (v.offset, vk))),
                    _ => None,
                }
            });
            let (time, value) = scalars.ok_or_else(|| {
                role_error(
                    &format!("{}.{}", owner.name, f.name),
                    "reservoir samples must be (time, value) scalar pairs",
                )
            })?;
            Ok(ReservoirField {
                name: f.name.clone(),
                offset: f.offset,
                count: f.count,
                elem_size: f.elem_size,
                time,
                value,
            })
        })
        .collect()
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
    use crate::schema::SchemaDocument;
    use std::path::Path;

    fn canonical() -> Layout {
        let doc = SchemaDocument::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/shm_layout.json"))
            .unwrap();
        Layout::compile(&doc).unwrap()
    }

    #[test]
    fn production_feature_order() {
        let schema = FeatureSchema::from_layout(&canonical()).unwrap();
        let names = schema.names();
        assert_eq!(
            &names[..9],
            &["n_flow_on", "n_flow", "n_fct", "n_packet", "n_norm_ack", "n_rtr", "n_dpk", "n_ooo", "n_cls"]
        );
        assert_eq!(names[9], "byte_f_avg");
        assert_eq!(names[13], "byte_f_90_decay");
        assert_eq!(names.last().unwrap(), "lat_synack_90_decay");
        assert_eq!(names.len(), 9 + 12 * 5);
        assert_eq!(schema.len(), names.len());

        let lb = schema.lb_names();
        assert_eq!(lb.len(), names.len() + 5);
        assert_eq!(lb.last().unwrap(), "iat_f_lb_90_decay");
    }

    #[test]
    fn gauges_are_not_cumulative() {
        let schema = FeatureSchema::from_layout(&canonical()).unwrap();
        let flow_on = &schema.counters()[0];
        assert_eq!(flow_on.name, "n_flow_on");
        assert!(!flow_on.cumulative);
        assert_eq!(flow_on.kind, ScalarKind::I32);
        assert_eq!(flow_on.offset, 4);
        assert!(schema.counters()[1..].iter().all(|c| c.cumulative));
    }

    #[test]
    fn reservoir_pairs_resolved() {
        let schema = FeatureSchema::from_layout(&canonical()).unwrap();
        let d_win = &schema.server_reservoirs()[3];
        assert_eq!(d_win.name, "d_win");
        assert_eq!(d_win.count, 32);
        assert_eq!(d_win.elem_size, 8);
        assert_eq!(d_win.offset, 3 * 32 * 8);
        assert_eq!(d_win.time, (0, ScalarKind::F32));
        assert_eq!(d_win.value, (4, ScalarKind::I32));
    }
}
