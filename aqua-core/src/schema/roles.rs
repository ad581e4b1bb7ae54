//! Mapping from bridge roles to layout field names.

use serde::{Deserialize, Serialize};

/// Names the layout fields the bridge reads and writes.
///
/// Every key is optional in the schema file; the defaults match the
/// production data-plane layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutRoles {
    /// Root field holding the telemetry ring.
    pub frames_out: String,
    /// Root field holding the control ring.
    pub frames_in: String,
    /// Root field holding the data plane's latest telemetry cache.
    pub cache_out: String,
    /// Root field holding one reservoir struct per server.
    pub server_reservoirs: String,
    /// Root field holding the load balancer's own reservoir struct.
    pub lb_reservoir: String,
    /// Sequence id field inside a frame.
    pub id_field: String,
    /// Timestamp field inside a frame.
    pub ts_field: String,
    /// Active-server bitmap inside a telemetry frame.
    pub header_field: String,
    /// Per-server counter array inside a telemetry frame.
    pub body_field: String,
    /// Raw weight array inside a control frame.
    pub score_field: String,
    /// Alias table inside a control frame.
    pub alias_field: String,
    /// Counter struct fields that are not features.
    pub counter_exclude: Vec<String>,
    /// Counter fields reported as-is rather than as deltas.
    pub gauges: Vec<String>,
}

impl Default for LayoutRoles {
    fn default() -> Self {
        Self {
            frames_out: "msg_out_frames".to_string(),
            frames_in: "msg_in_frames".to_string(),
            cache_out: "msg_out_cache".to_string(),
            server_reservoirs: "res_as".to_string(),
            lb_reservoir: "res_lb".to_string(),
            id_field: "id".to_string(),
            ts_field: "ts".to_string(),
            header_field: "b_header".to_string(),
            body_field: "body".to_string(),
            score_field: "score".to_string(),
            alias_field: "weights".to_string(),
            counter_exclude: vec!["as_index".to_string()],
            gauges: vec!["n_flow_on".to_string()],
        }
    }
}

impl LayoutRoles {
    /// Whether a counter column is cumulative (reported as a delta).
    pub fn is_cumulative(&self, name: &str) -> bool {
        !self.gauges.iter().any(|g| g == name)
    }

    /// Whether a counter struct field is excluded from the feature vector.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.counter_exclude.iter().any(|e| e == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_roles_keep_defaults() {
        let roles: LayoutRoles =
            serde_json::from_str(r#"{"frames_out": "telemetry", "gauges": []}"#).unwrap();
        assert_eq!(roles.frames_out, "telemetry");
        assert_eq!(roles.frames_in, "msg_in_frames");
        assert!(roles.is_cumulative("n_flow_on"));
        assert!(roles.is_excluded("as_index"));
    }
}
