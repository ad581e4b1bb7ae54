//! Common test utilities for integration tests.

#![allow(dead_code)]

use aqua_core::bridge::BridgeConfig;
use aqua_core::layout::Layout;
use aqua_core::schema::SchemaDocument;
use aqua_core::testing::DataPlaneSim;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Size of the region described by [`small_schema`]; the layout tiles it
/// exactly.
pub const SMALL_SHM_SIZE: usize = 683;

/// Path of the production schema shipped with the workspace.
pub fn canonical_schema_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/shm_layout.json")
}

/// A four-server layout with the production field names and two-sample
/// reservoirs.
pub fn small_schema() -> Value {
    json!({
        "global": {
            "SHM_SIZE": SMALL_SHM_SIZE, "SHM_OFFSET": 2, "SHM_N_BIN": 4,
            "SHM_N_FRAME": 4, "SHM_FRAME_MASK": 3, "VIP_ID": 1, "SHM_UPT_DT": 0.02,
            "RESERVOIR_N_BIN": 2, "RES_DECAY": 0.5, "FILE_FMT": "/dev/shm/shm_vip_{}"
        },
        "map": {
            "ctype2pytype": {"u8": "B", "u32": "I", "int32_t": "i", "u64": "Q", "f32": "f"},
            "ctype2byte": {"u8": 1, "u32": 4, "int32_t": 4, "u64": 8, "f32": 4}
        },
        "vpp": {
            "struct": {
                "tv_pair_f": [["f32", "t", 1, "time", 0.0], ["f32", "v", 1, "value", 0.0]],
                "as_stat": [
                    ["u32", "as_index", 1, "AS index", 0],
                    ["int32_t", "n_flow_on", 1, "Established flows", 0],
                    ["u32", "n_flow", 1, "Accumulated flows", 0]
                ],
                "reservoir_lb": [["tv_pair_f", "iat_f_lb", "RESERVOIR_N_BIN", "", 0]],
                "reservoir_as": [["tv_pair_f", "lat", "RESERVOIR_N_BIN", "", 0]],
                "alias": [["f32", "odd", 1, "", 1.0], ["u32", "alias", 1, "", 0]],
                "msg_out": [
                    ["u32", "id", 1, "", 0],
                    ["f32", "ts", 1, "", 0.0],
                    ["u64", "b_header", 1, "", 0],
                    ["as_stat", "body", "SHM_N_BIN", "", 0]
                ],
                "msg_in": [
                    ["u32", "id", 1, "", 0],
                    ["f32", "ts", 1, "", 0.0],
                    ["f32", "score", "SHM_N_BIN", "", 1.0],
                    ["alias", "weights", "SHM_N_BIN", "", 0]
                ]
            }
        },
        "layout": [
            ["u8", "n_as", 1, "Number of maximum ASs", "SHM_N_BIN"],
            ["msg_out", "msg_out_cache", 1, "", 0],
            ["msg_out", "msg_out_frames", "SHM_N_FRAME", "", 0],
            ["reservoir_lb", "res_lb", 1, "", 0],
            ["reservoir_as", "res_as", "SHM_N_BIN", "", 0],
            ["msg_in", "msg_in_cache", 1, "", 0],
            ["msg_in", "msg_in_frames", "SHM_N_FRAME", "", 0]
        ]
    })
}

/// Compile an inline schema.
pub fn compile(schema: &Value) -> Layout {
    let doc: SchemaDocument = serde_json::from_value(schema.clone()).unwrap();
    Layout::compile(&doc).unwrap()
}

/// A temp directory holding a schema file and a region written by a
/// simulated data plane.
pub struct Fixture {
    pub dir: TempDir,
    pub schema_path: PathBuf,
    pub layout: Layout,
    pub sim: DataPlaneSim,
}

impl Fixture {
    /// Fixture over [`small_schema`].
    pub fn small() -> Self {
        Self::with_schema(&small_schema())
    }

    /// Fixture over an arbitrary schema.
    pub fn with_schema(schema: &Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("shm_layout.json");
        std::fs::write(&schema_path, serde_json::to_vec_pretty(schema).unwrap()).unwrap();
        let layout = compile(schema);
        let sim = DataPlaneSim::create(&layout, dir.path().join("shm_vip_1")).unwrap();
        Self {
            dir,
            schema_path,
            layout,
            sim,
        }
    }

    /// Bridge config pointing at this fixture's schema and region.
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig::from_schema(&self.schema_path)
            .with_region(self.sim.path())
            .with_poll_interval(Duration::from_millis(10))
    }
}
