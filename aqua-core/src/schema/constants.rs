//! Typed view of the `global` section.

use super::document::NamedList;
use crate::error::{AquaError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Decay factor applied when `RES_DECAY` is absent.
pub const DEFAULT_RES_DECAY: f64 = 0.9;

/// Poll interval in seconds applied when `SHM_UPT_DT` is absent.
pub const DEFAULT_UPDATE_DT: f64 = 0.2;

/// Region path template applied when `FILE_FMT` is absent.
pub const DEFAULT_FILE_FMT: &str = "/dev/shm/shm_vip_{}";

/// Widest active-server bitmap the bridge supports.
pub const MAX_SERVERS: usize = 64;

/// Layout constants resolved from the schema, validated once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Constants {
    /// Total size of the shared region in bytes.
    pub shm_size: usize,
    /// Byte offset at which the root layout starts.
    pub shm_offset: usize,
    /// Slots per frame ring.
    pub n_frame: usize,
    /// `n_frame - 1`.
    pub frame_mask: u32,
    /// Maximum number of servers.
    pub n_bin: usize,
    /// Samples per reservoir.
    pub reservoir_n_bin: usize,
    /// Per-second decay factor for reservoir samples.
    pub res_decay: f64,
    /// Target interval between polls.
    pub update_interval: Duration,
    /// Virtual IP the region belongs to.
    pub vip_id: u64,
    /// Region path template (`{}` is replaced by `vip_id`).
    pub file_fmt: String,
}

impl Constants {
    /// Resolve and validate the constants the bridge depends on.
    pub fn from_globals(globals: &NamedList<serde_json::Value>) -> Result<Self> {
        let shm_size = required_usize(globals, "SHM_SIZE")?;
        let shm_offset = required_usize(globals, "SHM_OFFSET")?;
        let n_frame = required_usize(globals, "SHM_N_FRAME")?;
        let frame_mask = required_usize(globals, "SHM_FRAME_MASK")?;
        let n_bin = required_usize(globals, "SHM_N_BIN")?;
        let reservoir_n_bin = required_usize(globals, "RESERVOIR_N_BIN")?;
        let res_decay = optional_f64(globals, "RES_DECAY")?.unwrap_or(DEFAULT_RES_DECAY);
        let update_dt = optional_f64(globals, "SHM_UPT_DT")?.unwrap_or(DEFAULT_UPDATE_DT);
        let vip_id = match globals.get("VIP_ID") {
            Some(v) => v.as_u64().ok_or_else(|| invalid("VIP_ID", "expected an unsigned integer"))?,
            None => 1,
        };
        let file_fmt = match globals.get("FILE_FMT") {
            Some(v) => v
                .as_str()
                .ok_or_else(|| invalid("FILE_FMT", "expected a string"))?
                .to_string(),
            None => DEFAULT_FILE_FMT.to_string(),
        };

        if n_frame == 0 || !n_frame.is_power_of_two() {
            return Err(invalid("SHM_N_FRAME", format!("{} is not a power of two", n_frame)));
        }
        if frame_mask != n_frame - 1 {
            return Err(invalid(
                "SHM_FRAME_MASK",
                format!("expected {} for {} frames, got {}", n_frame - 1, n_frame, frame_mask),
            ));
        }
        if n_bin == 0 || n_bin > MAX_SERVERS {
            return Err(invalid(
                "SHM_N_BIN",
                format!("must be in 1..={}, got {}", MAX_SERVERS, n_bin),
            ));
        }
        if !(res_decay > 0.0 && res_decay < 1.0) {
            return Err(invalid("RES_DECAY", format!("must be in (0, 1), got {}", res_decay)));
        }
        if !(update_dt.is_finite() && update_dt >= 0.0) {
            return Err(invalid("SHM_UPT_DT", format!("must be non-negative, got {}", update_dt)));
        }
        if shm_offset > shm_size {
            return Err(invalid(
                "SHM_OFFSET",
                format!("{} exceeds SHM_SIZE {}", shm_offset, shm_size),
            ));
        }

        Ok(Self {
            shm_size,
            shm_offset,
            n_frame,
            frame_mask: frame_mask as u32,
            n_bin,
            reservoir_n_bin,
            res_decay,
            update_interval: Duration::from_secs_f64(update_dt),
            vip_id,
            file_fmt,
        })
    }

    /// Region path for this VIP, e.g. `/dev/shm/shm_vip_1`.
    pub fn region_path(&self) -> PathBuf {
        PathBuf::from(self.file_fmt.replacen("{}", &self.vip_id.to_string(), 1))
    }
}

/// Resolve a symbolic count against the globals.
pub(crate) fn resolve_symbol(globals: &NamedList<serde_json::Value>, symbol: &str) -> Option<i64> {
    globals.get(symbol).and_then(serde_json::Value::as_i64)
}

fn required_usize(globals: &NamedList<serde_json::Value>, name: &str) -> Result<usize> {
    let value = globals
        .get(name)
        .ok_or_else(|| invalid(name, "missing"))?;
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| invalid(name, format!("expected an unsigned integer, got {}", value)))
}

fn optional_f64(globals: &NamedList<serde_json::Value>, name: &str) -> Result<Option<f64>> {
    match globals.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(name, format!("expected a number, got {}", v))),
    }
}

fn invalid(name: &str, cause: impl Into<String>) -> AquaError {
    AquaError::InvalidConstant {
        name: name.to_string(),
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn globals(value: serde_json::Value) -> NamedList<serde_json::Value> {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "SHM_SIZE": 4096,
            "SHM_OFFSET": 42,
            "SHM_N_FRAME": 4,
            "SHM_FRAME_MASK": 3,
            "SHM_N_BIN": 8,
            "RESERVOIR_N_BIN": 4
        })
    }

    #[test]
    fn defaults_fill_optional_constants() {
        let c = Constants::from_globals(&globals(base())).unwrap();
        assert_eq!(c.res_decay, DEFAULT_RES_DECAY);
        assert_eq!(c.update_interval, Duration::from_millis(200));
        assert_eq!(c.region_path(), PathBuf::from("/dev/shm/shm_vip_1"));
    }

    #[test]
    fn frame_count_must_be_power_of_two() {
        let mut g = base();
        g["SHM_N_FRAME"] = json!(3);
        g["SHM_FRAME_MASK"] = json!(2);
        let err = Constants::from_globals(&globals(g)).unwrap_err();
        assert!(matches!(err, AquaError::InvalidConstant { ref name, .. } if name == "SHM_N_FRAME"));
    }

    #[test]
    fn mask_must_match_frame_count() {
        let mut g = base();
        g["SHM_FRAME_MASK"] = json!(7);
        assert!(Constants::from_globals(&globals(g)).is_err());
    }

    #[test]
    fn server_count_limited_to_bitmap_width() {
        let mut g = base();
        g["SHM_N_BIN"] = json!(65);
        assert!(Constants::from_globals(&globals(g)).is_err());
    }

    #[test]
    fn missing_constant_is_reported_by_name() {
        let mut g = base();
        g.as_object_mut().unwrap().remove("RESERVOIR_N_BIN");
        let err = Constants::from_globals(&globals(g)).unwrap_err();
        assert!(err.to_string().contains("RESERVOIR_N_BIN"));
    }

    #[test]
    fn custom_file_format() {
        let mut g = base();
        g["FILE_FMT"] = json!("/tmp/region_{}.bin");
        g["VIP_ID"] = json!(7);
        let c = Constants::from_globals(&globals(g)).unwrap();
        assert_eq!(c.region_path(), PathBuf::from("/tmp/region_7.bin"));
    }
}
