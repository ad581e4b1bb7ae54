//! Bridge configuration.

use crate::error::{AquaError, Result};
use crate::ground_truth::GroundTruthConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema location used when nothing else is configured.
pub const DEFAULT_SCHEMA_PATH: &str = "config/shm_layout.json";

/// Everything needed to attach a [`Bridge`](super::Bridge) to a region.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Schema file.
    pub schema_path: PathBuf,
    /// Region file. Defaults to `FILE_FMT` formatted with `VIP_ID`.
    pub region_path: Option<PathBuf>,
    /// Poll loop period. Defaults to `SHM_UPT_DT`.
    pub poll_interval: Option<Duration>,
    /// Skip the load-balancer feature row.
    pub deploy: bool,
    /// Ground-truth side channel, if enabled.
    pub ground_truth: Option<GroundTruthConfig>,
    /// JSON-lines observation log, if enabled.
    pub record_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            region_path: None,
            poll_interval: None,
            deploy: true,
            ground_truth: None,
            record_path: None,
        }
    }
}

impl BridgeConfig {
    /// Configuration reading the layout from `path`.
    pub fn from_schema(path: impl AsRef<Path>) -> Self {
        Self {
            schema_path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Apply environment overrides to the defaults.
    ///
    /// Environment variables:
    /// - `AQUA_SCHEMA`: schema file
    /// - `AQUA_REGION`: region file
    /// - `AQUA_POLL_INTERVAL_MS`: poll loop period
    /// - `AQUA_GT_TIMEOUT_MS`: ground-truth request timeout (only applies when
    ///   the side channel is configured)
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply the `AQUA_*` environment overrides to this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(path) = env::var("AQUA_SCHEMA") {
            self.schema_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("AQUA_REGION") {
            self.region_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_millis("AQUA_POLL_INTERVAL_MS")? {
            self.poll_interval = Some(ms);
        }
        if let (Some(ms), Some(gt)) = (env_millis("AQUA_GT_TIMEOUT_MS")?, self.ground_truth.as_mut()) {
            gt.timeout = Some(ms);
        }
        Ok(self)
    }

    /// Set the region file.
    pub fn with_region(mut self, path: impl AsRef<Path>) -> Self {
        self.region_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the poll loop period.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Enable or disable deploy mode.
    pub fn with_deploy(mut self, deploy: bool) -> Self {
        self.deploy = deploy;
        self
    }

    /// Enable the ground-truth side channel.
    pub fn with_ground_truth(mut self, config: GroundTruthConfig) -> Self {
        self.ground_truth = Some(config);
        self
    }

    /// Log every observation to `path`.
    pub fn with_record(mut self, path: impl AsRef<Path>) -> Self {
        self.record_path = Some(path.as_ref().to_path_buf());
        self
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| AquaError::Configuration(format!("{}={:?}: {}", name, value, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground_truth::Endpoint;

    #[test]
    fn builder_overrides_defaults() {
        let config = BridgeConfig::from_schema("/etc/aqua/layout.json")
            .with_region("/tmp/shm_vip_7")
            .with_poll_interval(Duration::from_millis(50))
            .with_deploy(false)
            .with_record("/tmp/obs.jsonl");
        assert_eq!(config.schema_path, PathBuf::from("/etc/aqua/layout.json"));
        assert_eq!(config.region_path, Some(PathBuf::from("/tmp/shm_vip_7")));
        assert_eq!(config.poll_interval, Some(Duration::from_millis(50)));
        assert!(!config.deploy);
        assert!(config.ground_truth.is_none());
    }

    #[test]
    fn env_overrides() {
        // SAFETY: no other test in this crate reads these variables.
        unsafe {
            env::set_var("AQUA_REGION", "/dev/shm/shm_vip_3");
            env::set_var("AQUA_POLL_INTERVAL_MS", "125");
            env::set_var("AQUA_GT_TIMEOUT_MS", "900");
        }
        let config = BridgeConfig::default()
            .with_ground_truth(GroundTruthConfig::new(vec![Endpoint::new(1, "127.0.0.1:1")]))
            .with_env_overrides()
            .unwrap();
        assert_eq!(config.region_path, Some(PathBuf::from("/dev/shm/shm_vip_3")));
        assert_eq!(config.poll_interval, Some(Duration::from_millis(125)));
        assert_eq!(
            config.ground_truth.unwrap().timeout,
            Some(Duration::from_millis(900))
        );

        unsafe { env::set_var("AQUA_POLL_INTERVAL_MS", "soon") };
        assert!(matches!(BridgeConfig::from_env(), Err(AquaError::Configuration(_))));

        unsafe {
            env::remove_var("AQUA_REGION");
            env::remove_var("AQUA_POLL_INTERVAL_MS");
            env::remove_var("AQUA_GT_TIMEOUT_MS");
        }
    }
}
