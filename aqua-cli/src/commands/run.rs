//! Run command - attach to the region and process telemetry until Ctrl-C.

use crate::GroundTruthArgs;
use anyhow::{Context, Result};
use aqua_core::ground_truth::GroundTruthConfig;
use aqua_core::{Bridge, BridgeConfig, Observation};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Options collected from the command line.
#[derive(Debug)]
pub struct RunOptions {
    /// Layout schema.
    pub schema: PathBuf,
    /// Region file override.
    pub region: Option<PathBuf>,
    /// Poll period override in milliseconds.
    pub poll_ms: Option<u64>,
    /// Compute the load balancer's feature row.
    pub lb_features: bool,
    /// Observation log.
    pub record: Option<PathBuf>,
    /// Print observations on stdout.
    pub echo: bool,
    /// Ground-truth side channel.
    pub ground_truth: GroundTruthArgs,
}

impl RunOptions {
    /// Resolve into a bridge configuration. Flags win over `AQUA_*`
    /// environment overrides.
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = BridgeConfig::from_schema(&self.schema).with_deploy(!self.lb_features);
        if let Some(n) = self.ground_truth.servers {
            config = config.with_ground_truth(GroundTruthConfig::reversed_hosts(
                &self.ground_truth.prefix,
                self.ground_truth.port,
                n,
            ));
        }
        let mut config = config
            .with_env_overrides()
            .context("Invalid AQUA_* environment override")?;

        if let Some(region) = &self.region {
            config = config.with_region(region);
        }
        if let Some(ms) = self.poll_ms {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(record) = &self.record {
            config = config.with_record(record);
        }
        if let (Some(ms), Some(gt)) = (self.ground_truth.timeout_ms, config.ground_truth.as_mut()) {
            gt.timeout = Some(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

/// Run the bridge loop.
pub async fn run(options: RunOptions) -> Result<()> {
    let config = options.bridge_config()?;
    tracing::info!(schema = %config.schema_path.display(), "Starting bridge");

    let mut bridge = Bridge::open(config)
        .await
        .context("Failed to attach to the shared region")?;
    println!("Attached to {}", bridge.region_path().display());
    println!("Features: {}", bridge.feature_names().join(", "));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C, stopping");
        }
    };

    let echo = options.echo;
    let mut stdout = std::io::stdout();
    let processed = bridge
        .run(shutdown, |observation| {
            if echo {
                emit(&mut stdout, observation);
            }
        })
        .await
        .context("Bridge loop failed")?;

    println!("Processed {} observations (last frame {})", processed, bridge.last_seen());
    Ok(())
}

fn emit(out: &mut impl Write, observation: &Observation) {
    match serde_json::to_string(observation) {
        Ok(line) => {
            if let Err(e) = writeln!(out, "{}", line) {
                tracing::warn!(error = %e, "Failed to print observation");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to serialize observation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            schema: PathBuf::from("layout.json"),
            region: Some(PathBuf::from("/tmp/shm_vip_3")),
            poll_ms: Some(5),
            lb_features: true,
            record: None,
            echo: false,
            ground_truth: GroundTruthArgs {
                servers: Some(3),
                prefix: "10.0.1.".to_string(),
                port: 50008,
                timeout_ms: Some(250),
            },
        }
    }

    #[test]
    fn test_flags_shape_bridge_config() {
        let config = options().bridge_config().unwrap();
        assert_eq!(config.region_path, Some(PathBuf::from("/tmp/shm_vip_3")));
        assert_eq!(config.poll_interval, Some(Duration::from_millis(5)));
        assert!(!config.deploy);

        let gt = config.ground_truth.unwrap();
        assert_eq!(gt.endpoints.len(), 3);
        assert_eq!(gt.endpoint(1).unwrap().addr, "10.0.1.3:50008");
        assert_eq!(gt.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_ground_truth_off_by_default() {
        let mut options = options();
        options.ground_truth.servers = None;
        options.lb_features = false;
        let config = options.bridge_config().unwrap();
        assert!(config.ground_truth.is_none());
        assert!(config.deploy);
    }
}
