//! Ground-truth check command - probe every server's side-channel port.

use anyhow::{Result, bail};
use aqua_core::ground_truth::{GroundTruthConfig, check_endpoints};
use std::time::Duration;

/// Run the gt-check command.
pub async fn run(servers: usize, prefix: &str, port: u16, timeout_ms: u64) -> Result<()> {
    let config = GroundTruthConfig::reversed_hosts(prefix, port, servers)
        .with_timeout(Some(Duration::from_millis(timeout_ms)));

    let failed = check_endpoints(&config).await;
    for endpoint in &config.endpoints {
        let status = if failed.contains(&endpoint.server_id) { "FAILED" } else { "ok" };
        println!("  server {:>3}  {:<21}  {}", endpoint.server_id, endpoint.addr, status);
    }

    if !failed.is_empty() {
        bail!("{} of {} ground-truth endpoints unreachable: {:?}", failed.len(), servers, failed);
    }
    println!("All {} ground-truth endpoints reachable", servers);
    Ok(())
}
