//! Publish command - write one weight vector as the next control frame.

use anyhow::{Context, Result};
use aqua_core::{Bridge, BridgeConfig};
use std::path::Path;

/// Run the publish command.
pub async fn run(schema: &Path, region: Option<&Path>, weights: &[f64]) -> Result<()> {
    let mut config = BridgeConfig::from_schema(schema);
    if let Some(region) = region {
        config = config.with_region(region);
    }

    let mut bridge = Bridge::open(config)
        .await
        .context("Failed to attach to the shared region")?;
    let message = bridge
        .publish_weights(weights)
        .context("Failed to publish weights")?;

    println!("Published control frame {}", message.sequence_id);
    println!("  timestamp: {:.3}", message.timestamp);
    println!("  slot  weight      prob  alias");
    for (i, (weight, entry)) in message.weights.iter().zip(message.table.entries()).enumerate() {
        println!(
            "  {:>4}  {:>6.3}  {:>8.5}  {:>5}",
            i, weight, entry.probability, entry.alias
        );
    }
    Ok(())
}
