//! Inspect command - show the compiled layout and, optionally, what a live
//! region currently holds.

use anyhow::{Context, Result};
use aqua_core::bridge::RegionDump;
use aqua_core::features::FeatureSchema;
use aqua_core::{Layout, PointerTree, SchemaDocument, SharedRegion};
use std::path::Path;

/// Run the inspect command.
pub async fn run(schema: &Path, region: Option<&Path>, servers: &[usize], json: bool) -> Result<()> {
    tracing::info!(schema = %schema.display(), "Inspecting layout");

    let doc = SchemaDocument::load(schema)
        .with_context(|| format!("Failed to load schema: {}", schema.display()))?;
    let layout = Layout::compile(&doc).context("Failed to compile layout")?;
    let tree = PointerTree::build(&layout);
    let features = FeatureSchema::from_layout(&layout).context("Layout has no usable feature fields")?;

    let dump = match region {
        Some(path) => {
            // Read-only inspection: no control lock, no ring readers.
            let region = SharedRegion::open(path, layout.constants().shm_size)
                .with_context(|| format!("Failed to open region: {}", path.display()))?;
            Some(RegionDump::capture(&layout, &tree, &region, servers)?)
        }
        None => None,
    };

    if json {
        let constants = layout.constants();
        let report = serde_json::json!({
            "constants": {
                "shm_size": constants.shm_size,
                "shm_offset": constants.shm_offset,
                "n_bin": constants.n_bin,
                "n_frame": constants.n_frame,
                "reservoir_n_bin": constants.reservoir_n_bin,
                "res_decay": constants.res_decay,
                "update_interval_ms": constants.update_interval.as_millis() as u64,
                "region_path": constants.region_path(),
            },
            "used_bytes": layout.end_offset(),
            "exact": layout.is_exact(),
            "fields": tree.summary(),
            "features": features.names(),
            "lb_features": features.lb_names(),
            "region": dump,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let constants = layout.constants();
    println!("Layout");
    println!("======");
    println!("Schema:         {}", schema.display());
    println!("Region:         {}", constants.region_path().display());
    println!("SHM_SIZE:       {} bytes", constants.shm_size);
    println!(
        "Used:           {}..{} ({} bytes{})",
        layout.base_offset(),
        layout.end_offset(),
        layout.total_size(),
        if layout.is_exact() { ", exact" } else { "" }
    );
    println!("Servers:        {}", constants.n_bin);
    println!("Frames:         {}", constants.n_frame);
    println!("Reservoir:      {} samples, decay {}", constants.reservoir_n_bin, constants.res_decay);
    println!("Poll period:    {:?}", constants.update_interval);
    println!();

    println!("Root Fields");
    println!("===========");
    for field in tree.summary() {
        let first = field.ranges.first().map(|r| r[0]).unwrap_or(0);
        println!(
            "  {:<16} x{:<4} {:>7} bytes each @ {:<8} pack {}",
            field.name,
            field.count,
            field.elem_size,
            first,
            abbreviate(&field.pack)
        );
    }
    println!();

    println!("Features ({})", features.len());
    println!("========");
    println!("  {}", features.names().join(", "));
    if !features.lb_reservoirs().is_empty() {
        println!("  load balancer adds: {}", features.lb_names()[features.len()..].join(", "));
    }

    if let Some(dump) = dump {
        println!();
        println!("Region Contents");
        println!("===============");
        print!("{}", dump);
    }
    Ok(())
}

/// Shorten long pack codes for the text view.
fn abbreviate(pack: &str) -> String {
    const MAX: usize = 24;
    if pack.len() <= MAX {
        pack.to_string()
    } else {
        format!("{}... ({} codes)", &pack[..MAX], pack.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_long_pack() {
        assert_eq!(abbreviate("IfQ"), "IfQ");
        let long = "I".repeat(40);
        assert_eq!(abbreviate(&long), format!("{}... (40 codes)", "I".repeat(24)));
    }

    #[tokio::test]
    async fn test_inspect_canonical_layout() {
        let schema = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/shm_layout.json");
        run(&schema, None, &[], true).await.unwrap();
        run(&schema, None, &[], false).await.unwrap();
    }
}
