//! Header command - render `shm.h` for the data plane.

use anyhow::{Context, Result};
use aqua_core::SchemaDocument;
use aqua_core::layout::CHeader;
use std::path::Path;

/// Run the header command.
pub async fn run(schema: &Path, output: Option<&Path>, defines: &[String]) -> Result<()> {
    let doc = SchemaDocument::load(schema)
        .with_context(|| format!("Failed to load schema: {}", schema.display()))?;
    let header = defines
        .iter()
        .fold(CHeader::new(&doc), |header, name| header.with_macro(name.as_str()))
        .render()
        .context("Failed to render header")?;

    match output {
        Some(path) => {
            std::fs::write(path, &header)
                .with_context(|| format!("Failed to write header: {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = header.len(), "Wrote header");
            println!("Wrote {}", path.display());
        }
        None => println!("{}", header),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("shm.h");
        let schema = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/shm_layout.json");

        run(&schema, Some(&out), &["LB_STATS".to_string()]).await.unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("#define LB_STATS\n"));
        assert!(text.contains("#define lb_foreach_msg_out \\"));
    }
}
