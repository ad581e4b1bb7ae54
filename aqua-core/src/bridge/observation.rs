//! Observations handed to consumers, and their optional JSON-lines log.

use crate::error::{AquaError, Result};
use crate::features::{ActiveServers, ServerFeatures};
use crate::ground_truth::GroundTruthSample;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One processed telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Sequence id of the telemetry frame.
    pub sequence_id: u32,
    /// Frame timestamp.
    pub timestamp: f64,
    /// Active server ids, ascending.
    pub active: ActiveServers,
    /// `[active × features]` matrix in `active` order.
    pub features: Vec<Vec<f64>>,
    /// Load-balancer feature row, outside deploy mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_features: Option<Vec<f64>>,
    /// Ground truth of the active servers, when the side channel is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<Vec<GroundTruthSample>>,
}

impl Observation {
    /// Attach ground truth to extracted features.
    pub fn new(features: ServerFeatures, ground_truth: Option<Vec<GroundTruthSample>>) -> Self {
        Self {
            sequence_id: features.sequence_id,
            timestamp: features.timestamp,
            active: features.active,
            features: features.features,
            lb_features: features.lb_features,
            ground_truth,
        }
    }
}

/// Appends one JSON document per line.
#[derive(Debug)]
pub struct ObservationLog {
    file: BufWriter<File>,
    path: PathBuf,
    records: u64,
}

impl ObservationLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
            records: 0,
        })
    }

    /// Append a record and flush it.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.file, record)
            .map_err(|e| AquaError::Serialization(format!("{}: {}", self.path.display(), e)))?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn records(&self) -> u64 {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn observation(sequence_id: u32) -> Observation {
        Observation {
            sequence_id,
            timestamp: 1.5,
            active: ActiveServers::from_ids([1], 4).unwrap(),
            features: vec![vec![1.0, 2.0]],
            lb_features: None,
            ground_truth: None,
        }
    }

    #[test]
    fn appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/obs.jsonl");
        let mut log = ObservationLog::open(&path).unwrap();
        log.append(&observation(1)).unwrap();
        log.append(&observation(2)).unwrap();
        assert_eq!(log.records(), 2);
        drop(log);

        // Reopening appends after the existing lines.
        let mut log = ObservationLog::open(&path).unwrap();
        log.append(&observation(3)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["sequence_id"], 3);
        assert_eq!(lines[0]["active"], serde_json::json!([1]));
        assert!(lines[0].get("ground_truth").is_none());
    }
}
