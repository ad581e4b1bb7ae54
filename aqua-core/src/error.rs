//! Error types for the aqua bridge.
//!
//! Errors carry the identifiers needed to locate the problem (field name,
//! server id, sequence id, byte range). Codes are grouped by subsystem so
//! operator logs can be grepped by range.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for aqua operations.
pub type Result<T> = std::result::Result<T, AquaError>;

/// The main error type for aqua operations.
#[derive(Error, Debug)]
pub enum AquaError {
    // =========================================================================
    // Schema / Layout Errors (E001-E099)
    // =========================================================================
    /// The schema file could not be read or parsed.
    #[error("E001: Failed to load schema from {path}: {cause}")]
    SchemaLoad {
        /// Path of the schema file.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// A required global constant is missing or has the wrong type.
    #[error("E002: Global constant '{name}' is invalid: {cause}")]
    InvalidConstant {
        /// Name of the constant.
        name: String,
        /// What is wrong with it.
        cause: String,
    },

    /// A field references a type that is neither a scalar nor a struct.
    #[error("E003: Unknown type '{type_name}' for field '{field}'")]
    UnknownType {
        /// The unresolved type name.
        type_name: String,
        /// The field declaring it.
        field: String,
    },

    /// A symbolic element count could not be resolved.
    #[error("E004: Symbolic count '{symbol}' for field '{field}' not found in global constants")]
    UnresolvedCount {
        /// The symbol that was looked up.
        symbol: String,
        /// The field declaring it.
        field: String,
    },

    /// An element count is not a positive integer.
    #[error("E005: Count for field '{field}' must be a positive integer, got {value}")]
    InvalidCount {
        /// The field declaring the count.
        field: String,
        /// The offending value.
        value: String,
    },

    /// A scalar type mapping is inconsistent.
    #[error("E006: Scalar type '{ctype}' is invalid: {cause}")]
    InvalidScalar {
        /// The C type name from the map section.
        ctype: String,
        /// Reason.
        cause: String,
    },

    /// A struct definition references itself, directly or indirectly.
    #[error("E007: Recursive struct definition detected at '{name}'")]
    RecursiveStruct {
        /// The struct where the cycle closed.
        name: String,
    },

    /// The compiled layout does not fit in the configured region.
    #[error("E008: Layout needs {required} bytes at offset {offset}, region holds {available}")]
    LayoutOverflow {
        /// Bytes needed by the compiled layout.
        required: usize,
        /// SHM_OFFSET.
        offset: usize,
        /// SHM_SIZE.
        available: usize,
    },

    /// A field the bridge depends on is missing or has the wrong shape.
    #[error("E009: Layout field '{field}' is unusable: {cause}")]
    LayoutRole {
        /// The field path.
        field: String,
        /// What is wrong with it.
        cause: String,
    },

    // =========================================================================
    // Region Errors (E100-E149)
    // =========================================================================
    /// Failed to open or create the region file.
    #[error("E101: Failed to open shared region at {path}: {cause}")]
    RegionOpen {
        /// The region path.
        path: PathBuf,
        /// Reason.
        cause: String,
    },

    /// Failed to memory-map the region file.
    #[error("E102: Failed to mmap shared region at {path}: {cause}")]
    RegionMmap {
        /// The region path.
        path: PathBuf,
        /// Reason.
        cause: String,
    },

    /// The region file does not have the configured size.
    #[error("E103: Shared region at {path} is {actual} bytes, expected {expected}")]
    RegionSize {
        /// The region path.
        path: PathBuf,
        /// Configured SHM_SIZE.
        expected: u64,
        /// Actual file length.
        actual: u64,
    },

    /// An access falls outside the mapped region.
    #[error("E104: Access to bytes {start}..{end} is outside region of {size} bytes")]
    RegionBounds {
        /// Start of the requested range.
        start: usize,
        /// End of the requested range.
        end: usize,
        /// Region size.
        size: usize,
    },

    /// Another control process already owns the control frames.
    #[error("E105: Control frames of {path} are locked by another process: {cause}")]
    ControlLocked {
        /// The lock file path.
        path: PathBuf,
        /// Reason.
        cause: String,
    },

    // =========================================================================
    // Ring Errors (E150-E199)
    // =========================================================================
    /// The writer kept overwriting the slot being copied.
    #[error("E151: Frame {sequence_id} was overwritten during {attempts} consecutive reads")]
    FrameOverrun {
        /// The sequence id the reader was trying to copy.
        sequence_id: u32,
        /// Number of attempts made.
        attempts: u32,
    },

    // =========================================================================
    // Feature Errors (E200-E249)
    // =========================================================================
    /// A frame timestamp went backwards for a server.
    #[error("E201: Timestamp went backwards for server {server}: {previous} -> {current}")]
    NonMonotonicTimestamp {
        /// Server id.
        server: usize,
        /// Previously stored timestamp.
        previous: f64,
        /// Timestamp of the new frame.
        current: f64,
    },

    /// A server id is outside 0..SHM_N_BIN.
    #[error("E202: Server id {server} is out of range (max {max})")]
    ServerOutOfRange {
        /// Server id.
        server: usize,
        /// Number of server slots.
        max: usize,
    },

    // =========================================================================
    // Action Errors (E250-E299)
    // =========================================================================
    /// All weights are zero (or the vector is empty).
    #[error("E251: Cannot encode an alias table from all-zero weights")]
    DegenerateWeights,

    /// A weight is negative or not finite, or the vector has the wrong length.
    #[error("E252: Invalid weight vector: {cause}")]
    InvalidWeights {
        /// Reason.
        cause: String,
    },

    // =========================================================================
    // Ground Truth Errors (E300-E349)
    // =========================================================================
    /// Could not connect to a ground-truth endpoint.
    #[error("E301: Failed to connect to ground-truth server {server} at {addr}: {cause}")]
    GroundTruthConnect {
        /// Server id.
        server: usize,
        /// Endpoint address.
        addr: String,
        /// Reason.
        cause: String,
    },

    /// The request/response exchange failed.
    #[error("E302: Ground-truth exchange with server {server} failed: {cause}")]
    GroundTruthExchange {
        /// Server id.
        server: usize,
        /// Reason.
        cause: String,
    },

    /// The server did not answer within the configured timeout.
    #[error("E303: Ground-truth server {server} did not answer within {timeout:?}")]
    GroundTruthTimeout {
        /// Server id.
        server: usize,
        /// Configured timeout.
        timeout: Duration,
    },

    // =========================================================================
    // Generic Errors (E900-E999)
    // =========================================================================
    /// IO error.
    #[error("E901: IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("E902: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("E903: Configuration error: {0}")]
    Configuration(String),
}

impl AquaError {
    /// Whether the error indicates a broken contract that must stop the process.
    ///
    /// Ground-truth and IO failures are transient from the bridge's point of
    /// view; callers may retry the whole poll.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AquaError::SchemaLoad { .. }
                | AquaError::InvalidConstant { .. }
                | AquaError::UnknownType { .. }
                | AquaError::UnresolvedCount { .. }
                | AquaError::InvalidCount { .. }
                | AquaError::InvalidScalar { .. }
                | AquaError::RecursiveStruct { .. }
                | AquaError::LayoutOverflow { .. }
                | AquaError::LayoutRole { .. }
                | AquaError::RegionSize { .. }
                | AquaError::NonMonotonicTimestamp { .. }
        )
    }

    /// The numeric code prefix, e.g. `"E201"`.
    pub fn code(&self) -> &'static str {
        match self {
            AquaError::SchemaLoad { .. } => "E001",
            AquaError::InvalidConstant { .. } => "E002",
            AquaError::UnknownType { .. } => "E003",
            AquaError::UnresolvedCount { .. } => "E004",
            AquaError::InvalidCount { .. } => "E005",
            AquaError::InvalidScalar { .. } => "E006",
            AquaError::RecursiveStruct { .. } => "E007",
            AquaError::LayoutOverflow { .. } => "E008",
            AquaError::LayoutRole { .. } => "E009",
            AquaError::RegionOpen { .. } => "E101",
            AquaError::RegionMmap { .. } => "E102",
            AquaError::RegionSize { .. } => "E103",
            AquaError::RegionBounds { .. } => "E104",
            AquaError::ControlLocked { .. } => "E105",
            AquaError::FrameOverrun { .. } => "E151",
            AquaError::NonMonotonicTimestamp { .. } => "E201",
            AquaError::ServerOutOfRange { .. } => "E202",
            AquaError::DegenerateWeights => "E251",
            AquaError::InvalidWeights { .. } => "E252",
            AquaError::GroundTruthConnect { .. } => "E301",
            AquaError::GroundTruthExchange { .. } => "E302",
            AquaError::GroundTruthTimeout { .. } => "E303",
            AquaError::Io(_) => "E901",
            AquaError::Serialization(_) => "E902",
            AquaError::Configuration(_) => "E903",
        }
    }
}

impl From<serde_json::Error> for AquaError {
    fn from(err: serde_json::Error) -> Self {
        AquaError::Serialization(err.to_string())
    }
}
