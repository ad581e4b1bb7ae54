//! Prelude for convenient imports.
//!
//! ```ignore
//! use aqua_core::prelude::*;
//! ```

// Error handling
pub use crate::error::{AquaError, Result};

// Schema and layout
pub use crate::layout::{CHeader, CompiledField, CompiledStruct, Layout, LayoutCompiler, PackCode, ScalarKind, ScalarValue};
pub use crate::pointer::{FieldNode, PointerTree};
pub use crate::schema::{Constants, LayoutRoles, SchemaDocument};

// Region and rings
pub use crate::region::{ControlLock, SharedRegion};
pub use crate::ring::{ControlReader, ControlWriter, FrameRing, FrameSnapshot, TelemetryReader};

// Features and actions
pub use crate::alias::{ActionEncoder, ActionMessage, AliasEntry, AliasTable};
pub use crate::features::{ActiveServers, FeatureProcessor, FeatureSchema, ReservoirStats, ServerFeatures};

// Ground truth
pub use crate::ground_truth::{Endpoint, GroundTruthChannel, GroundTruthConfig, GroundTruthRecord, GroundTruthSample};

// Bridge
pub use crate::bridge::{Bridge, BridgeConfig, Observation, ObservationLog, RegionDump};
pub use crate::clock::{ClockProvider, MockClock, SystemClock};
