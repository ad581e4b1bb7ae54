//! Aqua Core Library
//!
//! Control-process side of a shared-memory bridge between a load balancer's
//! data plane and a learning agent.
//!
//! # Overview
//!
//! The data plane and the control process share one file-backed region whose
//! byte layout is described by a declarative schema. The data plane publishes
//! telemetry frames into a ring; the control process reads the newest one,
//! derives per-server features and publishes server weights back as an alias
//! table in a second ring. Neither side takes a lock: each frame's sequence id
//! is written last and checked first.
//!
//! # Key Components
//!
//! - **Schema / Layout**: typed schema compiled into byte offsets and pack codes
//! - **Pointer tree**: absolute byte ranges for every field element
//! - **Rings**: lock-free frame readers and writers over the region
//! - **Features**: counter deltas and decayed reservoir statistics
//! - **Alias**: weight vectors encoded for O(1) sampling in the data plane
//! - **Ground truth**: per-server TCP side channel
//! - **Bridge**: the context object tying them together
//!
//! # Example
//!
//! ```ignore
//! use aqua_core::prelude::*;
//!
//! let config = BridgeConfig::from_schema("config/shm_layout.json");
//! let mut bridge = Bridge::open(config).await?;
//!
//! if let Some(obs) = bridge.latest_observation().await? {
//!     let weights = policy(&obs);
//!     bridge.publish_weights(&weights)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alias;
pub mod bridge;
pub mod clock;
pub mod error;
pub mod features;
pub mod ground_truth;
pub mod layout;
pub mod pointer;
pub mod prelude;
pub mod region;
pub mod ring;
pub mod schema;
pub mod testing;

// Re-export key types at crate root for convenience
pub use alias::{ActionEncoder, ActionMessage, AliasTable};
pub use bridge::{Bridge, BridgeConfig, Observation};
pub use error::{AquaError, Result};
pub use features::{ActiveServers, FeatureProcessor, FeatureSchema};
pub use layout::{Layout, LayoutCompiler};
pub use pointer::PointerTree;
pub use region::SharedRegion;
pub use schema::SchemaDocument;
