//! Stand-ins for the data plane and the ground-truth responders.
//!
//! Used by the test suites and by the CLI's local dry runs.

mod data_plane;
mod ground_truth;

pub use data_plane::{ControlFrame, DataPlaneSim};
pub use ground_truth::GroundTruthStub;
