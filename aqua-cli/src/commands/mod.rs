//! CLI command implementations.

pub mod gt_check;
pub mod header;
pub mod inspect;
pub mod publish;
pub mod run;
