//! Data model shared by the planner, workers and status readers.

mod certificate;
mod task;

pub use certificate::*;
pub use task::*;
