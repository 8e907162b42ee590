//! Cascading create, update, and delete.

mod context;
mod engine;
mod plan;

pub use engine::{CascadeEngine, CascadeOptions, CreateSpec};
pub use plan::{DeletePlan, NullifyStep};
