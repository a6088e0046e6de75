//! Dependency-aware parallel scheduling of task graphs.
//!
//! Each round computes the ready frontier, runs up to `max_parallel_agents`
//! of it concurrently and folds the outcomes back into the graph. Tasks that
//! can never become ready end `blocked`.

mod frontier;
mod scheduler;

pub use frontier::{cyclic_tasks, explain_blocked, find_duplicate, ready_frontier};
pub use scheduler::{Pipeline, PipelineResult};
