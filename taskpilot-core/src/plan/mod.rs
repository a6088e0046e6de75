//! Pure transition functions over [`Plan`](crate::models::Plan) values.
//!
//! Every operation takes the current plan by reference and returns a new
//! one, so callers can keep each intermediate state for audit or replay.

mod machine;

pub use machine::{
    is_complete, mark_complete, mark_failed, mark_running, mark_skipped, next_step, progress,
    revise, running_step, PlanProgress,
};
