//! Periodic background tasks
//!
//! Each shard runs two of these: a commit loop and a refresh loop. They share
//! the same state machine (idle, running, stopped, terminated) but tick on
//! independent intervals.

mod task;

pub use task::{PeriodicTask, TaskState, TickOutcome};
