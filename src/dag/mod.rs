//! Dependency-aware task ordering.
//!
//! Execution is strictly sequential; the scheduler only decides the order and
//! whether each task's dependencies allow it to run.

mod scheduler;

pub use scheduler::{
    DependencyMode, Readiness, ScheduledTask, TaskSchedule, readiness, schedule,
};
