pub mod config;
pub mod dag;
pub mod deviation;
pub mod errors;
pub mod gates;
pub mod init;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod plan;
pub mod settings;
pub mod signals;
pub mod tracker;

pub use errors::{EngineError, ErrorCode, PlanParseError, TaskExecutionError};
pub use orchestrator::{ExecuteOptions, ExecutionRecord, PlanExecutor, ResumeRequest};
