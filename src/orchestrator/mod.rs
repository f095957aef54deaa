pub mod engine;
pub mod record;
pub mod runner;
pub mod state;

pub use engine::{
    EngineSettings, ExecuteOptions, ExecutionJournal, PlanExecutor, ResumeRequest, RetryPolicy,
    plan_hash, validate_plan,
};
pub use record::{
    CheckpointHalt, Commit, CommitType, ExecutionRecord, PlanStatus, RecordError, Strategy,
    TaskResult,
};
pub use runner::{CommandTaskRunner, OutcomeStatus, TaskContext, TaskOutcome, TaskRunner};
pub use state::{StateEntry, StateLog};
