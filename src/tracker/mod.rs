pub mod git;

pub use git::{CommitInfo, GitOps, GitTracker};
