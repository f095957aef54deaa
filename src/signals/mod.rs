//! Structured signals in task runner output.
//!
//! The runner reports deviations, verification results and touched files
//! through tags in its output; the engine never reads free text.

mod parser;
mod types;

pub use parser::{SignalParser, extract_signals};
pub use types::{BlockerSignal, TaskSignals};
