//! Plan documents: model, parser and renderer.

pub mod parser;
pub mod render;
pub mod types;

pub use parser::parse_plan;
pub use render::render_plan;
pub use types::{
    AutoTask, CheckpointGate, CheckpointKind, CheckpointTask, ParsedPlan, PlanId, Task,
    TaskStatus, format_inline_list, leading_number, parse_inline_list,
};
