//! Plan document generation: the inverse of [`parse_plan`](super::parse_plan).

use super::types::{ParsedPlan, Task};
use std::fmt::Write;

/// Frontmatter keys rendered first, in this order; the rest follow alphabetically.
const LEADING_KEYS: &[&str] = &["phase", "plan", "type", "depends_on", "files_modified"];

/// Render a plan back into its document form.
///
/// `parse_plan(&render_plan(&plan))` yields a plan equal to `plan` for any plan
/// whose text fields are already trimmed.
pub fn render_plan(plan: &ParsedPlan) -> String {
    let mut out = String::new();

    if !plan.metadata.is_empty() {
        out.push_str("---\n");
        for key in LEADING_KEYS {
            if let Some(value) = plan.metadata.get(*key) {
                let _ = writeln!(out, "{}: {}", key, value);
            }
        }
        for (key, value) in &plan.metadata {
            if !LEADING_KEYS.contains(&key.as_str()) {
                let _ = writeln!(out, "{}: {}", key, value);
            }
        }
        out.push_str("---\n\n");
    }

    let _ = writeln!(out, "<objective>\n{}\n</objective>\n", plan.objective);

    if let Some(ref context) = plan.context {
        let _ = writeln!(out, "<context>\n{}\n</context>\n", context);
    }

    out.push_str("<tasks>\n");
    for task in &plan.tasks {
        render_task(&mut out, task);
    }
    out.push_str("</tasks>\n\n");

    out.push_str("<verification>\n");
    for item in &plan.verification {
        let _ = writeln!(out, "- [ ] {}", item);
    }
    out.push_str("</verification>\n\n");

    out.push_str("<success_criteria>\n");
    for item in &plan.success_criteria {
        let _ = writeln!(out, "- {}", item);
    }
    out.push_str("</success_criteria>\n");

    out
}

fn render_task(out: &mut String, task: &Task) {
    let depends = if task.depends_on().is_empty() {
        String::new()
    } else {
        format!(" depends_on=\"{}\"", task.depends_on().join(","))
    };

    match task {
        Task::Auto(t) => {
            let _ = writeln!(
                out,
                "  <task type=\"{}\" id=\"{}\"{}>",
                task.type_attr(),
                t.id,
                depends
            );
            let _ = writeln!(out, "    <name>{}</name>", t.name);
            let _ = writeln!(out, "    <files>{}</files>", t.files.join(", "));
            let _ = writeln!(out, "    <action>{}</action>", t.action);
            let _ = writeln!(out, "    <verify>{}</verify>", t.verify);
            let _ = writeln!(out, "    <done>{}</done>", t.done);
        }
        Task::Checkpoint(t) => {
            let _ = writeln!(
                out,
                "  <task type=\"{}\" id=\"{}\" gate=\"{}\"{}>",
                task.type_attr(),
                t.id,
                t.gate,
                depends
            );
            if let Some(ref decision) = t.decision {
                let _ = writeln!(out, "    <decision>{}</decision>", decision);
            }
            if let Some(ref options) = t.options {
                let _ = writeln!(out, "    <options>{}</options>", options);
            }
            let _ = writeln!(out, "    <what-built>{}</what-built>", t.what_built);
            let _ = writeln!(out, "    <how-to-verify>{}</how-to-verify>", t.how_to_verify);
            let _ = writeln!(out, "    <resume-signal>{}</resume-signal>", t.resume_signal);
        }
    }
    out.push_str("  </task>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::parse_plan;
    use crate::plan::types::{AutoTask, CheckpointGate, CheckpointKind, CheckpointTask};

    fn sample_plan() -> ParsedPlan {
        let mut plan = ParsedPlan {
            objective: "Ship the login flow".into(),
            tasks: vec![
                Task::Auto(
                    AutoTask::new("task-1", "Build login form")
                        .with_files(vec!["src/login.rs".into(), "src/form.rs".into()])
                        .with_action("Render email and password fields")
                        .with_verify("cargo test login")
                        .with_done("Form renders"),
                ),
                Task::Checkpoint(
                    CheckpointTask::new("task-2", CheckpointKind::HumanVerify)
                        .with_gate(CheckpointGate::Optional)
                        .with_what_built("Login form")
                        .with_how_to_verify("Open /login")
                        .with_resume_signal("approved"),
                ),
                Task::Auto(
                    AutoTask::new("task-3", "Test login errors")
                        .with_depends_on(vec!["task-1".into()]),
                ),
            ],
            verification: vec!["all tests pass".into()],
            success_criteria: vec!["users can log in".into()],
            ..Default::default()
        };
        plan.metadata.insert("phase".into(), "02-auth".into());
        plan.metadata.insert("plan".into(), "01".into());
        plan.metadata.insert("type".into(), "execute".into());
        plan.metadata.insert("depends_on".into(), "[]".into());
        plan
    }

    #[test]
    fn test_render_then_parse_is_identity() {
        let plan = sample_plan();
        let rendered = render_plan(&plan);
        let reparsed = parse_plan(&rendered).unwrap();
        assert_eq!(reparsed, plan);
    }

    #[test]
    fn test_render_frontmatter_key_order() {
        let rendered = render_plan(&sample_plan());
        let phase_pos = rendered.find("phase: 02-auth").unwrap();
        let plan_pos = rendered.find("plan: 01").unwrap();
        let type_pos = rendered.find("type: execute").unwrap();
        assert!(phase_pos < plan_pos && plan_pos < type_pos);
    }

    #[test]
    fn test_render_checkpoint_attributes() {
        let rendered = render_plan(&sample_plan());
        assert!(rendered.contains(
            r#"<task type="checkpoint:human-verify" id="task-2" gate="optional">"#
        ));
        assert!(rendered.contains(r#"<task type="auto" id="task-3" depends_on="task-1">"#));
    }
}
