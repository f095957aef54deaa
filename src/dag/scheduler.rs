//! Task ordering within a plan.
//!
//! Tasks run in document order, except that a task is never placed before a
//! task it depends on. Dependency cycles do not fail: the first task of the
//! cycle (in document order) is forced into place with its dependencies ignored.

use crate::plan::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// How many dependencies must complete before a task may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Every dependency completed
    #[default]
    All,
    /// At least one dependency completed
    Any,
}

impl DependencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyMode::All => "all",
            DependencyMode::Any => "any",
        }
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(DependencyMode::All),
            "any" => Ok(DependencyMode::Any),
            other => anyhow::bail!("Unknown dependency mode '{}': expected all or any", other),
        }
    }
}

/// One slot in the execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    /// Index into the plan's task list
    pub index: usize,
    pub id: String,
    /// Dependencies that name a real task in the plan
    pub deps: Vec<String>,
    /// Placed by the cycle fallback; dependencies are not enforced
    pub forced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSchedule {
    pub order: Vec<ScheduledTask>,
    pub warnings: Vec<String>,
}

impl TaskSchedule {
    /// Position of a task in the execution order.
    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.order.iter().position(|s| s.id == task_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Whether a scheduled task may run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Dependencies that did not complete
    Blocked(Vec<String>),
}

/// Compute the execution order for a plan's tasks.
pub fn schedule(tasks: &[Task]) -> TaskSchedule {
    let mut warnings = Vec::new();
    let known: HashSet<&str> = tasks.iter().map(Task::id).collect();

    let deps: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            let mut effective = Vec::new();
            for dep in task.depends_on() {
                if dep == task.id() {
                    warnings.push(format!("Task {} depends on itself; ignoring", task.id()));
                } else if !known.contains(dep.as_str()) {
                    warnings.push(format!(
                        "Task {} depends on unknown task {}; ignoring",
                        task.id(),
                        dep
                    ));
                } else if !effective.contains(dep) {
                    effective.push(dep.clone());
                }
            }
            effective
        })
        .collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(tasks.len());

    while order.len() < tasks.len() {
        let ready = (0..tasks.len()).find(|&i| {
            !placed.contains(tasks[i].id()) && deps[i].iter().all(|d| placed.contains(d.as_str()))
        });

        let (index, forced) = match ready {
            Some(i) => (i, false),
            None => {
                // Only cycles remain; fall back to document order
                let stuck: Vec<&str> = tasks
                    .iter()
                    .map(Task::id)
                    .filter(|id| !placed.contains(id))
                    .collect();
                let Some(first) = (0..tasks.len()).find(|&i| !placed.contains(tasks[i].id()))
                else {
                    break;
                };
                warnings.push(format!(
                    "Dependency cycle among {}; running {} in document order",
                    stuck.join(", "),
                    tasks[first].id()
                ));
                (first, true)
            }
        };

        placed.insert(tasks[index].id());
        order.push(ScheduledTask {
            index,
            id: tasks[index].id().to_string(),
            deps: deps[index].clone(),
            forced,
        });
    }

    TaskSchedule { order, warnings }
}

/// Decide whether a task may run given the current status of its dependencies.
pub fn readiness<F>(task: &ScheduledTask, mode: DependencyMode, status_of: F) -> Readiness
where
    F: Fn(&str) -> Option<TaskStatus>,
{
    if task.forced || task.deps.is_empty() {
        return Readiness::Ready;
    }

    let unmet: Vec<String> = task
        .deps
        .iter()
        .filter(|d| status_of(d.as_str()) != Some(TaskStatus::Completed))
        .cloned()
        .collect();

    let ready = match mode {
        DependencyMode::All => unmet.is_empty(),
        DependencyMode::Any => unmet.len() < task.deps.len(),
    };

    if ready {
        Readiness::Ready
    } else {
        Readiness::Blocked(unmet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{AutoTask, CheckpointKind, CheckpointTask};
    use std::collections::HashMap;

    fn auto(id: &str, deps: &[&str]) -> Task {
        Task::Auto(
            AutoTask::new(id, id).with_depends_on(deps.iter().map(|d| d.to_string()).collect()),
        )
    }

    #[test]
    fn test_document_order_without_dependencies() {
        let tasks = vec![
            auto("task-1", &[]),
            Task::Checkpoint(CheckpointTask::new("task-2", CheckpointKind::HumanVerify)),
            auto("task-3", &[]),
        ];
        let schedule = schedule(&tasks);
        assert_eq!(schedule.ids(), vec!["task-1", "task-2", "task-3"]);
        assert!(schedule.warnings.is_empty());
        assert!(schedule.order.iter().all(|s| !s.forced));
    }

    #[test]
    fn test_forward_dependency_moves_task_later() {
        let tasks = vec![
            auto("a", &["c"]),
            auto("b", &[]),
            auto("c", &[]),
        ];
        let schedule = schedule(&tasks);
        assert_eq!(schedule.ids(), vec!["b", "c", "a"]);
        assert_eq!(schedule.position("a"), Some(2));
    }

    #[test]
    fn test_unknown_and_self_dependencies_are_ignored() {
        let tasks = vec![auto("a", &["ghost", "a"]), auto("b", &["a"])];
        let schedule = schedule(&tasks);
        assert_eq!(schedule.ids(), vec!["a", "b"]);
        assert_eq!(schedule.warnings.len(), 2);
        assert!(schedule.order[0].deps.is_empty());
    }

    #[test]
    fn test_cycle_falls_back_to_document_order() {
        let tasks = vec![
            auto("a", &["b"]),
            auto("b", &["a"]),
            auto("c", &[]),
        ];
        let schedule = schedule(&tasks);
        assert_eq!(schedule.ids(), vec!["c", "a", "b"]);
        assert!(schedule.order[1].forced);
        assert!(!schedule.order[2].forced);
        assert!(schedule.warnings[0].contains("cycle"));
    }

    #[test]
    fn test_readiness_all_and_any() {
        let task = ScheduledTask {
            index: 2,
            id: "c".into(),
            deps: vec!["a".into(), "b".into()],
            forced: false,
        };
        let statuses: HashMap<&str, TaskStatus> =
            [("a", TaskStatus::Completed), ("b", TaskStatus::Failed)].into();
        let lookup = |id: &str| statuses.get(id).copied();

        assert_eq!(
            readiness(&task, DependencyMode::All, lookup),
            Readiness::Blocked(vec!["b".into()])
        );
        assert_eq!(readiness(&task, DependencyMode::Any, lookup), Readiness::Ready);

        let nothing = |_: &str| None;
        assert_eq!(
            readiness(&task, DependencyMode::Any, nothing),
            Readiness::Blocked(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_forced_task_is_always_ready() {
        let task = ScheduledTask {
            index: 0,
            id: "a".into(),
            deps: vec!["b".into()],
            forced: true,
        };
        assert_eq!(
            readiness(&task, DependencyMode::All, |_| None),
            Readiness::Ready
        );
    }

    #[test]
    fn test_dependency_mode_parse() {
        assert_eq!("ANY".parse::<DependencyMode>().unwrap(), DependencyMode::Any);
        assert!("some".parse::<DependencyMode>().is_err());
    }
}
