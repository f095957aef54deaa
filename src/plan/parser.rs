//! Plan document parser.
//!
//! A plan is a hybrid document: a leading `---` frontmatter block of flat
//! `key: value` pairs, followed by tagged sections:
//!
//! ```text
//! ---
//! phase: 01-foundation
//! plan: 02
//! type: execute
//! depends_on: []
//! ---
//! <objective>...</objective>
//! <tasks>
//!   <task type="auto" id="task-1">
//!     <name>...</name><files>...</files><action>...</action><verify>...</verify><done>...</done>
//!   </task>
//!   <task type="checkpoint:human-verify" id="task-2" gate="blocking">
//!     <what-built>...</what-built><how-to-verify>...</how-to-verify><resume-signal>...</resume-signal>
//!   </task>
//! </tasks>
//! <verification>- [ ] item</verification>
//! <success_criteria>- item</success_criteria>
//! ```
//!
//! Task fields are always read from inside the task's own `<task>...</task>`
//! span so adjacent tasks never bleed into each other.

use super::types::{
    AutoTask, CheckpointGate, CheckpointKind, CheckpointTask, ParsedPlan, Task,
};
use crate::errors::PlanParseError;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static TASK_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<task\b([^>]*)>(.*?)</task>").unwrap());

static ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_][\w:-]*)\s*=\s*"([^"]*)""#).unwrap());

/// Parse a plan document into a [`ParsedPlan`].
///
/// Fails with [`PlanParseError::MissingTaskSection`] when no `<tasks>` block
/// exists; such a document must not be partially executed.
pub fn parse_plan(text: &str) -> Result<ParsedPlan, PlanParseError> {
    let (metadata, body) = split_frontmatter(text)?;

    let tasks_section =
        extract_tag(body, "tasks").ok_or(PlanParseError::MissingTaskSection)?;
    let tasks = parse_tasks(tasks_section)?;

    let objective = extract_tag(body, "objective")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let context = extract_tag(body, "context")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let verification = extract_tag(body, "verification")
        .map(parse_checklist)
        .unwrap_or_default();

    let success_criteria = extract_tag(body, "success_criteria")
        .or_else(|| extract_tag(body, "success-criteria"))
        .map(parse_checklist)
        .unwrap_or_default();

    Ok(ParsedPlan {
        metadata,
        objective,
        context,
        tasks,
        verification,
        success_criteria,
    })
}

/// Split the leading frontmatter block from the body.
///
/// Documents without frontmatter yield an empty map and the whole text as body.
fn split_frontmatter(text: &str) -> Result<(BTreeMap<String, String>, &str), PlanParseError> {
    let trimmed = text.trim_start();
    let Some(after_open) = trimmed.strip_prefix("---") else {
        return Ok((BTreeMap::new(), text));
    };

    let mut metadata = BTreeMap::new();
    let mut list_key: Option<String> = None;
    let mut list_items: Vec<String> = Vec::new();
    let mut offset = 0usize;

    // Skip the remainder of the opening line.
    let rest = match after_open.find('\n') {
        Some(pos) => &after_open[pos + 1..],
        None => return Err(PlanParseError::UnterminatedFrontmatter),
    };

    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let content = line.trim();

        if content == "---" {
            flush_list(&mut metadata, &mut list_key, &mut list_items);
            return Ok((metadata, &rest[offset..]));
        }
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        // YAML block list item belonging to the previous empty-valued key
        if let Some(item) = content.strip_prefix("- ")
            && list_key.is_some()
        {
            list_items.push(unquote(item.trim()).to_string());
            continue;
        }

        if let Some((key, value)) = content.split_once(':') {
            flush_list(&mut metadata, &mut list_key, &mut list_items);
            let key = key.trim().to_string();
            let value = unquote(value.trim()).to_string();
            if value.is_empty() {
                list_key = Some(key.clone());
            }
            metadata.insert(key, value);
        }
    }

    Err(PlanParseError::UnterminatedFrontmatter)
}

fn flush_list(
    metadata: &mut BTreeMap<String, String>,
    list_key: &mut Option<String>,
    items: &mut Vec<String>,
) {
    if let Some(key) = list_key.take()
        && !items.is_empty()
    {
        metadata.insert(key, format!("[{}]", items.join(", ")));
    }
    items.clear();
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

/// Content between the first `<tag>` and the following `</tag>`.
fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = text.find(&start_tag)?;
    let content_start = start + start_tag.len();
    let end = text[content_start..].find(&end_tag)?;

    Some(&text[content_start..content_start + end])
}

fn extract_field(body: &str, tag: &str) -> String {
    extract_tag(body, tag)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn parse_tasks(section: &str) -> Result<Vec<Task>, PlanParseError> {
    let mut tasks = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, cap) in TASK_BLOCK_REGEX.captures_iter(section).enumerate() {
        let attrs = parse_attributes(cap.get(1).map_or("", |m| m.as_str()));
        let body = cap.get(2).map_or("", |m| m.as_str());

        let id = attrs
            .get("id")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| format!("task-{}", index + 1));

        if !seen.insert(id.clone()) {
            return Err(PlanParseError::DuplicateTaskId { id });
        }

        let depends_on = attrs
            .get("depends_on")
            .or_else(|| attrs.get("depends-on"))
            .map(|v| split_list(v))
            .unwrap_or_default();

        let type_attr = attrs.get("type").map(String::as_str).unwrap_or("auto");

        let task = match type_attr.trim().strip_prefix("checkpoint") {
            Some(suffix) => {
                let kind = CheckpointKind::from_suffix(suffix.trim_start_matches(':'));
                let gate = match attrs.get("gate").map(|g| g.trim().to_lowercase()) {
                    Some(g) if g == "optional" => CheckpointGate::Optional,
                    _ => CheckpointGate::Blocking,
                };
                Task::Checkpoint(CheckpointTask {
                    id,
                    kind,
                    gate,
                    what_built: extract_field(body, "what-built"),
                    how_to_verify: extract_field(body, "how-to-verify"),
                    resume_signal: extract_field(body, "resume-signal"),
                    decision: extract_tag(body, "decision").map(|s| s.trim().to_string()),
                    options: extract_tag(body, "options").map(|s| s.trim().to_string()),
                    depends_on,
                })
            }
            // "auto" and anything unrecognised
            None => {
                let name = extract_field(body, "name");
                Task::Auto(AutoTask {
                    name: if name.is_empty() { id.clone() } else { name },
                    id,
                    files: extract_tag(body, "files").map(split_list).unwrap_or_default(),
                    action: extract_field(body, "action"),
                    verify: extract_field(body, "verify"),
                    done: extract_field(body, "done"),
                    depends_on,
                })
            }
        };

        tasks.push(task);
    }

    Ok(tasks)
}

fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    ATTR_REGEX
        .captures_iter(raw)
        .filter_map(|cap| Some((cap.get(1)?.as_str().to_string(), cap.get(2)?.as_str().to_string())))
        .collect()
}

/// Split a comma- or newline-separated list, dropping bullets and backticks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(|s| {
            s.trim()
                .trim_start_matches("- ")
                .trim_matches('`')
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse checklist-style lines (`- [ ] item`, `- item`, `* item`, `1. item`).
fn parse_checklist(section: &str) -> Vec<String> {
    section
        .lines()
        .map(strip_bullet)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    let mut s = line.trim();
    for prefix in ["- ", "* ", "-", "*"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
            break;
        }
    }
    for prefix in ["[ ]", "[x]", "[X]"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
            break;
        }
    }
    // Numbered list items: "1. item"
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0
        && let Some(rest) = s[digits..].strip_prefix(". ")
    {
        s = rest.trim_start();
    }
    s.trim()
}
