//! Signal parsing from task runner output.
//!
//! - `<deviation type="bug" blocks-progress="true">description</deviation>`
//! - `<blocker>description</blocker>`
//! - `<verification>passed</verification>` (or `failed`)
//! - `<files-modified>src/a.rs, src/b.rs</files-modified>`
//! - `<task-complete>task-1</task-complete>`

use super::types::{BlockerSignal, TaskSignals};
use crate::deviation::Deviation;
use regex::Regex;
use std::sync::LazyLock;

static DEVIATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<deviation\b([^>]*)>(.*?)</deviation>").unwrap());

static ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w-]+)\s*=\s*"([^"]*)""#).unwrap());

static BLOCKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<blocker>(.*?)</blocker>").unwrap());

static VERIFICATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<verification>\s*(.*?)\s*</verification>").unwrap());

static FILES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<files-modified>(.*?)</files-modified>").unwrap());

static COMPLETE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<task-complete>\s*([^<\s]+)\s*</task-complete>").unwrap());

/// Parser for extracting signals from task runner output.
pub struct SignalParser {
    /// Log every extracted signal at debug level
    verbose: bool,
}

impl SignalParser {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn parse(&self, text: &str) -> TaskSignals {
        let mut signals = TaskSignals::new();

        for cap in DEVIATION_REGEX.captures_iter(text) {
            let description = cap[2].trim();
            if description.is_empty() {
                continue;
            }
            let mut kind = String::new();
            let mut blocks = false;
            for attr in ATTR_REGEX.captures_iter(&cap[1]) {
                match &attr[1] {
                    "type" => kind = attr[2].trim().to_string(),
                    "blocks-progress" | "blocks_progress" | "blocking" => {
                        blocks = parse_bool(&attr[2]).unwrap_or(false)
                    }
                    _ => {}
                }
            }
            let mut deviation = Deviation::new(description, &kind);
            deviation.blocks_progress = blocks;
            if self.verbose {
                tracing::debug!(kind = %kind, blocks, "Signal: deviation \"{}\"", description);
            }
            signals.deviations.push(deviation);
        }

        for cap in BLOCKER_REGEX.captures_iter(text) {
            let description = cap[1].trim();
            if !description.is_empty() {
                if self.verbose {
                    tracing::debug!("Signal: blocker \"{}\"", description);
                }
                signals.blockers.push(BlockerSignal::new(description));
            }
        }

        for cap in VERIFICATION_REGEX.captures_iter(text) {
            match parse_bool(&cap[1]) {
                Some(passed) => {
                    if self.verbose {
                        tracing::debug!(passed, "Signal: verification");
                    }
                    signals.verification = Some(passed);
                }
                None => tracing::warn!("Ignoring unrecognised verification verdict '{}'", &cap[1]),
            }
        }

        for cap in FILES_REGEX.captures_iter(text) {
            for file in cap[1]
                .split([',', '\n'])
                .map(|f| f.trim().trim_start_matches("- ").trim())
                .filter(|f| !f.is_empty())
            {
                if !signals.files_modified.iter().any(|f| f == file) {
                    signals.files_modified.push(file.to_string());
                }
            }
        }

        for cap in COMPLETE_REGEX.captures_iter(text) {
            if self.verbose {
                tracing::debug!(task = &cap[1], "Signal: task complete");
            }
            signals.completed_tasks.push(cap[1].to_string());
        }

        signals
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "pass" | "passed" | "ok" => Some(true),
        "false" | "no" | "fail" | "failed" => Some(false),
        _ => None,
    }
}

/// Convenience function to extract signals without creating a parser.
pub fn extract_signals(text: &str) -> TaskSignals {
    SignalParser::new(false).parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_signals() {
        assert!(extract_signals("just some output").is_empty());
    }

    #[test]
    fn test_deviation_with_attributes() {
        let text = r#"
Working...
<deviation type="security" blocks-progress="false">SQL injection found in search</deviation>
<deviation type="architectural">
  Need to redesign the module
</deviation>
"#;
        let signals = extract_signals(text);
        assert_eq!(signals.deviations.len(), 2);
        assert_eq!(signals.deviations[0].kind, "security");
        assert_eq!(signals.deviations[0].description, "SQL injection found in search");
        assert_eq!(signals.deviations[1].description, "Need to redesign the module");
    }

    #[test]
    fn test_deviation_blocking_flag() {
        let signals = extract_signals(r#"<deviation blocks-progress="true">No DB</deviation>"#);
        assert!(signals.deviations[0].blocks_progress);
        assert_eq!(signals.deviations[0].kind, "");
    }

    #[test]
    fn test_empty_deviation_is_skipped() {
        assert!(extract_signals("<deviation type=\"bug\">  </deviation>").deviations.is_empty());
    }

    #[test]
    fn test_verification_last_verdict_wins() {
        let signals = extract_signals(
            "<verification>failed</verification> retry <verification>passed</verification>",
        );
        assert_eq!(signals.verification, Some(true));

        let signals = extract_signals("<verification>maybe</verification>");
        assert_eq!(signals.verification, None);
    }

    #[test]
    fn test_files_modified_list() {
        let signals = extract_signals(
            "<files-modified>\n- src/a.rs\n- src/b.rs\n</files-modified><files-modified>src/a.rs, src/c.rs</files-modified>",
        );
        assert_eq!(signals.files_modified, vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
    }

    #[test]
    fn test_task_complete_and_blocker() {
        let signals = extract_signals(
            "<blocker>Need API key</blocker>\n<task-complete>task-3</task-complete>",
        );
        assert!(signals.completes("task-3"));
        assert!(!signals.completes("task-1"));
        assert_eq!(signals.blockers[0].description, "Need API key");
    }
}
