//! Interactive prompts for checkpoints and architectural decisions.
//!
//! The engine never answers these itself; the CLI asks the user here and feeds
//! the answer back through `resume_checkpoint` or `resolve_decision`.

use crate::deviation::{DecisionOption, DecisionPrompt};
use crate::orchestrator::CheckpointHalt;
use crate::plan::CheckpointKind;
use anyhow::Result;
use console::style;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use std::io::IsTerminal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointAnswer {
    Approve { result: Option<String> },
    Reject,
    /// Leave the plan halted; resume later with `phasekit resume`
    Later,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionAnswer {
    pub option: DecisionOption,
    pub note: Option<String>,
}

/// Prompts shown by `execute` and `resume`.
pub struct ApprovalGate {
    interactive: bool,
}

impl ApprovalGate {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    /// Interactive only when stdin and stdout are terminals.
    pub fn detect() -> Self {
        Self::new(std::io::stdin().is_terminal() && console::user_attended())
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn check_checkpoint(&self, halt: &CheckpointHalt) -> Result<CheckpointAnswer> {
        print_checkpoint(halt);
        if !self.interactive {
            return Ok(CheckpointAnswer::Later);
        }

        let items: &[&str] = match halt.kind {
            CheckpointKind::HumanAction => &["Done, continue", "Reject and stop the plan", "Decide later"],
            _ => &["Approve and continue", "Reject and stop the plan", "Decide later"],
        };
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Checkpoint {}", halt.id))
            .items(items)
            .default(0)
            .interact()?;

        match selection {
            0 => {
                let prompt = match halt.kind {
                    CheckpointKind::Decision => "Your decision",
                    _ => "Notes for the next task (optional)",
                };
                let result: String = Input::with_theme(&ColorfulTheme::default())
                    .with_prompt(prompt)
                    .allow_empty(halt.kind != CheckpointKind::Decision)
                    .interact_text()?;
                let result = result.trim();
                Ok(CheckpointAnswer::Approve {
                    result: (!result.is_empty()).then(|| result.to_string()),
                })
            }
            1 => Ok(CheckpointAnswer::Reject),
            _ => Ok(CheckpointAnswer::Later),
        }
    }

    /// `None` when not interactive; the decision stays pending.
    pub fn check_decision(&self, prompt: &DecisionPrompt) -> Result<Option<DecisionAnswer>> {
        print_decision(prompt);
        if !self.interactive {
            return Ok(None);
        }

        let labels: Vec<&str> = prompt.options.iter().map(DecisionOption::label).collect();
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How should execution continue?")
            .items(&labels)
            .default(0)
            .interact()?;
        let Some(&option) = prompt.options.get(selection) else {
            return Ok(None);
        };

        let note = if option == DecisionOption::Modify {
            let note: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Describe the modified approach")
                .interact_text()?;
            Some(note)
        } else {
            None
        };
        Ok(Some(DecisionAnswer { option, note }))
    }
}

pub fn print_checkpoint(halt: &CheckpointHalt) {
    println!();
    println!(
        "{} {} ({}, {})",
        style("⏸ Checkpoint").yellow().bold(),
        style(&halt.id).bold(),
        halt.kind.as_str(),
        halt.gate.as_str()
    );
    if !halt.what_built.is_empty() {
        println!("  {} {}", style("Built:").dim(), halt.what_built);
    }
    if !halt.how_to_verify.is_empty() {
        println!("  {}", style("How to verify:").dim());
        for line in halt.how_to_verify.lines() {
            println!("    {}", line.trim());
        }
    }
    if let Some(ref decision) = halt.decision {
        println!("  {} {}", style("Decision:").dim(), decision);
    }
    if let Some(ref options) = halt.options {
        println!("  {}", style("Options:").dim());
        for line in options.lines().filter(|l| !l.trim().is_empty()) {
            println!("    {}", line.trim());
        }
    }
    if !halt.resume_signal.is_empty() {
        println!("  {} {}", style("Resume:").dim(), halt.resume_signal);
    }
}

pub fn print_decision(prompt: &DecisionPrompt) {
    println!();
    println!(
        "{} task {}",
        style("⚠ Decision required").red().bold(),
        style(&prompt.task_id).bold()
    );
    println!("  {}", prompt.question);
    for option in &prompt.options {
        println!("  - {}", option.label());
    }
}
