//! `phasekit classify`: show which deviation rule a description falls under.

use anyhow::Result;
use console::style;
use phasekit::deviation::{Deviation, DeviationAction, classify};

pub fn cmd_classify(description: &str, kind: &str, blocking: bool, json: bool) -> Result<()> {
    let mut deviation = Deviation::new(description, kind);
    if blocking {
        deviation = deviation.blocking();
    }
    let classification = classify(&deviation);

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    let action = match classification.action {
        DeviationAction::StopAskUser => style(classification.action.as_str()).red().bold(),
        DeviationAction::Defer => style(classification.action.as_str()).dim(),
        _ => style(classification.action.as_str()).green(),
    };
    println!("{}", style(classification.rule.to_string()).bold());
    println!("  action:  {}", action);
    println!("  trigger: {}", classification.trigger);
    if classification.requires_user_input {
        println!("  execution stops until a decision is made");
    }
    Ok(())
}
