//! The `list-rules` subcommand.

use nbrun_common::prelude::*;
use nbrun_common::rules::{list_rules, RuleDescription};
use prettytable::{format::consts::FORMAT_CLEAN, row, Table};
use structopt::StructOpt;

/// The `list-rules` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// Only show schedules whose names start with this prefix.
    #[structopt(long = "prefix")]
    prefix: Option<String>,

    /// Only show schedules running this notebook.
    #[structopt(long = "notebook")]
    notebook: Option<String>,

    /// Show at most this many schedules. 0 shows everything.
    #[structopt(long = "max", default_value = "30")]
    max: usize,
}

/// A short display form of a rule's trigger condition.
fn trigger_summary(rule: &RuleDescription) -> String {
    match (&rule.schedule, &rule.event_pattern) {
        (Some(schedule), Some(_)) => format!("{} + events", schedule),
        (Some(schedule), None) => schedule.clone(),
        (None, Some(_)) => "event pattern".to_owned(),
        (None, None) => String::new(),
    }
}

/// Run the `list-rules` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let rules = list_rules(opt.prefix.as_deref(), opt.notebook.as_deref(), opt.max)?;

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row!["NAME", "NOTEBOOK", "TRIGGER", "STATE", "PARAMETERS"]);
    for rule in &rules {
        table.add_row(row![
            rule.name,
            rule.notebook,
            trigger_summary(rule),
            rule.state,
            rule.parameters,
        ]);
    }
    table.printstd();
    Ok(())
}
