//! The `list-runs` subcommand.

use nbrun_common::prelude::*;
use nbrun_common::runs::list_runs;
use prettytable::{format::consts::FORMAT_CLEAN, row, Table};
use structopt::StructOpt;

/// The `list-runs` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// Only show runs started by this schedule.
    #[structopt(long = "rule")]
    rule: Option<String>,

    /// Only show runs of this notebook.
    #[structopt(long = "notebook")]
    notebook: Option<String>,

    /// Show at most this many runs. 0 shows everything.
    #[structopt(long = "max", default_value = "30")]
    max: usize,
}

/// Run the `list-runs` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let runs = list_runs(opt.rule.as_deref(), opt.notebook.as_deref(), opt.max)?;

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row!["CREATED", "NOTEBOOK", "STATUS", "ELAPSED", "RULE", "JOB"]);
    for run in runs {
        table.add_row(row![
            run.created.format("%Y-%m-%d %H:%M"),
            run.notebook,
            run.status,
            run.elapsed.unwrap_or_default(),
            run.rule,
            run.job,
        ]);
    }
    table.printstd();
    Ok(())
}
