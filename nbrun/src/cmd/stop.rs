//! The `stop-run` subcommand.

use nbrun_common::prelude::*;
use nbrun_common::runs::stop_run;
use structopt::StructOpt;

/// The `stop-run` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The run to stop.
    job_name: String,
}

/// Run the `stop-run` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    stop_run(&opt.job_name)?;
    println!("Stopping {}", opt.job_name);
    Ok(())
}
