//! The `describe` subcommand.

use nbrun_common::prelude::*;
use nbrun_common::runs::describe_run;
use structopt::StructOpt;

use crate::description::render_description;

/// Template for human-readable `describe` output.
const DESCRIBE_TEMPLATE: &str = include_str!("describe.txt.hbs");

/// The `describe` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The run to describe.
    job_name: String,
}

/// Run the `describe` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let desc = describe_run(&opt.job_name)?;
    print!("{}", render_description(DESCRIBE_TEMPLATE, &desc)?);
    Ok(())
}
