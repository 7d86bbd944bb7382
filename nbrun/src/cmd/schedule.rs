//! The `schedule` and `unschedule` subcommands.

use anyhow::Context;
use nbrun_common::prelude::*;
use nbrun_common::rules::delete_rule;
use nbrun_common::submit::{submit_scheduled, Trigger};
use serde_json::Value;
use structopt::StructOpt;

use super::run::{read_arg, RunOpts};

/// The `schedule` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The notebook to run: a local file or an s3:// object. Local files are
    /// uploaded once, now; every triggered run executes that snapshot.
    notebook: String,

    /// A name for the schedule.
    #[structopt(long = "name")]
    name: String,

    /// When to run, as an EventBridge schedule expression like "rate(1 day)"
    /// or "cron(0 8 * * ? *)".
    #[structopt(long = "at")]
    at: Option<String>,

    /// An event pattern to trigger on, inline JSON or `@file`.
    #[structopt(long = "event")]
    event: Option<String>,

    #[structopt(flatten)]
    run_opts: RunOpts,
}

/// Run the `schedule` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let event_pattern = opt
        .event
        .as_deref()
        .map(|arg| -> Result<String> {
            let raw = read_arg(arg)?;
            // Fail here rather than at fire time.
            serde_json::from_str::<Value>(&raw)
                .with_context(|| format!("error parsing event pattern {:?}", arg))
                .map_err(Error::Other)?;
            Ok(raw)
        })
        .transpose()?;
    let trigger = Trigger {
        schedule: opt.at.clone(),
        event_pattern,
    };

    let request = opt.run_opts.to_request(&opt.notebook)?;
    submit_scheduled(&opt.name, &trigger, &request)?;
    println!("Scheduled {} as {}", request.notebook, opt.name);
    Ok(())
}

/// The `unschedule` subcommand.
#[derive(Debug, StructOpt)]
pub struct UnscheduleOpt {
    /// The schedule to delete.
    name: String,
}

/// Run the `unschedule` subcommand.
pub fn run_unschedule(opt: &UnscheduleOpt) -> Result<()> {
    delete_rule(&opt.name)?;
    println!("Deleted schedule {}", opt.name);
    Ok(())
}
