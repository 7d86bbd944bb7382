//! A tool for running Jupyter notebooks as SageMaker Processing jobs.

use std::process;

use nbrun_common::errors::DisplayCausesExt;
use nbrun_common::prelude::*;
use nbrun_common::tracing_support::initialize_tracing;
use structopt::StructOpt;
use tracing::debug;

mod cmd;
mod description;

/// Command-line options, parsed using `structopt`.
#[derive(Debug, StructOpt)]
#[structopt(about = "A tool for running Jupyter notebooks as SageMaker jobs.")]
enum Opt {
    /// Run a notebook once, right now.
    #[structopt(name = "run")]
    Run(cmd::run::Opt),

    /// Download the output of a notebook run.
    #[structopt(name = "download")]
    Download(cmd::download::Opt),

    /// Show everything about one notebook run.
    #[structopt(name = "describe")]
    Describe(cmd::describe::Opt),

    /// Stop a notebook run that is still in flight.
    #[structopt(name = "stop-run")]
    StopRun(cmd::stop::Opt),

    /// List recent notebook runs, most recent first.
    #[structopt(name = "list-runs")]
    ListRuns(cmd::list_runs::Opt),

    /// Run a notebook on a schedule or in response to events.
    #[structopt(name = "schedule")]
    Schedule(cmd::schedule::Opt),

    /// Delete a schedule.
    #[structopt(name = "unschedule")]
    Unschedule(cmd::schedule::UnscheduleOpt),

    /// List notebook schedules.
    #[structopt(name = "list-rules")]
    ListRules(cmd::list_rules::Opt),

    /// Create the Lambda function and IAM roles needed to run notebooks.
    #[structopt(name = "create-infrastructure")]
    CreateInfrastructure(cmd::infra::Opt),

    /// Build and push a container image for running notebooks.
    #[structopt(name = "create-container")]
    CreateContainer(cmd::container::Opt),
}

fn main() {
    initialize_tracing();
    let opt = Opt::from_args();
    debug!("args: {:?}", opt);

    let result = run(&opt);
    if let Err(err) = result {
        eprint!("{}", err.display_causes());
        process::exit(1);
    }
}

fn run(opt: &Opt) -> Result<()> {
    match opt {
        Opt::Run(opt) => cmd::run::run(opt),
        Opt::Download(opt) => cmd::download::run(opt),
        Opt::Describe(opt) => cmd::describe::run(opt),
        Opt::StopRun(opt) => cmd::stop::run(opt),
        Opt::ListRuns(opt) => cmd::list_runs::run(opt),
        Opt::Schedule(opt) => cmd::schedule::run(opt),
        Opt::Unschedule(opt) => cmd::schedule::run_unschedule(opt),
        Opt::ListRules(opt) => cmd::list_rules::run(opt),
        Opt::CreateInfrastructure(opt) => cmd::infra::run(opt),
        Opt::CreateContainer(opt) => cmd::container::run(opt),
    }
}
