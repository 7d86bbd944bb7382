//! The `download` subcommand.

use nbrun_common::download::download_all;
use nbrun_common::poll::{wait_for_complete, WaitOpts};
use nbrun_common::prelude::*;
use structopt::StructOpt;

/// The `download` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The runs whose output notebooks to fetch.
    #[structopt(required = true)]
    job_names: Vec<String>,

    /// Where to put the output notebooks.
    #[structopt(long = "output-dir", parse(from_os_str), default_value = ".")]
    output_dir: PathBuf,

    /// Wait for unfinished runs instead of failing on them.
    #[structopt(long = "wait")]
    wait: bool,

    /// Give up waiting after this long, for example "45m".
    #[structopt(long = "timeout", parse(try_from_str = humantime::parse_duration))]
    timeout: Option<Duration>,
}

/// Run the `download` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    if opt.wait {
        let wait_opts = WaitOpts {
            timeout: opt.timeout,
            ..WaitOpts::default()
        };
        for job_name in &opt.job_names {
            wait_for_complete(job_name, &wait_opts)?;
        }
    }

    match download_all(&opt.job_names, &opt.output_dir) {
        Ok(paths) => {
            for path in paths {
                println!("{}", path.display());
            }
            Ok(())
        }
        Err(Error::PartialBatch(outcomes)) => {
            // Report every outcome, then fail.
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(path) => println!("{}", path.display()),
                    Err(reason) => eprintln!("{}: {}", outcome.job, reason),
                }
            }
            Err(Error::PartialBatch(outcomes))
        }
        Err(err) => Err(err),
    }
}
