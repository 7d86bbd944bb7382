//! The `run` subcommand.

use std::fs;

use anyhow::{anyhow, Context};
use nbrun_common::download::download_notebook;
use nbrun_common::poll::{wait_for_complete, WaitOpts};
use nbrun_common::prelude::*;
use nbrun_common::request::{parse_parameter, Parameters, RunRequest};
use nbrun_common::submit::submit_once;
use serde_json::Value;
use structopt::StructOpt;

/// Options shared by every command that builds a run request.
#[derive(Debug, StructOpt)]
pub struct RunOpts {
    /// A `name=value` parameter for the notebook. Values parse as JSON when
    /// possible, so `days=7` is a number and `place=Seattle` a string. May be
    /// repeated.
    #[structopt(short = "p", long = "param", number_of_values = 1)]
    params: Vec<String>,

    /// The container image to run the notebook in.
    #[structopt(long = "image", default_value = "notebook-runner")]
    image: String,

    /// The IAM role the run executes under.
    #[structopt(long = "role")]
    role: Option<String>,

    /// The instance type to run on.
    #[structopt(long = "instance", default_value = "ml.m5.large")]
    instance: String,

    /// The S3 prefix to write the output notebook to.
    #[structopt(long = "output-prefix")]
    output_prefix: Option<String>,

    /// JSON overrides merged into the generated job request, inline or
    /// `@file`.
    #[structopt(long = "extra")]
    extra: Option<String>,
}

impl RunOpts {
    /// Build a run request for `notebook`, which is either a local file or an
    /// `s3://` object.
    pub fn to_request(&self, notebook: &str) -> Result<RunRequest> {
        let (display_name, input_path) = if notebook.starts_with("s3://") {
            let base = notebook.rsplit('/').next().unwrap_or(notebook);
            (base.to_owned(), Some(notebook.to_owned()))
        } else {
            (notebook.to_owned(), None)
        };

        let pairs = self
            .params
            .iter()
            .map(|arg| parse_parameter(arg))
            .collect::<Result<Vec<_>>>()?;

        let mut request = RunRequest::new(&display_name);
        request.input_path = input_path;
        request.output_prefix = self.output_prefix.clone();
        request.parameters = Parameters::from_pairs(pairs)?;
        request.image = self.image.clone();
        request.role = self.role.clone();
        request.instance_type = self.instance.clone();
        request.extra = self
            .extra
            .as_deref()
            .map(|arg| -> Result<Value> {
                let raw = read_arg(arg)?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("error parsing extra overrides {:?}", arg))
                    .map_err(Error::Other)
            })
            .transpose()?;
        Ok(request)
    }
}

/// Resolve a command-line argument that may name a file: `@overrides.json`
/// reads the file, anything else is used verbatim.
pub fn read_arg(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(fs::read_to_string(path)
            .with_context(|| format!("error reading {}", path))?),
        None => Ok(arg.to_owned()),
    }
}

/// The `run` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The notebook to run: a local file or an s3:// object.
    notebook: String,

    #[structopt(flatten)]
    run_opts: RunOpts,

    /// Submit the job and return immediately, without waiting for it.
    #[structopt(long = "no-wait")]
    no_wait: bool,

    /// Where to put the output notebook.
    #[structopt(long = "output-dir", parse(from_os_str), default_value = ".")]
    output_dir: PathBuf,

    /// Give up waiting after this long, for example "45m". The job itself
    /// keeps running.
    #[structopt(long = "timeout", parse(try_from_str = humantime::parse_duration))]
    timeout: Option<Duration>,
}

/// Run the `run` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let request = opt.run_opts.to_request(&opt.notebook)?;
    let job_name = submit_once(&request)?;
    println!("Started processing job {}", job_name);
    if opt.no_wait {
        return Ok(());
    }

    let wait_opts = WaitOpts {
        timeout: opt.timeout,
        ..WaitOpts::default()
    };
    let desc = wait_for_complete(&job_name, &wait_opts)?;
    match desc.status {
        Status::Completed => {
            let path = download_notebook(&job_name, &opt.output_dir)?;
            println!("{}", path.display());
            Ok(())
        }
        Status::Failed => Err(anyhow!(
            "job {} failed: {}",
            job_name,
            desc.failure.unwrap_or_else(|| "(no failure reason)".to_owned()),
        )
        .into()),
        status => Err(anyhow!("job {} finished as {}", job_name, status).into()),
    }
}
