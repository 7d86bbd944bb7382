//! The `create-container` subcommand.
//!
//! Builds a papermill container image with CodeBuild, so no local Docker
//! daemon is needed. The build runs from an inline buildspec that writes the
//! Dockerfile itself, pointed at whatever base image the user picked.

use std::fs;
use std::io::{self, Write};
use std::thread::sleep;

use anyhow::{anyhow, Context};
use nbrun_common::aws;
use nbrun_common::prelude::*;
use serde_json::json;
use structopt::StructOpt;

use crate::description::render_description;

/// The buildspec that builds and pushes the image.
const BUILDSPEC_TEMPLATE: &str = include_str!("buildspec.yml.hbs");

/// The `create-container` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The ECR repository to push the image to.
    #[structopt(default_value = "notebook-runner")]
    repository: String,

    /// The Docker image to build on.
    #[structopt(long = "base", default_value = "python:3.7-slim-buster")]
    base: String,

    /// A pip requirements file of extra packages to install.
    #[structopt(long = "requirements", parse(from_os_str))]
    requirements: Option<PathBuf>,

    /// The Jupyter kernel to run notebooks with. Defaults to whatever kernel
    /// papermill finds in the notebook.
    #[structopt(long = "kernel")]
    kernel: Option<String>,

    /// The CodeBuild service role to build with.
    #[structopt(long = "role", default_value = "ExecuteNotebookCodeBuildRole")]
    role: String,
}

/// Values substituted into the buildspec.
#[derive(Serialize)]
struct BuildspecParams {
    account: String,
    region: String,
    repository: String,
    base: String,
    kernel: Option<String>,
    packages: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBuildResponse {
    build: Build,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetBuildsResponse {
    builds: Vec<BuildStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildStatus {
    build_status: String,
    #[serde(default)]
    logs: Option<BuildLogs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildLogs {
    #[serde(default)]
    deep_link: Option<String>,
}

/// Parse a pip requirements file into a single `pip install` argument list.
fn requirements_packages(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("error reading {}", path.display()))?;
    let packages = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join(" ");
    if packages.is_empty() {
        return Err(Error::Validation(format!(
            "no packages found in {}",
            path.display()
        )));
    }
    Ok(packages)
}

/// Run the `create-container` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let account = aws::caller_account()?;
    let region = aws::region()?;

    // Make sure the repository exists before the build tries to push.
    let created = aws::aws_run(&[
        "ecr",
        "create-repository",
        "--repository-name",
        &opt.repository,
    ]);
    match created {
        Err(ref err) if err.platform_code() == Some("RepositoryAlreadyExistsException") => {}
        other => other?,
    }

    let params = BuildspecParams {
        account: account.clone(),
        region: region.clone(),
        repository: opt.repository.clone(),
        base: opt.base.clone(),
        kernel: opt.kernel.clone(),
        packages: opt
            .requirements
            .as_deref()
            .map(requirements_packages)
            .transpose()?,
    };
    let buildspec = render_description(BUILDSPEC_TEMPLATE, &params)?;

    let project_name = format!("create-sagemaker-container-{}", opt.repository);
    let project = json!({
        "name": project_name,
        "description": format!(
            "Build the container {} for running notebooks",
            opt.repository,
        ),
        "source": { "type": "NO_SOURCE", "buildspec": buildspec },
        "artifacts": { "type": "NO_ARTIFACTS" },
        "environment": {
            "type": "LINUX_CONTAINER",
            "image": "aws/codebuild/standard:4.0",
            "computeType": "BUILD_GENERAL1_SMALL",
            "privilegedMode": true,
        },
        "serviceRole": format!("arn:aws:iam::{}:role/{}", account, opt.role),
    })
    .to_string();
    let created = aws::aws_run(&["codebuild", "create-project", "--cli-input-json", &project]);
    match created {
        Err(ref err) if err.platform_code() == Some("ResourceAlreadyExistsException") => {
            aws::aws_run(&["codebuild", "update-project", "--cli-input-json", &project])?;
        }
        other => other?,
    }

    let started: StartBuildResponse = aws::aws_parse_json(&[
        "codebuild",
        "start-build",
        "--project-name",
        &project_name,
    ])?;
    println!("Started build {}", started.build.id);

    let outcome = wait_for_build(&started.build.id);
    // Projects are transient; delete even after a failed build.
    let cleanup = aws::aws_run(&["codebuild", "delete-project", "--name", &project_name]);
    let status = outcome?;
    cleanup?;

    if let Some(link) = status.logs.and_then(|logs| logs.deep_link) {
        println!("Logs at {}", link);
    }
    if status.build_status == "SUCCEEDED" {
        println!(
            "Pushed {}.dkr.ecr.{}.amazonaws.com/{}:latest",
            account, region, opt.repository
        );
        Ok(())
    } else {
        Err(anyhow!("container build finished with status {}", status.build_status).into())
    }
}

/// Poll until the build finishes, printing progress dots.
fn wait_for_build(build_id: &str) -> Result<BuildStatus> {
    loop {
        let response: BatchGetBuildsResponse = aws::retry_throttled(|| {
            aws::aws_parse_json(&["codebuild", "batch-get-builds", "--ids", build_id])
        })?;
        let build = response
            .builds
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("build {} not found", build_id))?;
        if build.build_status != "IN_PROGRESS" {
            println!();
            return Ok(build);
        }
        print!(".");
        let _ = io::stdout().flush();
        sleep(Duration::from_secs(10));
    }
}
