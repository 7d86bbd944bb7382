//! Describing, listing and stopping notebook runs.
//!
//! The platform keeps all run history; we only read it. Listing is lazily
//! paginated over the platform's history API, most recent first, and
//! throttling is retried with exponential back-off.

use std::collections::VecDeque;

use tracing::debug;

use crate::aws;
use crate::names::{abbreviate_image, abbreviate_role};
use crate::prelude::*;
use crate::request::{EVENTBRIDGE_RULE, JOB_NAME_PREFIX, PAPERMILL_NOTEBOOK_NAME, PAPERMILL_OUTPUT, PAPERMILL_PARAMS};

/// A normalized description of one notebook run, uniform across the CLI, the
/// library and the tracker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunDescription {
    /// The display name of the notebook that ran.
    pub notebook: String,
    /// The rule that triggered the run; empty for on-demand runs.
    pub rule: String,
    /// The JSON-serialized parameter map the run was given.
    pub parameters: String,
    /// The unique job name.
    pub job: String,
    /// The current status.
    pub status: Status,
    /// The platform's failure reason, verbatim, when `status` is `Failed`.
    pub failure: Option<String>,
    /// When the run was created.
    pub created: DateTime<Utc>,
    /// When the platform started executing the run.
    pub start: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub end: Option<DateTime<Utc>>,
    /// Human-readable execution time, when both `start` and `end` are known.
    pub elapsed: Option<String>,
    /// The S3 URI of the output notebook; only meaningful once `Completed`.
    pub result: Option<String>,
    /// The S3 URI of the input notebook.
    pub input: String,
    /// The container image, abbreviated for display.
    pub image: String,
    /// The instance type the run used.
    pub instance: String,
    /// The execution role, abbreviated for display.
    pub role: String,
}

/// The fields we need from `describe-processing-job`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProcessingJobDescription {
    pub processing_job_name: String,
    pub processing_job_status: Status,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub processing_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_inputs: Vec<ProcessingInput>,
    pub processing_output_config: ProcessingOutputConfig,
    pub processing_resources: ProcessingResources,
    pub app_specification: AppSpecification,
    pub role_arn: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProcessingInput {
    pub s3_input: S3Input,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct S3Input {
    pub s3_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProcessingOutputConfig {
    #[serde(default)]
    pub outputs: Vec<ProcessingOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProcessingOutput {
    pub s3_output: S3Output,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct S3Output {
    pub s3_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProcessingResources {
    pub cluster_config: ClusterConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ClusterConfig {
    pub instance_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AppSpecification {
    pub image_uri: String,
}

impl RunDescription {
    /// Normalize a platform job description.
    pub(crate) fn from_platform(desc: ProcessingJobDescription) -> RunDescription {
        let status = desc.processing_job_status;

        // The final object name is only fully known post-submission: the
        // timestamped base name lives in the container environment, the
        // prefix in the output config.
        let result = if status == Status::Completed {
            output_uri(&desc)
        } else {
            None
        };
        let failure = if status == Status::Failed {
            desc.failure_reason.clone()
        } else {
            None
        };

        let elapsed = match (desc.processing_start_time, desc.processing_end_time) {
            (Some(start), Some(end)) => {
                let seconds = (end - start).num_seconds();
                if seconds >= 0 {
                    Some(
                        humantime::format_duration(Duration::from_secs(seconds as u64))
                            .to_string(),
                    )
                } else {
                    None
                }
            }
            _ => None,
        };

        RunDescription {
            notebook: desc
                .environment
                .get(PAPERMILL_NOTEBOOK_NAME)
                .cloned()
                .unwrap_or_default(),
            rule: desc
                .environment
                .get(EVENTBRIDGE_RULE)
                .cloned()
                .unwrap_or_default(),
            parameters: desc
                .environment
                .get(PAPERMILL_PARAMS)
                .cloned()
                .unwrap_or_default(),
            job: desc.processing_job_name,
            status,
            failure,
            created: desc.creation_time,
            start: desc.processing_start_time,
            end: desc.processing_end_time,
            elapsed,
            result,
            input: desc
                .processing_inputs
                .first()
                .map(|input| input.s3_input.s3_uri.clone())
                .unwrap_or_default(),
            image: abbreviate_image(&desc.app_specification.image_uri),
            instance: desc.processing_resources.cluster_config.instance_type,
            role: abbreviate_role(&desc.role_arn),
        }
    }
}

/// Resolve the output notebook URI: the configured output prefix plus the
/// base filename recorded in the container environment.
fn output_uri(desc: &ProcessingJobDescription) -> Option<String> {
    let prefix = &desc.processing_output_config.outputs.first()?.s3_output.s3_uri;
    let local_output = desc.environment.get(PAPERMILL_OUTPUT)?;
    let filename = local_output.rsplit('/').next()?;
    Some(format!("{}/{}", prefix.trim_end_matches('/'), filename))
}

/// Describe a particular notebook run.
pub fn describe_run(job_name: &str) -> Result<RunDescription> {
    let desc: ProcessingJobDescription = aws::retry_throttled(|| {
        aws::aws_parse_json(&[
            "sagemaker",
            "describe-processing-job",
            "--processing-job-name",
            job_name,
        ])
    })?;
    Ok(RunDescription::from_platform(desc))
}

/// Stop the named run without waiting for it.
pub fn stop_run(job_name: &str) -> Result<()> {
    aws::aws_run(&[
        "sagemaker",
        "stop-processing-job",
        "--processing-job-name",
        job_name,
    ])
}

/// One page of the platform's job history.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListProcessingJobsResponse {
    #[serde(default)]
    pub processing_job_summaries: Vec<ProcessingJobSummary>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProcessingJobSummary {
    pub processing_job_name: String,
}

/// A lazy, most-recent-first iterator over the names of notebook runs,
/// fetching history pages only as they are consumed.
pub(crate) struct JobNamePager<F> {
    fetch: F,
    next_token: Option<String>,
    buffer: VecDeque<String>,
    started: bool,
}

impl<F> JobNamePager<F>
where
    F: FnMut(Option<&str>) -> Result<ListProcessingJobsResponse>,
{
    pub(crate) fn new(fetch: F) -> Self {
        JobNamePager {
            fetch,
            next_token: None,
            buffer: VecDeque::new(),
            started: false,
        }
    }
}

impl<F> Iterator for JobNamePager<F>
where
    F: FnMut(Option<&str>) -> Result<ListProcessingJobsResponse>,
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(name) = self.buffer.pop_front() {
                return Some(Ok(name));
            }
            if self.started && self.next_token.is_none() {
                return None;
            }
            let page = match (self.fetch)(self.next_token.as_deref()) {
                Ok(page) => page,
                Err(err) => {
                    // Terminate the iteration after reporting the failure.
                    self.started = true;
                    self.next_token = None;
                    return Some(Err(err));
                }
            };
            self.started = true;
            self.next_token = page.next_token;
            self.buffer.extend(
                page.processing_job_summaries
                    .into_iter()
                    .map(|summary| summary.processing_job_name)
                    // The history API matches `papermill-` anywhere in the
                    // name; we only want it as a prefix.
                    .filter(|name| name.starts_with(JOB_NAME_PREFIX)),
            );
        }
    }
}

/// Does a run match the requested filters? On-demand runs have an empty rule
/// field and never match a rule filter.
pub(crate) fn matches_filters(
    desc: &RunDescription,
    rule: Option<&str>,
    notebook: Option<&str>,
) -> bool {
    if let Some(rule) = rule {
        if desc.rule != rule {
            return false;
        }
    }
    if let Some(notebook) = notebook {
        if desc.notebook != notebook {
            return false;
        }
    }
    true
}

/// List notebook runs, most recent first.
///
/// `rule` restricts to runs triggered by that rule, `notebook` to runs of
/// that notebook, and `n` caps the number of results (`0` means no cap).
pub fn list_runs(
    rule: Option<&str>,
    notebook: Option<&str>,
    n: usize,
) -> Result<Vec<RunDescription>> {
    let pager = JobNamePager::new(|token: Option<&str>| {
        let mut args = vec![
            "sagemaker",
            "list-processing-jobs",
            "--name-contains",
            JOB_NAME_PREFIX,
            "--max-results",
            "30",
        ];
        if let Some(token) = token {
            args.push("--next-token");
            args.push(token);
        }
        aws::retry_throttled(|| aws::aws_parse_json(&args))
    });

    let mut runs = vec![];
    for name in pager {
        let name = name?;
        debug!("describing job {}", name);
        let desc = describe_run(&name)?;
        if matches_filters(&desc, rule, notebook) {
            runs.push(desc);
            if n > 0 && runs.len() >= n {
                break;
            }
        }
    }
    Ok(runs)
}
