//! Submitting notebook runs, immediately or on a schedule.

use serde_json::json;
use tracing::{debug, instrument};

use crate::aws;
use crate::names::{expand_image, expand_role};
use crate::prelude::*;
use crate::request::RunRequest;
use crate::rules::{permission_statement_id, qualified_rule_name, InvokeArgs, LAMBDA_FUNCTION};
use crate::storage;

/// When a scheduled run should fire: a schedule expression (`cron(...)` or
/// `rate(...)`), an event pattern, or both.
#[derive(Clone, Debug, Default)]
pub struct Trigger {
    /// An EventBridge schedule expression.
    pub schedule: Option<String>,
    /// An EventBridge event pattern, as a JSON document.
    pub event_pattern: Option<String>,
}

impl Trigger {
    /// Fail unless at least one trigger condition is present.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.is_none() && self.event_pattern.is_none() {
            return Err(Error::InvalidTrigger);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateProcessingJobResponse {
    processing_job_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRuleResponse {
    rule_arn: String,
}

/// The job name embedded in a processing job ARN.
fn job_name_from_arn(arn: &str) -> Option<&str> {
    arn.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Resolve the input object for a request, uploading the notebook to the
/// shared input prefix when it names a local file.
fn resolve_input(request: &RunRequest) -> Result<String> {
    match &request.input_path {
        Some(uri) => Ok(uri.clone()),
        None => storage::upload_notebook(Path::new(&request.notebook)),
    }
}

/// Resolve the output prefix for a request, defaulting to the shared
/// `papermill_output` prefix in the default bucket.
fn resolve_output_prefix(request: &RunRequest) -> Result<String> {
    match &request.output_prefix {
        Some(prefix) => Ok(prefix.clone()),
        None => Ok(format!("s3://{}/papermill_output", storage::default_bucket()?)),
    }
}

/// Submit one notebook run and return its job name. Does not wait for it.
#[instrument(skip(request), fields(notebook = %request.notebook))]
pub fn submit_once(request: &RunRequest) -> Result<String> {
    let account = aws::caller_account()?;
    let region = aws::region()?;
    let input_uri = resolve_input(request)?;
    let output_prefix = resolve_output_prefix(request)?;

    let built = request.build(&account, &region, &input_uri, &output_prefix, Utc::now())?;
    let payload = built.payload.to_string();
    debug!("submitting job {}", built.job_name);
    // Submission is a write, so we never auto-retry it.
    let response: CreateProcessingJobResponse = aws::aws_parse_json(&[
        "sagemaker",
        "create-processing-job",
        "--cli-input-json",
        &payload,
    ])?;
    Ok(job_name_from_arn(&response.processing_job_arn)
        .unwrap_or(&built.job_name)
        .to_owned())
}

/// Create or replace a schedule that runs a notebook whenever `trigger`
/// fires.
///
/// This is an upsert: calling it again with the same name replaces the rule
/// and its target in place, without touching runs already in flight. A local
/// notebook file is uploaded once, now; the scheduled runs all execute that
/// snapshot.
#[instrument(skip(trigger, request), fields(notebook = %request.notebook))]
pub fn submit_scheduled(name: &str, trigger: &Trigger, request: &RunRequest) -> Result<()> {
    trigger.validate()?;
    let account = aws::caller_account()?;
    let region = aws::region()?;
    let input_uri = resolve_input(request)?;
    let output_prefix = resolve_output_prefix(request)?;
    let full_name = qualified_rule_name(name);

    let description = format!("Rule to run the Jupyter notebook {}", request.notebook);
    let mut args = vec![
        "events",
        "put-rule",
        "--name",
        &full_name,
        "--description",
        &description,
    ];
    if let Some(schedule) = &trigger.schedule {
        args.push("--schedule-expression");
        args.push(schedule);
    }
    if let Some(pattern) = &trigger.event_pattern {
        args.push("--event-pattern");
        args.push(pattern);
    }
    let rule: PutRuleResponse = aws::aws_parse_json(&args)?;

    // Grant the rule invoke rights on the Lambda. On re-scheduling the
    // permission already exists; that's fine.
    let statement_id = permission_statement_id(&full_name);
    let permission = aws::aws_run(&[
        "lambda",
        "add-permission",
        "--function-name",
        LAMBDA_FUNCTION,
        "--statement-id",
        &statement_id,
        "--action",
        "lambda:InvokeFunction",
        "--principal",
        "events.amazonaws.com",
        "--source-arn",
        &rule.rule_arn,
    ]);
    match permission {
        Err(ref err) if err.platform_code() == Some("ResourceConflictException") => {}
        other => other?,
    }

    let role = match &request.role {
        Some(role) => expand_role(role, &account),
        None => expand_role(&format!("BasicExecuteNotebookRole-{}", region), &account),
    };
    let invoke_args = InvokeArgs {
        image: expand_image(&request.image, &account, &region),
        input_path: Some(input_uri),
        output_prefix: Some(output_prefix),
        notebook: request.notebook.clone(),
        parameters: request.parameters.as_json(),
        role: Some(role),
        instance_type: request.instance_type.clone(),
        extra_args: request.extra.clone(),
        rule_name: full_name.clone(),
    };
    let lambda_arn = format!(
        "arn:aws:lambda:{}:{}:function:{}",
        region, account, LAMBDA_FUNCTION
    );
    let input = serde_json::to_string(&invoke_args).map_err(anyhow::Error::from)?;
    let targets = json!([{
        "Id": "Default",
        "Arn": lambda_arn,
        "Input": input,
    }])
    .to_string();
    aws::aws_run(&["events", "put-targets", "--rule", &full_name, "--targets", &targets])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_trigger_needs_at_least_one_condition() {
        let err = Trigger::default().validate().expect_err("empty trigger");
        assert!(matches!(err, Error::InvalidTrigger));

        let schedule_only = Trigger {
            schedule: Some("rate(1 day)".to_owned()),
            event_pattern: None,
        };
        assert!(schedule_only.validate().is_ok());

        let both = Trigger {
            schedule: Some("cron(0 8 * * ? *)".to_owned()),
            event_pattern: Some("{\"source\": [\"aws.s3\"]}".to_owned()),
        };
        assert!(both.validate().is_ok());
    }

    #[test]
    fn job_names_come_from_the_returned_arn() {
        assert_eq!(
            job_name_from_arn(
                "arn:aws:sagemaker:us-west-2:123456789012:processing-job/papermill-weather-2026-08-23-01-02-03"
            ),
            Some("papermill-weather-2026-08-23-01-02-03")
        );
        assert_eq!(job_name_from_arn("no-slashes-here"), Some("no-slashes-here"));
        assert_eq!(job_name_from_arn("trailing/"), None);
    }
}
