//! Scheduled notebook runs, backed by EventBridge rules.
//!
//! Each schedule is one EventBridge rule targeting the shared `RunNotebook`
//! Lambda function. The run request travels as the target's JSON `Input`, so
//! describing a rule means reading that payload back.

use serde_json::Value;

use crate::aws;
use crate::prelude::*;

/// The prefix on every EventBridge rule we manage. Users see rule names
/// without it.
pub const RULE_PREFIX: &str = "RunNotebook-";

/// The Lambda function invoked by every rule.
pub const LAMBDA_FUNCTION: &str = "RunNotebook";

/// The platform-side name of a user-visible rule.
pub(crate) fn qualified_rule_name(name: &str) -> String {
    format!("{}{}", RULE_PREFIX, name)
}

/// The user-visible name of a platform-side rule.
pub(crate) fn display_rule_name(full_name: &str) -> &str {
    full_name.strip_prefix(RULE_PREFIX).unwrap_or(full_name)
}

/// The statement id of the Lambda permission granting a rule invoke rights.
pub(crate) fn permission_statement_id(full_name: &str) -> String {
    format!("EB-{}", full_name)
}

/// The run request carried in a rule target's `Input`, decoded by the
/// `RunNotebook` Lambda at fire time.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InvokeArgs {
    /// The container image, fully expanded.
    pub image: String,
    /// The S3 object containing the notebook.
    pub input_path: Option<String>,
    /// The S3 prefix for output notebooks.
    pub output_prefix: Option<String>,
    /// The display name of the notebook.
    pub notebook: String,
    /// The papermill parameter map.
    pub parameters: Value,
    /// The execution role, fully expanded.
    pub role: Option<String>,
    /// The instance type to run on.
    pub instance_type: String,
    /// Free-form request overrides.
    pub extra_args: Option<Value>,
    /// The platform-side rule name, recorded in the run's environment.
    pub rule_name: String,
}

/// A normalized description of one schedule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleDescription {
    /// The user-visible rule name.
    pub name: String,
    /// The notebook the rule runs.
    pub notebook: String,
    /// The JSON-serialized parameter map.
    pub parameters: String,
    /// The schedule expression, for time-based rules.
    pub schedule: Option<String>,
    /// The event pattern, for event-based rules.
    pub event_pattern: Option<String>,
    /// The container image, abbreviated for display.
    pub image: String,
    /// The instance type.
    pub instance: String,
    /// The execution role, abbreviated for display.
    pub role: String,
    /// The rule state as the platform reports it (`ENABLED` or `DISABLED`).
    pub state: String,
    /// The S3 object containing the notebook.
    pub input_path: String,
    /// The S3 prefix for output notebooks.
    pub output_prefix: String,
}

/// The fields we need from `describe-rule` and `list-rules` entries.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RuleDetails {
    pub name: String,
    #[serde(default)]
    pub schedule_expression: Option<String>,
    #[serde(default)]
    pub event_pattern: Option<String>,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListRulesResponse {
    #[serde(default)]
    pub rules: Vec<RuleDetails>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListTargetsResponse {
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Target {
    pub id: String,
    #[serde(default)]
    pub input: Option<String>,
}

impl RuleDescription {
    /// Normalize a rule and its target payload. A rule whose target is
    /// missing or unparseable (created by hand, or half-deleted) still gets
    /// listed, with empty run fields.
    pub(crate) fn from_parts(rule: RuleDetails, input: Option<&str>) -> RuleDescription {
        let args: Option<InvokeArgs> = input.and_then(|raw| serde_json::from_str(raw).ok());
        let (notebook, parameters, image, instance, role, input_path, output_prefix) = match args {
            Some(args) => (
                args.notebook,
                args.parameters.to_string(),
                crate::names::abbreviate_image(&args.image),
                args.instance_type,
                args.role
                    .as_deref()
                    .map(crate::names::abbreviate_role)
                    .unwrap_or_default(),
                args.input_path.unwrap_or_default(),
                args.output_prefix.unwrap_or_default(),
            ),
            None => Default::default(),
        };
        RuleDescription {
            name: display_rule_name(&rule.name).to_owned(),
            notebook,
            parameters,
            schedule: rule.schedule_expression,
            event_pattern: rule.event_pattern,
            image,
            instance,
            role,
            state: rule.state,
            input_path,
            output_prefix,
        }
    }
}

/// Fetch the target payload attached to a rule, if any.
fn target_input(full_name: &str) -> Result<Option<String>> {
    let response: ListTargetsResponse = aws::retry_throttled(|| {
        aws::aws_parse_json(&["events", "list-targets-by-rule", "--rule", full_name])
    })?;
    Ok(response
        .targets
        .into_iter()
        .find(|target| target.id == "Default")
        .and_then(|target| target.input))
}

/// Describe one schedule by its user-visible name.
pub fn describe_rule(name: &str) -> Result<RuleDescription> {
    let full_name = qualified_rule_name(name);
    let rule: RuleDetails = aws::retry_throttled(|| {
        aws::aws_parse_json(&["events", "describe-rule", "--name", &full_name])
    })?;
    let input = target_input(&full_name)?;
    Ok(RuleDescription::from_parts(rule, input.as_deref()))
}

/// List schedules, optionally restricted to names starting with `prefix` or
/// to rules running `notebook`. `n` caps the number of results (`0` means no
/// cap).
pub fn list_rules(
    prefix: Option<&str>,
    notebook: Option<&str>,
    n: usize,
) -> Result<Vec<RuleDescription>> {
    let name_prefix = format!("{}{}", RULE_PREFIX, prefix.unwrap_or(""));
    let mut rules = vec![];
    let mut next_token: Option<String> = None;
    loop {
        let mut args = vec![
            "events",
            "list-rules",
            "--name-prefix",
            &name_prefix,
            "--limit",
            "50",
        ];
        if let Some(token) = &next_token {
            args.push("--next-token");
            args.push(token);
        }
        let page: ListRulesResponse =
            aws::retry_throttled(|| aws::aws_parse_json(&args))?;
        for details in page.rules {
            let input = target_input(&details.name)?;
            let desc = RuleDescription::from_parts(details, input.as_deref());
            if let Some(notebook) = notebook {
                if desc.notebook != notebook {
                    continue;
                }
            }
            rules.push(desc);
            if n > 0 && rules.len() >= n {
                return Ok(rules);
            }
        }
        next_token = page.next_token;
        if next_token.is_none() {
            return Ok(rules);
        }
    }
}

/// Delete a schedule: the Lambda permission, the target, then the rule
/// itself. Safe to call on a half-deleted rule.
pub fn delete_rule(name: &str) -> Result<()> {
    let full_name = qualified_rule_name(name);
    let statement_id = permission_statement_id(&full_name);
    let result = aws::aws_run(&[
        "lambda",
        "remove-permission",
        "--function-name",
        LAMBDA_FUNCTION,
        "--statement-id",
        &statement_id,
    ]);
    match result {
        Err(ref err) if err.platform_code() == Some("ResourceNotFoundException") => {}
        other => other?,
    }
    aws::aws_run(&[
        "events",
        "remove-targets",
        "--rule",
        &full_name,
        "--ids",
        "Default",
    ])?;
    aws::aws_run(&["events", "delete-rule", "--name", &full_name])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details() -> RuleDetails {
        RuleDetails {
            name: "RunNotebook-nightly".to_owned(),
            schedule_expression: Some("cron(0 8 * * ? *)".to_owned()),
            event_pattern: None,
            state: "ENABLED".to_owned(),
        }
    }

    #[test]
    fn rule_names_round_trip_through_the_prefix() {
        assert_eq!(qualified_rule_name("nightly"), "RunNotebook-nightly");
        assert_eq!(display_rule_name("RunNotebook-nightly"), "nightly");
        assert_eq!(display_rule_name("hand-made-rule"), "hand-made-rule");
    }

    #[test]
    fn invoke_args_use_the_lambda_wire_format() {
        let args = InvokeArgs {
            image: "123456789012.dkr.ecr.us-west-2.amazonaws.com/notebook-runner:latest"
                .to_owned(),
            input_path: Some("s3://bucket/papermill_input/weather.ipynb".to_owned()),
            output_prefix: Some("s3://bucket/papermill_output".to_owned()),
            notebook: "weather.ipynb".to_owned(),
            parameters: json!({"place": "Seattle, WA"}),
            role: Some("arn:aws:iam::123456789012:role/BasicExecuteNotebookRole-us-west-2".to_owned()),
            instance_type: "ml.m5.large".to_owned(),
            extra_args: None,
            rule_name: "RunNotebook-nightly".to_owned(),
        };
        let serialized = serde_json::to_value(&args).unwrap();
        assert_eq!(serialized["notebook"], json!("weather.ipynb"));
        assert_eq!(serialized["instance_type"], json!("ml.m5.large"));
        assert_eq!(serialized["rule_name"], json!("RunNotebook-nightly"));
        let decoded: InvokeArgs = serde_json::from_value(serialized).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn described_rule_reads_the_target_payload() {
        let input = json!({
            "image": "123456789012.dkr.ecr.us-west-2.amazonaws.com/notebook-runner:latest",
            "input_path": "s3://bucket/papermill_input/weather.ipynb",
            "output_prefix": "s3://bucket/papermill_output",
            "notebook": "weather.ipynb",
            "parameters": {"place": "Seattle, WA"},
            "role": "arn:aws:iam::123456789012:role/BasicExecuteNotebookRole-us-west-2",
            "instance_type": "ml.m5.large",
            "extra_args": null,
            "rule_name": "RunNotebook-nightly",
        })
        .to_string();
        let desc = RuleDescription::from_parts(details(), Some(&input));
        assert_eq!(desc.name, "nightly");
        assert_eq!(desc.notebook, "weather.ipynb");
        assert_eq!(desc.image, "notebook-runner");
        assert_eq!(desc.role, "BasicExecuteNotebookRole-us-west-2");
        assert_eq!(desc.schedule.as_deref(), Some("cron(0 8 * * ? *)"));
        assert_eq!(desc.state, "ENABLED");
    }

    #[test]
    fn broken_rules_are_still_listed() {
        let desc = RuleDescription::from_parts(details(), None);
        assert_eq!(desc.name, "nightly");
        assert_eq!(desc.notebook, "");
        assert_eq!(desc.schedule.as_deref(), Some("cron(0 8 * * ? *)"));

        let desc = RuleDescription::from_parts(details(), Some("not json"));
        assert_eq!(desc.notebook, "");
    }
}
