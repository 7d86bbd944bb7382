//! Building `CreateProcessingJob` payloads from a notebook and parameters.
//!
//! The builder is a pure transformation: given a notebook reference, a
//! parameter mapping and execution options, it produces the JSON request the
//! job platform expects, with the papermill contract carried in environment
//! variables. No AWS calls happen here.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::names::{expand_image, expand_role};
use crate::prelude::*;

/// The prefix on every job name we create. Listing keys off this to find
/// notebook runs among other processing jobs.
pub const JOB_NAME_PREFIX: &str = "papermill-";

/// The default container image short name.
pub const DEFAULT_IMAGE: &str = "notebook-runner";

/// The default instance type for notebook runs.
pub const DEFAULT_INSTANCE_TYPE: &str = "ml.m5.large";

/// Environment variable carrying the container-local input notebook path.
pub const PAPERMILL_INPUT: &str = "PAPERMILL_INPUT";
/// Environment variable carrying the container-local output notebook path.
pub const PAPERMILL_OUTPUT: &str = "PAPERMILL_OUTPUT";
/// Environment variable carrying the JSON-serialized parameter map.
pub const PAPERMILL_PARAMS: &str = "PAPERMILL_PARAMS";
/// Environment variable carrying the display name of the notebook.
pub const PAPERMILL_NOTEBOOK_NAME: &str = "PAPERMILL_NOTEBOOK_NAME";
/// Environment variable carrying the name of the rule that triggered a run,
/// absent for on-demand runs.
pub const EVENTBRIDGE_RULE: &str = "AWS_EVENTBRIDGE_RULE";

const INPUT_DIRECTORY: &str = "/opt/ml/processing/input/";
const OUTPUT_DIRECTORY: &str = "/opt/ml/processing/output/";

/// A validated, ordered-by-key parameter mapping passed to the notebook.
///
/// Values are arbitrary JSON: the CLI decides string vs. number vs. structured
/// at parse time (see [`parse_parameter`]).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    map: serde_json::Map<String, Value>,
}

impl Parameters {
    /// Create an empty parameter mapping.
    pub fn new() -> Self {
        Parameters::default()
    }

    /// Add one parameter. Empty and duplicate names are client-side
    /// validation failures, not platform errors.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Validation("missing parameter name".to_owned()));
        }
        if self.map.contains_key(name) {
            return Err(Error::Validation(format!("duplicate parameter {:?}", name)));
        }
        self.map.insert(name.to_owned(), value);
        Ok(())
    }

    /// Build a mapping from `(name, value)` pairs, validating each.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut params = Parameters::new();
        for (name, value) in pairs {
            params.insert(&name, value)?;
        }
        Ok(params)
    }

    /// The mapping as a JSON object.
    pub fn as_json(&self) -> Value {
        Value::Object(self.map.clone())
    }

    /// The number of parameters.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Is the mapping empty?
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Parse a `name=value` command-line parameter. The value is decoded as JSON
/// when possible (`x=7` is the number 7, `x=true` a boolean) and kept as a
/// raw string otherwise (`place=Seattle, WA`).
pub fn parse_parameter(arg: &str) -> Result<(String, Value)> {
    let mut split = arg.splitn(2, '=');
    let name = split.next().unwrap_or("");
    let raw = match split.next() {
        Some(raw) => raw,
        None => {
            return Err(Error::Validation(format!(
                "parameter {:?} is not in the form \"name=value\"",
                arg
            )));
        }
    };
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((name.to_owned(), value))
}

/// Everything needed to run one notebook, before talking to any service.
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// The notebook to run: a local file to upload, or just a display name
    /// when `input_path` already points into S3.
    pub notebook: String,
    /// The S3 object containing the notebook, if already uploaded.
    pub input_path: Option<String>,
    /// The S3 prefix for the output notebook. Defaults to the shared
    /// `papermill_output` prefix when unset.
    pub output_prefix: Option<String>,
    /// Parameters injected into the notebook by papermill.
    pub parameters: Parameters,
    /// The container image, short name or full URI.
    pub image: String,
    /// The execution role, short name or full ARN. Defaults to the basic
    /// execution role for the region when unset.
    pub role: Option<String>,
    /// The instance type to run on.
    pub instance_type: String,
    /// Free-form overrides shallow-merged on top of the generated request.
    pub extra: Option<Value>,
    /// The rule that triggers this request, for scheduled runs.
    pub rule_name: Option<String>,
}

impl RunRequest {
    /// A request with the default image, instance type and no parameters.
    pub fn new(notebook: &str) -> Self {
        RunRequest {
            notebook: notebook.to_owned(),
            input_path: None,
            output_prefix: None,
            parameters: Parameters::new(),
            image: DEFAULT_IMAGE.to_owned(),
            role: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_owned(),
            extra: None,
            rule_name: None,
        }
    }
}

/// A fully-resolved submission: the job name we chose and the JSON payload
/// for `create-processing-job`.
#[derive(Clone, Debug)]
pub struct BuiltRequest {
    /// The generated (unique) job name.
    pub job_name: String,
    /// The base filename the container will give the output notebook.
    pub output_basename: String,
    /// The complete request document.
    pub payload: Value,
}

impl RunRequest {
    /// Build the submission payload. Pure: account, region, the resolved
    /// input object and output prefix, and the timestamp all come in as
    /// arguments.
    pub fn build(
        &self,
        account: &str,
        region: &str,
        input_uri: &str,
        output_prefix: &str,
        now: DateTime<Utc>,
    ) -> Result<BuiltRequest> {
        let image = expand_image(&self.image, account, region);
        let role = match &self.role {
            Some(role) => expand_role(role, account),
            None => expand_role(&format!("BasicExecuteNotebookRole-{}", region), account),
        };

        let timestamp = now.format("%Y-%m-%d-%H-%M-%S").to_string();
        let notebook_base = basename(&self.notebook);
        let (stem, ext) = split_extension(notebook_base);
        let job_name = job_name_for(stem, &timestamp);
        let output_basename = format!("{}-{}{}", stem, timestamp, ext);

        let local_input = format!("{}{}", INPUT_DIRECTORY, basename(input_uri));
        let local_output = format!("{}{}", OUTPUT_DIRECTORY, output_basename);

        let mut payload = json!({
            "ProcessingInputs": [
                {
                    "InputName": "notebook",
                    "S3Input": {
                        "S3Uri": input_uri,
                        "LocalPath": INPUT_DIRECTORY,
                        "S3DataType": "S3Prefix",
                        "S3InputMode": "File",
                        "S3DataDistributionType": "FullyReplicated",
                    },
                },
            ],
            "ProcessingOutputConfig": {
                "Outputs": [
                    {
                        "OutputName": "result",
                        "S3Output": {
                            "S3Uri": output_prefix,
                            "LocalPath": OUTPUT_DIRECTORY,
                            "S3UploadMode": "EndOfJob",
                        },
                    },
                ],
            },
            "ProcessingJobName": job_name,
            "ProcessingResources": {
                "ClusterConfig": {
                    "InstanceCount": 1,
                    "InstanceType": self.instance_type,
                    "VolumeSizeInGB": 40,
                },
            },
            "StoppingCondition": { "MaxRuntimeInSeconds": 7200 },
            "AppSpecification": {
                "ImageUri": image,
                "ContainerArguments": ["run_notebook"],
            },
            "RoleArn": role,
            "Environment": {},
        });

        if let Some(extra) = &self.extra {
            shallow_merge(&mut payload, extra)?;
        }

        // The papermill contract is applied after the merge so overrides
        // can't silently break input/output resolution.
        let environment = payload
            .get_mut("Environment")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                Error::Validation("extra overrides replaced Environment with a non-object".to_owned())
            })?;
        environment.insert(PAPERMILL_INPUT.to_owned(), Value::String(local_input));
        environment.insert(PAPERMILL_OUTPUT.to_owned(), Value::String(local_output));
        environment.insert(
            PAPERMILL_PARAMS.to_owned(),
            Value::String(self.parameters.as_json().to_string()),
        );
        environment.insert(
            PAPERMILL_NOTEBOOK_NAME.to_owned(),
            Value::String(notebook_base.to_owned()),
        );
        environment.insert("AWS_DEFAULT_REGION".to_owned(), Value::String(region.to_owned()));
        if let Some(rule_name) = &self.rule_name {
            environment.insert(EVENTBRIDGE_RULE.to_owned(), Value::String(rule_name.clone()));
        }

        Ok(BuiltRequest {
            job_name,
            output_basename,
            payload,
        })
    }
}

/// Derive a unique job name from the notebook stem and a timestamp. The
/// platform limits names to 63 characters, so the stem is truncated to fit.
fn job_name_for(stem: &str, timestamp: &str) -> String {
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let mut name = format!("{}{}", JOB_NAME_PREFIX, sanitized);
    name.truncate(62 - timestamp.len());
    format!("{}-{}", name, timestamp)
}

/// Merge the top-level keys of `overrides` into `base`; overrides win.
fn shallow_merge(base: &mut Value, overrides: &Value) -> Result<()> {
    let overrides = overrides.as_object().ok_or_else(|| {
        Error::Validation("extra overrides must be a JSON object".to_owned())
    })?;
    let base = base
        .as_object_mut()
        .expect("generated request is always an object");
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    Ok(())
}

/// The final path component of a local path or URI.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Split `name.ext` into `("name", ".ext")`; no dot means no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_request() -> RunRequest {
        let mut request = RunRequest::new("weather.ipynb");
        request
            .parameters
            .insert("place", Value::String("Seattle, WA".to_owned()))
            .unwrap();
        request
    }

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 23, 1, 2, 3).unwrap()
    }

    fn build_example(request: &RunRequest) -> BuiltRequest {
        request
            .build(
                "123456789012",
                "us-west-2",
                "s3://bucket/papermill_input/notebook-2026-08-23-01-02-03.ipynb",
                "s3://bucket/papermill_output",
                example_time(),
            )
            .expect("build should succeed")
    }

    #[test]
    fn duplicate_parameter_fails_validation() {
        let mut params = Parameters::new();
        params.insert("x", json!(1)).unwrap();
        let err = params.insert("x", json!(2)).expect_err("duplicate must fail");
        assert!(err.to_string().contains("duplicate parameter"));
    }

    #[test]
    fn empty_parameter_name_fails_validation() {
        let mut params = Parameters::new();
        let err = params.insert("", json!(1)).expect_err("empty name must fail");
        assert_eq!(err.to_string(), "missing parameter name");
    }

    #[test]
    fn parameters_round_trip_through_json() {
        let mut params = Parameters::new();
        params.insert("place", json!("Seattle, WA")).unwrap();
        params.insert("days", json!(7)).unwrap();
        params.insert("flags", json!({"verbose": true})).unwrap();

        let built = RunRequest {
            parameters: params.clone(),
            ..example_request()
        };
        let built = build_example(&built);
        let serialized = built.payload["Environment"][PAPERMILL_PARAMS]
            .as_str()
            .expect("params are a JSON string");
        let decoded: Value = serde_json::from_str(serialized).unwrap();
        assert_eq!(decoded, params.as_json());
    }

    #[test]
    fn parameter_values_are_tagged_at_parse_time() {
        assert_eq!(parse_parameter("x=7").unwrap(), ("x".to_owned(), json!(7)));
        assert_eq!(
            parse_parameter("flag=true").unwrap(),
            ("flag".to_owned(), json!(true))
        );
        assert_eq!(
            parse_parameter("place=Seattle, WA").unwrap(),
            ("place".to_owned(), json!("Seattle, WA"))
        );
        assert_eq!(
            parse_parameter("nested={\"a\": 1}").unwrap(),
            ("nested".to_owned(), json!({"a": 1}))
        );
        assert!(parse_parameter("no-equals-sign").is_err());
    }

    #[test]
    fn job_name_derives_from_notebook_and_timestamp() {
        let built = build_example(&example_request());
        assert_eq!(built.job_name, "papermill-weather-2026-08-23-01-02-03");
        assert_eq!(built.output_basename, "weather-2026-08-23-01-02-03.ipynb");
    }

    #[test]
    fn job_name_is_sanitized_and_bounded() {
        let long = "a_very.long notebook name that would overflow the platform limit";
        let name = job_name_for(long, "2026-08-23-01-02-03");
        assert!(name.len() <= 63);
        assert!(name.starts_with("papermill-a-very-long-notebook"));
        assert!(name.ends_with("-2026-08-23-01-02-03"));
    }

    #[test]
    fn payload_carries_the_papermill_contract() {
        let built = build_example(&example_request());
        let env = &built.payload["Environment"];
        assert_eq!(
            env[PAPERMILL_INPUT],
            json!("/opt/ml/processing/input/notebook-2026-08-23-01-02-03.ipynb")
        );
        assert_eq!(
            env[PAPERMILL_OUTPUT],
            json!("/opt/ml/processing/output/weather-2026-08-23-01-02-03.ipynb")
        );
        assert_eq!(env[PAPERMILL_NOTEBOOK_NAME], json!("weather.ipynb"));
        assert_eq!(
            built.payload["AppSpecification"]["ImageUri"],
            json!("123456789012.dkr.ecr.us-west-2.amazonaws.com/notebook-runner:latest")
        );
        assert_eq!(
            built.payload["RoleArn"],
            json!("arn:aws:iam::123456789012:role/BasicExecuteNotebookRole-us-west-2")
        );
        assert_eq!(
            built.payload["ProcessingResources"]["ClusterConfig"]["InstanceType"],
            json!("ml.m5.large")
        );
    }

    #[test]
    fn extra_overrides_win_on_conflicting_keys() {
        let mut request = example_request();
        request.extra = Some(json!({
            "StoppingCondition": { "MaxRuntimeInSeconds": 86400 },
            "NetworkConfig": { "EnableNetworkIsolation": true },
        }));
        let built = build_example(&request);
        assert_eq!(
            built.payload["StoppingCondition"]["MaxRuntimeInSeconds"],
            json!(86400)
        );
        assert_eq!(
            built.payload["NetworkConfig"]["EnableNetworkIsolation"],
            json!(true)
        );
    }

    #[test]
    fn environment_entries_survive_a_merge() {
        let mut request = example_request();
        request.extra = Some(json!({
            "Environment": { "MY_FLAG": "on" },
        }));
        let built = build_example(&request);
        let env = &built.payload["Environment"];
        assert_eq!(env["MY_FLAG"], json!("on"));
        assert!(env[PAPERMILL_INPUT].is_string());
    }

    #[test]
    fn non_object_overrides_fail_fast() {
        let mut request = example_request();
        request.extra = Some(json!([1, 2, 3]));
        let err = request
            .build(
                "123456789012",
                "us-west-2",
                "s3://bucket/in.ipynb",
                "s3://bucket/out",
                example_time(),
            )
            .expect_err("non-object overrides are invalid");
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn scheduled_runs_record_their_rule() {
        let mut request = example_request();
        request.rule_name = Some("nightly".to_owned());
        let built = build_example(&request);
        assert_eq!(
            built.payload["Environment"][EVENTBRIDGE_RULE],
            json!("nightly")
        );
    }
}
