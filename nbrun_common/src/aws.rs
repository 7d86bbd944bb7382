//! Tools for talking to AWS services via the `aws` CLI.
//!
//! Every call shells out to `aws`, captures the JSON output, and parses it
//! with `serde`. Service failures are recognized from the CLI's standard
//! `An error occurred (Code) when calling ...` diagnostic and surfaced as
//! [`Error::Platform`] so callers can match on the service's own error code.

use std::env;
use std::process::{Command, Stdio};

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::trace;

use crate::prelude::*;

/// Run `aws`, passing stdout and stderr through to the console. Use this for
/// commands whose output is meant for the user, like `aws s3 cp`.
pub fn aws(args: &[&str]) -> Result<()> {
    trace!("running aws {:?}", args);
    let status = Command::new("aws")
        .args(args)
        .status()
        .with_context(|| format!("error starting aws with {:?}", args))?;
    if !status.success() {
        return Err(Error::Other(anyhow::anyhow!(
            "error running aws with {:?}",
            args
        )));
    }
    Ok(())
}

/// Run `aws`, capture the output as JSON, and parse it using the specified
/// type.
pub fn aws_parse_json<T: DeserializeOwned>(args: &[&str]) -> Result<T> {
    let stdout = aws_capture(args)?;
    serde_json::from_slice(&stdout)
        .with_context(|| format!("error parsing output of aws {:?}", args))
        .map_err(Error::Other)
}

/// Run `aws` for its side effects, discarding any output. Service errors are
/// still classified from stderr.
pub fn aws_run(args: &[&str]) -> Result<()> {
    aws_capture(args).map(|_| ())
}

/// Run `aws` with captured output, turning a failure into either a
/// [`Error::Platform`] (when stderr carries a service error code) or a
/// generic error.
fn aws_capture(args: &[&str]) -> Result<Vec<u8>> {
    trace!("running aws {:?}", args);
    let output = Command::new("aws")
        .args(args)
        .arg("--output")
        .arg("json")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("error starting aws with {:?}", args))?;
    if output.status.success() {
        Ok(output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(platform_error(&stderr).unwrap_or_else(|| {
            Error::Other(anyhow::anyhow!(
                "error running aws with {:?}: {}",
                args,
                stderr.trim()
            ))
        }))
    }
}

/// Extract a service error from the CLI's stderr diagnostic, if one is
/// present.
fn platform_error(stderr: &str) -> Option<Error> {
    lazy_static! {
        static ref RE: Regex =
            Regex::new(r"An error occurred \((?P<code>[A-Za-z0-9_.]+)\) when calling")
                .expect("couldn't parse built-in regex");
    }
    let caps = RE.captures(stderr)?;
    Some(Error::Platform {
        code: caps["code"].to_owned(),
        message: stderr.trim().to_owned(),
    })
}

/// The identity fields we need from `aws sts get-caller-identity`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: String,
}

/// Get the AWS account ID for the current credentials.
pub fn caller_account() -> Result<String> {
    let identity: CallerIdentity = aws_parse_json(&["sts", "get-caller-identity"])?;
    Ok(identity.account)
}

/// Get the region the CLI will operate in. Checks `AWS_REGION` and
/// `AWS_DEFAULT_REGION` first, then falls back to the CLI's own
/// configuration.
pub fn region() -> Result<String> {
    if let Ok(region) = env::var("AWS_REGION") {
        if !region.is_empty() {
            return Ok(region);
        }
    }
    if let Ok(region) = env::var("AWS_DEFAULT_REGION") {
        if !region.is_empty() {
            return Ok(region);
        }
    }
    let output = Command::new("aws")
        .args(&["configure", "get", "region"])
        .stderr(Stdio::inherit())
        .output()
        .context("error starting aws configure get region")?;
    let region = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if region.is_empty() {
        return Err(Error::Validation(
            "no AWS region configured (set AWS_REGION or run `aws configure`)".to_owned(),
        ));
    }
    Ok(region)
}

/// Run `f`, retrying with exponential back-off while the service reports
/// `ThrottlingException`. All other failures are returned immediately.
pub fn retry_throttled<F, T>(mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let operation = || {
        f().map_err(|err| match err.platform_code() {
            Some("ThrottlingException") => backoff::Error::transient(err),
            _ => backoff::Error::permanent(err),
        })
    };
    backoff::retry(backoff::ExponentialBackoff::default(), operation).map_err(|err| match err {
        backoff::Error::Transient { err, .. } => err,
        backoff::Error::Permanent(err) => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_parsing() {
        let stderr = "\nAn error occurred (ThrottlingException) when calling the \
                      DescribeProcessingJob operation (reached max retries: 4): \
                      Rate exceeded\n";
        let err = platform_error(stderr).expect("should recognize a service error");
        assert_eq!(err.platform_code(), Some("ThrottlingException"));
        assert!(err.to_string().contains("Rate exceeded"));

        assert!(platform_error("aws: command not found").is_none());
    }

    #[test]
    fn retry_throttled_gives_up_on_permanent_errors() {
        let mut calls = 0;
        let result: Result<()> = retry_throttled(|| {
            calls += 1;
            Err(Error::Platform {
                code: "AccessDeniedException".to_owned(),
                message: "nope".to_owned(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
