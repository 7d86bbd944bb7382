//! Error-handling code.
//!
//! The facade distinguishes local input mistakes from platform failures, so
//! callers never need to parse message strings to decide whether a retry or a
//! resubmission makes sense.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::poll::Status;

/// Result type for this crate's functions.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while running or scheduling notebooks.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed local input: parameters, triggers, override documents.
    /// Never retried.
    #[error("{0}")]
    Validation(String),

    /// A failure reported by an AWS service, carrying the service's own
    /// error code and message unmodified.
    #[error("{code}: {message}")]
    Platform {
        /// The service's error code, for example `ValidationException`.
        code: String,
        /// The service's error message, verbatim.
        message: String,
    },

    /// The operation requires a terminal job status which has not been
    /// reached yet.
    #[error("output of job {job} is not ready (status {status})")]
    NotReady {
        /// The job we asked about.
        job: String,
        /// The non-terminal status we observed.
        status: Status,
    },

    /// The local wait budget was exhausted before the job reached a terminal
    /// state. This says nothing about whether the job itself will fail.
    #[error("timed out waiting for job {job} (last status {last_status})")]
    WaitTimeout {
        /// The job we were waiting on.
        job: String,
        /// The last non-terminal status we observed.
        last_status: Status,
    },

    /// A schedule needs a trigger: either a schedule expression or an event
    /// pattern.
    #[error("must specify a schedule expression or an event pattern")]
    InvalidTrigger,

    /// One or more items of a batch operation failed. Carries the outcome of
    /// every item, successes included.
    #[error(
        "{} of {} downloads failed",
        .0.iter().filter(|o| o.result.is_err()).count(),
        .0.len()
    )]
    PartialBatch(Vec<BatchOutcome>),

    /// Local plumbing failures: process spawning, file I/O, JSON parsing.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The platform error code, if this is a platform error.
    pub fn platform_code(&self) -> Option<&str> {
        match self {
            Error::Platform { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// The per-job outcome of a batch download.
#[derive(Debug)]
pub struct BatchOutcome {
    /// The job this outcome belongs to.
    pub job: String,
    /// Where the output landed, or why it didn't.
    pub result: std::result::Result<PathBuf, String>,
}

/// Support for displaying an error with a complete list of causes.
pub trait DisplayCausesExt {
    /// Display the error and its causes.
    fn display_causes(&self) -> DisplayCauses<'_>;
}

impl DisplayCausesExt for Error {
    fn display_causes(&self) -> DisplayCauses<'_> {
        DisplayCauses { err: self }
    }
}

/// Helper type used to display errors.
pub struct DisplayCauses<'a> {
    /// The error to display.
    err: &'a Error,
}

impl fmt::Display for DisplayCauses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.err)?;
        let mut source = std::error::Error::source(self.err);
        while let Some(next) = source {
            writeln!(f, "  caused by: {}", next)?;
            source = next.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_batch_counts_failures() {
        let err = Error::PartialBatch(vec![
            BatchOutcome {
                job: "papermill-a".to_owned(),
                result: Ok(PathBuf::from("a.ipynb")),
            },
            BatchOutcome {
                job: "papermill-b".to_owned(),
                result: Err("no such job".to_owned()),
            },
        ]);
        assert_eq!(err.to_string(), "1 of 2 downloads failed");
    }

    #[test]
    fn display_causes_includes_sources() {
        let inner = anyhow::anyhow!("root cause").context("outer context");
        let err = Error::Other(inner);
        let displayed = err.display_causes().to_string();
        assert!(displayed.contains("ERROR: outer context"));
        assert!(displayed.contains("caused by: root cause"));
    }
}
