//! Polling a notebook run until it reaches a terminal status.

use std::thread::sleep;
use std::time::Instant;

use tracing::debug;

use crate::prelude::*;
use crate::runs::describe_run;

/// Possible status values of a notebook run.
///
/// `Submitted`, `InProgress` and `Stopping` are non-terminal; the other three
/// never transition further. The platform reports everything except
/// `Submitted`, which we use locally for a run that has been accepted but not
/// yet described.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Status {
    /// The run has been submitted but not yet scheduled by the platform.
    Submitted,
    /// The run is currently executing.
    InProgress,
    /// The platform is stopping the run at the user's request.
    Stopping,
    /// The run finished and its output notebook is available.
    Completed,
    /// The run failed. The description carries the platform's failure reason.
    Failed,
    /// The run was stopped before completing.
    Stopped,
}

impl Status {
    /// Has this run reached a state from which it will never transition?
    pub fn is_terminal(self) -> bool {
        match self {
            Status::Submitted | Status::InProgress | Status::Stopping => false,
            Status::Completed | Status::Failed | Status::Stopped => true,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Status::Submitted => "Submitted",
            Status::InProgress => "InProgress",
            Status::Stopping => "Stopping",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Stopped => "Stopped",
        };
        s.fmt(f)
    }
}

/// How a wait should pace itself.
#[derive(Clone, Copy, Debug)]
pub struct WaitOpts {
    /// The base interval between status queries.
    pub poll_interval: Duration,
    /// The cap on the interval as it backs off, to bound API call volume
    /// under long-running jobs.
    pub max_interval: Duration,
    /// The local wait budget. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for WaitOpts {
    fn default() -> Self {
        WaitOpts {
            poll_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            timeout: None,
        }
    }
}

/// Wait for a notebook run to reach a terminal status, and return its final
/// description.
///
/// Polls at `poll_interval`, doubling the interval after each query up to
/// `max_interval`. The wait is purely client-side: dropping it (or killing
/// the process) leaves the remote job running. If `timeout` elapses first,
/// this fails with [`Error::WaitTimeout`] carrying the last observed status;
/// that is a statement about the local wait budget, not about the job.
pub fn wait_for_complete(job_name: &str, opts: &WaitOpts) -> Result<RunDescription> {
    wait_with(|| describe_run(job_name), job_name, opts)
}

/// The polling loop behind [`wait_for_complete`], generic over the status
/// source.
pub(crate) fn wait_with<F>(mut poll: F, job_name: &str, opts: &WaitOpts) -> Result<RunDescription>
where
    F: FnMut() -> Result<RunDescription>,
{
    let started = Instant::now();
    let mut interval = opts.poll_interval;
    loop {
        let desc = poll()?;
        if desc.status.is_terminal() {
            return Ok(desc);
        }
        if let Some(timeout) = opts.timeout {
            // Don't start a sleep that would outlive the budget.
            if started.elapsed() + interval > timeout {
                return Err(Error::WaitTimeout {
                    job: job_name.to_owned(),
                    last_status: desc.status,
                });
            }
        }
        debug!("job {} is {}, polling again in {:?}", job_name, desc.status, interval);
        sleep(interval);
        interval = std::cmp::min(interval * 2, opts.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc_with_status(status: Status) -> RunDescription {
        RunDescription {
            notebook: "weather.ipynb".to_owned(),
            rule: String::new(),
            parameters: "{}".to_owned(),
            job: "papermill-weather-2026-08-23-01-02-03".to_owned(),
            status,
            failure: None,
            created: Utc::now(),
            start: None,
            end: None,
            elapsed: None,
            result: None,
            input: "s3://bucket/papermill_input/notebook.ipynb".to_owned(),
            image: "notebook-runner".to_owned(),
            instance: "ml.m5.large".to_owned(),
            role: "BasicExecuteNotebookRole-us-west-2".to_owned(),
        }
    }

    fn quick_opts() -> WaitOpts {
        WaitOpts {
            poll_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            timeout: None,
        }
    }

    #[test]
    fn waits_until_terminal_without_extra_queries() {
        let statuses = vec![
            Status::Submitted,
            Status::InProgress,
            Status::InProgress,
            Status::Completed,
        ];
        let mut queries = 0;
        let result = wait_with(
            || {
                let status = statuses[queries];
                queries += 1;
                Ok(desc_with_status(status))
            },
            "papermill-weather-2026-08-23-01-02-03",
            &quick_opts(),
        )
        .expect("wait should succeed");
        assert_eq!(result.status, Status::Completed);
        assert_eq!(queries, 4);
    }

    #[test]
    fn failed_description_is_returned_as_is() {
        let result = wait_with(
            || {
                let mut desc = desc_with_status(Status::Failed);
                desc.failure = Some("AlgorithmError: kernel died".to_owned());
                Ok(desc)
            },
            "papermill-weather-2026-08-23-01-02-03",
            &quick_opts(),
        )
        .expect("a failed job is still a successful wait");
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.failure.as_deref(), Some("AlgorithmError: kernel died"));
    }

    #[test]
    fn timeout_reports_last_observed_status() {
        let mut opts = quick_opts();
        opts.poll_interval = Duration::from_millis(5);
        opts.timeout = Some(Duration::from_millis(1));
        let err = wait_with(
            || Ok(desc_with_status(Status::InProgress)),
            "papermill-weather-2026-08-23-01-02-03",
            &opts,
        )
        .expect_err("should run out of budget");
        match err {
            Error::WaitTimeout { job, last_status } => {
                assert_eq!(job, "papermill-weather-2026-08-23-01-02-03");
                assert_eq!(last_status, Status::InProgress);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn poll_errors_propagate() {
        let err = wait_with(
            || {
                Err(Error::Platform {
                    code: "AccessDeniedException".to_owned(),
                    message: "nope".to_owned(),
                })
            },
            "papermill-weather-2026-08-23-01-02-03",
            &quick_opts(),
        )
        .expect_err("platform errors pass through");
        assert_eq!(err.platform_code(), Some("AccessDeniedException"));
    }
}
