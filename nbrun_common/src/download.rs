//! Fetching output notebooks back to the local filesystem.

use std::fs;

use anyhow::Context;
use tracing::debug;

use crate::prelude::*;
use crate::errors::BatchOutcome;
use crate::runs::{describe_run, RunDescription};
use crate::storage::{self, ObjectStorage};

/// Download the output notebook of a completed run into `output_dir`,
/// returning the local path. Fails with [`Error::NotReady`] while the run is
/// still in flight.
pub fn download_notebook(job_name: &str, output_dir: &Path) -> Result<PathBuf> {
    let desc = describe_run(job_name)?;
    let storage = desc
        .result
        .as_deref()
        .map(storage::for_uri)
        .transpose()?;
    download_described(&desc, output_dir, storage.as_deref())
}

/// The testable core of [`download_notebook`]: decide whether the run's
/// output exists, then copy it. The status check happens before any storage
/// call, so asking too early costs nothing.
pub(crate) fn download_described(
    desc: &RunDescription,
    output_dir: &Path,
    storage: Option<&dyn ObjectStorage>,
) -> Result<PathBuf> {
    if desc.status != Status::Completed {
        return Err(Error::NotReady {
            job: desc.job.clone(),
            status: desc.status,
        });
    }
    let result = desc.result.as_deref().ok_or_else(|| {
        Error::Validation(format!("job {} has no recorded output object", desc.job))
    })?;
    let storage = storage.ok_or_else(|| {
        Error::Validation(format!("no storage backend for {:?}", result))
    })?;

    let filename = result.rsplit('/').next().unwrap_or(result);
    let local_path = output_dir.join(filename);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("error creating {}", output_dir.display()))?;
    debug!("downloading {} to {}", result, local_path.display());
    storage.download(result, &local_path)?;
    Ok(local_path)
}

/// Download the output notebooks of several runs. All downloads are
/// attempted; if any fail, the error carries the outcome of every run, so a
/// batch is never silently half-fetched.
pub fn download_all(job_names: &[String], output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut outcomes = vec![];
    for job_name in job_names {
        let result = download_notebook(job_name, output_dir);
        outcomes.push(BatchOutcome {
            job: job_name.clone(),
            result: result.map_err(|err| err.to_string()),
        });
    }
    if outcomes.iter().any(|outcome| outcome.result.is_err()) {
        Err(Error::PartialBatch(outcomes))
    } else {
        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.result.expect("checked above"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Storage that records how often it was asked to copy.
    #[derive(Debug)]
    struct CountingStorage {
        downloads: Cell<usize>,
        fail: bool,
    }

    impl CountingStorage {
        fn new(fail: bool) -> Self {
            CountingStorage {
                downloads: Cell::new(0),
                fail,
            }
        }
    }

    impl ObjectStorage for CountingStorage {
        fn upload(&self, _local_path: &Path, _uri: &str) -> Result<()> {
            panic!("downloads never upload");
        }

        fn download(&self, _uri: &str, local_path: &Path) -> Result<()> {
            self.downloads.set(self.downloads.get() + 1);
            if self.fail {
                Err(Error::Validation("simulated copy failure".to_owned()))
            } else {
                std::fs::write(local_path, b"{}").map_err(|e| Error::Other(e.into()))
            }
        }
    }

    fn completed_desc() -> RunDescription {
        RunDescription {
            notebook: "weather.ipynb".to_owned(),
            rule: String::new(),
            parameters: "{}".to_owned(),
            job: "papermill-weather-2026-08-23-01-02-03".to_owned(),
            status: Status::Completed,
            failure: None,
            created: Utc::now(),
            start: None,
            end: None,
            elapsed: None,
            result: Some(
                "s3://bucket/papermill_output/weather-2026-08-23-01-02-03.ipynb".to_owned(),
            ),
            input: "s3://bucket/papermill_input/notebook.ipynb".to_owned(),
            image: "notebook-runner".to_owned(),
            instance: "ml.m5.large".to_owned(),
            role: "BasicExecuteNotebookRole-us-west-2".to_owned(),
        }
    }

    #[test]
    fn completed_output_lands_under_its_own_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CountingStorage::new(false);
        let path = download_described(&completed_desc(), dir.path(), Some(&storage))
            .expect("download should succeed");
        assert_eq!(
            path,
            dir.path().join("weather-2026-08-23-01-02-03.ipynb")
        );
        assert_eq!(storage.downloads.get(), 1);
    }

    #[test]
    fn unfinished_runs_are_rejected_before_any_copy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CountingStorage::new(false);
        let mut desc = completed_desc();
        desc.status = Status::InProgress;
        desc.result = None;
        let err = download_described(&desc, dir.path(), Some(&storage))
            .expect_err("in-flight runs have no output");
        match err {
            Error::NotReady { job, status } => {
                assert_eq!(job, desc.job);
                assert_eq!(status, Status::InProgress);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(storage.downloads.get(), 0);
    }

    #[test]
    fn copy_failures_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CountingStorage::new(true);
        let err = download_described(&completed_desc(), dir.path(), Some(&storage))
            .expect_err("copy failure should surface");
        assert!(err.to_string().contains("simulated copy failure"));
    }
}
