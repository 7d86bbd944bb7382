//! Object storage backends.
//!
//! The facade treats storage locations as opaque URI strings with a scheme
//! prefix; it only ever needs to put a notebook in and copy a notebook out.

use std::env;
use std::path::Path;

use chrono::Utc;

use crate::aws;
use crate::prelude::*;

pub mod s3;

/// Abstract interface to an object storage backend.
pub trait ObjectStorage: std::fmt::Debug {
    /// Upload `local_path` to `uri`.
    fn upload(&self, local_path: &Path, uri: &str) -> Result<()>;

    /// Download the object at `uri` to `local_path`, overwriting any existing
    /// file. Copies are atomic at the object-store level, so no partial-write
    /// protection is needed.
    fn download(&self, uri: &str, local_path: &Path) -> Result<()>;
}

/// Get the storage backend for the specified URI.
pub fn for_uri(uri: &str) -> Result<Box<dyn ObjectStorage>> {
    if uri.starts_with("s3://") {
        Ok(Box::new(s3::S3Storage::new()))
    } else {
        Err(Error::Validation(format!(
            "cannot find storage backend for {:?}",
            uri
        )))
    }
}

/// The name of the bucket shared with the SageMaker SDK tooling,
/// `sagemaker-<region>-<account>`, unless overridden with
/// `NBRUN_DEFAULT_BUCKET`.
pub fn default_bucket() -> Result<String> {
    if let Ok(bucket) = env::var("NBRUN_DEFAULT_BUCKET") {
        if !bucket.is_empty() {
            return Ok(bucket);
        }
    }
    let region = aws::region()?;
    let account = aws::caller_account()?;
    Ok(format!("sagemaker-{}-{}", region, account))
}

/// Upload a local notebook to the shared input prefix, returning the
/// resulting S3 URI. The object name carries an upload timestamp so repeated
/// runs of the same notebook never collide.
pub fn upload_notebook(notebook: &Path) -> Result<String> {
    let timestamp = Utc::now().format("%Y-%m-%d-%H-%M-%S");
    let uri = format!(
        "s3://{}/papermill_input/notebook-{}.ipynb",
        default_bucket()?,
        timestamp
    );
    for_uri(&uri)?.upload(notebook, &uri)?;
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_schemes_are_rejected() {
        let err = for_uri("gs://bucket/path").expect_err("only s3 is supported");
        assert!(err.to_string().contains("cannot find storage backend"));
    }
}
