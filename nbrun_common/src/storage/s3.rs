//! Support for AWS S3 storage, based on the `aws` CLI.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;

use super::ObjectStorage;
use crate::aws;
use crate::prelude::*;

/// Backend for talking to AWS S3.
#[derive(Debug)]
pub struct S3Storage;

impl S3Storage {
    /// Create a new `S3Storage` backend.
    pub fn new() -> Self {
        S3Storage
    }
}

impl Default for S3Storage {
    fn default() -> Self {
        S3Storage::new()
    }
}

impl ObjectStorage for S3Storage {
    fn upload(&self, local_path: &Path, uri: &str) -> Result<()> {
        trace!("uploading {} to {}", local_path.display(), uri);
        parse_s3_url(uri)?;
        let local = local_path.to_str().ok_or_else(|| {
            Error::Validation(format!("non-UTF-8 path {:?}", local_path))
        })?;
        aws::aws(&["s3", "cp", "--no-progress", local, uri])
    }

    fn download(&self, uri: &str, local_path: &Path) -> Result<()> {
        trace!("downloading {} to {}", uri, local_path.display());
        parse_s3_url(uri)?;
        let local = local_path.to_str().ok_or_else(|| {
            Error::Validation(format!("non-UTF-8 path {:?}", local_path))
        })?;
        aws::aws(&["s3", "cp", "--no-progress", uri, local])
    }
}

/// Parse an S3 URL into a bucket and a key.
pub fn parse_s3_url(url: &str) -> Result<(&str, &str)> {
    lazy_static! {
        static ref RE: Regex = Regex::new("^s3://(?P<bucket>[^/]+)(?:/(?P<key>.*))?$")
            .expect("couldn't parse built-in regex");
    }

    let caps = RE
        .captures(url)
        .ok_or_else(|| Error::Validation(format!("the URL {:?} could not be parsed", url)))?;
    let bucket = caps
        .name("bucket")
        .expect("missing hard-coded capture???")
        .as_str();
    let key = caps.name("key").map(|m| m.as_str()).unwrap_or("");

    Ok((bucket, key))
}

#[test]
fn url_parsing() {
    assert_eq!(parse_s3_url("s3://top-level").unwrap(), ("top-level", ""));
    assert_eq!(parse_s3_url("s3://top-level/").unwrap(), ("top-level", ""));
    assert_eq!(
        parse_s3_url("s3://top-level/path").unwrap(),
        ("top-level", "path")
    );
    assert_eq!(
        parse_s3_url("s3://top-level/path/").unwrap(),
        ("top-level", "path/")
    );
    assert!(parse_s3_url("gs://foo/").is_err());
}
