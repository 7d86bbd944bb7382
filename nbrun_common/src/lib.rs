//! Code shared between the `nbrun` CLI and library users.
//!
//! This crate wraps SageMaker Processing, EventBridge and S3 behind a small
//! job-lifecycle facade: build a notebook-execution request, submit it (once
//! or on a schedule), poll it to a terminal state, and fetch the output
//! notebook. All service calls shell out to the `aws` CLI and parse its JSON
//! output.

#![warn(missing_docs)]

pub mod aws;
pub mod download;
pub mod errors;
pub mod names;
pub mod poll;
pub mod request;
pub mod rules;
pub mod runs;
pub mod storage;
pub mod submit;
pub mod tracker;
pub mod tracing_support;

/// Common imports used by many modules.
pub mod prelude {
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use std::{
        collections::HashMap,
        fmt,
        path::{Path, PathBuf},
        time::Duration,
    };

    pub use crate::errors::{Error, Result};
    pub use crate::poll::Status;
    pub use crate::runs::RunDescription;
}

pub use crate::errors::{Error, Result};
