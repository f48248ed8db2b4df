//! Error taxonomy for the pipeline.
//!
//! Per-item errors ([`SourceError`] per poll, [`ExtractError`], [`ConvertError`], [`StoreError`]
//! per upload) are contained by the task that hit them. Only [`PipelineError`] stops the process,
//! and only before polling has started.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source responded with status {status}; X-Error=[{message}]")]
    Http { status: u16, message: String },
    #[error("source request failed: {0}")]
    Transport(String),
    #[error("malformed retrieve response: {0}")]
    Decoding(String),
    #[error("item {item_id} has an invalid url {url:?}: {reason}")]
    InvalidUrl {
        item_id: String,
        url: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("fetch of {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("fetch of {url} returned status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("converter program {0:?} not found in PATH")]
    MissingProgram(String),
    #[error("conversion timed out (> {timeout:?}): {program}")]
    Timeout { program: String, timeout: Duration },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("conversion i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote store failures. `AlreadyExists` is a condition callers treat as success.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("remote store error: {0}")]
    Api(String),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

/// Everything that can go wrong inside one worker. Never fatal for the pipeline.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("cannot prepare {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("uploader is no longer accepting artifacts")]
    UploaderGone,
}

/// Startup failures that stop the process before any polling begins.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cannot connect to remote store after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("cannot create destination directory {path}: {source}")]
    Destination {
        path: String,
        #[source]
        source: StoreError,
    },
}

impl From<ConvertError> for PipelineError {
    fn from(e: ConvertError) -> Self {
        PipelineError::Configuration(e.to_string())
    }
}
