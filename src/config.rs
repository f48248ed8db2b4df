// rmd-core/src/config.rs

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::connection::Credentials;
use crate::contract::RetrieveOptions;

pub const DEFAULT_DEST_DIR: &str = "/Pocket";
pub const DEFAULT_TAG: &str = "rm";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECTION_ATTEMPTS: u32 = 3;

/// Everything the pipeline needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Destination directory on the remote store.
    pub dest_dir: String,
    /// Only items carrying this tag are mirrored.
    pub tag: String,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub convert_timeout: Duration,
    /// Credential regenerations allowed at startup, after the first attempt.
    pub connection_attempts: u32,
    /// Keep local artifacts after they were handed to the store.
    pub keep: bool,
    /// Parent of the per-worker output directories.
    pub work_dir: PathBuf,
    pub credentials: Credentials,
}

impl PipelineConfig {
    /// Defaults for everything but the working directory and the credentials.
    pub fn new(work_dir: impl Into<PathBuf>, credentials: Credentials) -> Self {
        Self {
            dest_dir: DEFAULT_DEST_DIR.to_string(),
            tag: DEFAULT_TAG.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_timeout: DEFAULT_TIMEOUT,
            convert_timeout: DEFAULT_TIMEOUT,
            connection_attempts: DEFAULT_CONNECTION_ATTEMPTS,
            keep: false,
            work_dir: work_dir.into(),
            credentials,
        }
    }

    /// Options for the tailer: unread items with the configured tag, oldest first.
    pub fn retrieve_options(&self) -> RetrieveOptions {
        RetrieveOptions::default().unread().with_tag(self.tag.clone())
    }

    pub fn trace_loaded(&self) {
        info!(
            dest_dir = %self.dest_dir,
            tag = %self.tag,
            poll_interval = ?self.poll_interval,
            fetch_timeout = ?self.fetch_timeout,
            convert_timeout = ?self.convert_timeout,
            connection_attempts = self.connection_attempts,
            keep = self.keep,
            work_dir = %self.work_dir.display(),
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}
