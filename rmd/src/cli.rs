//! CLI interface for rmd: flag parsing, settings resolution, logging setup and the `run`
//! entrypoint.
//!
//! All pipeline logic lives in the [`rmd_core`] crate. This module only turns flags,
//! environment variables and the optional YAML file into a [`PipelineConfig`] plus the stock
//! adapters, then runs the pipeline until interrupted.
//!
//! ## Precedence
//! command line, then `RMD_*` environment variables (also read from `.env`), then the
//! `--config` file, then built-in defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rmd_core::config::{
    PipelineConfig, DEFAULT_CONNECTION_ATTEMPTS, DEFAULT_DEST_DIR, DEFAULT_POLL_INTERVAL,
    DEFAULT_TAG, DEFAULT_TIMEOUT,
};
use rmd_core::connection::Credentials;
use rmd_core::convert::{PandocConverter, DEFAULT_CONVERTER};
use rmd_core::extract::HttpExtractor;
use rmd_core::pipeline::{self, Collaborators};
use rmd_core::shutdown;
use rmd_core::source::{PocketAuth, PocketClient};
use rmd_core::store::{MirrorConnector, DEFAULT_TOKEN_URL};
use tempfile::TempDir;
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

use crate::load_config::{load_config, load_pocket_auth, parse_duration, FileConfig};

pub const DEFAULT_POCKET_AUTH: &str = "~/.pocket";

/// rmd: mirror unread, tagged read-it-later articles to an e-reader cloud folder.
#[derive(Debug, Parser)]
#[clap(
    name = "rmd",
    version,
    about = "Mirror unread, tagged Pocket articles to a reMarkable cloud folder as EPUB files"
)]
pub struct Cli {
    /// Use PATH as the cloud destination path [default: /Pocket]
    #[clap(long, short = 'd', env = "RMD_DEST", value_name = "PATH")]
    pub dest: Option<String>,

    /// Use DURATION as the poll interval [default: 10s]
    #[clap(
        long,
        short = 'n',
        env = "RMD_INTERVAL",
        value_name = "DURATION",
        value_parser = parse_duration
    )]
    pub interval: Option<Duration>,

    /// Use DURATION as the hard timeout for retrieval and conversion [default: 30s]
    #[clap(
        long,
        short = 't',
        env = "RMD_TIMEOUT",
        value_name = "DURATION",
        value_parser = parse_duration
    )]
    pub timeout: Option<Duration>,

    /// Use NUM as the number of credential regenerations when connecting [default: 3]
    #[clap(long, env = "RMD_RETRY", value_name = "NUM")]
    pub retry: Option<u32>,

    /// Keep all temporary files
    #[clap(long, env = "RMD_KEEP")]
    pub keep: bool,

    /// Print debugging messages about progress
    #[clap(long, short = 'v', env = "RMD_VERBOSE")]
    pub verbose: bool,

    /// Mirror only items carrying TAG [default: rm]
    #[clap(long, env = "RMD_TAG", value_name = "TAG")]
    pub tag: Option<String>,

    /// Use PROGRAM as the document converter [default: pandoc]
    #[clap(long, env = "RMD_CONVERTER", value_name = "PROGRAM")]
    pub converter: Option<String>,

    /// Cloud API device token
    #[clap(long, env = "RMD_RM_DEVICE_TOKEN", hide_env_values = true)]
    pub rm_device: Option<String>,

    /// Cloud API user token; generated when missing or stale
    #[clap(long, env = "RMD_RM_USER_TOKEN", hide_env_values = true)]
    pub rm_user: Option<String>,

    /// Pocket API consumer key (overrides the credentials file)
    #[clap(long, env = "RMD_POCKET_KEY", hide_env_values = true)]
    pub pocket_key: Option<String>,

    /// Pocket API access token (overrides the credentials file)
    #[clap(long, env = "RMD_POCKET_TOKEN", hide_env_values = true)]
    pub pocket_token: Option<String>,

    /// Pocket credentials file [default: ~/.pocket]
    #[clap(long, env = "RMD_POCKET_AUTH", value_name = "FILE")]
    pub pocket_auth: Option<PathBuf>,

    /// Local folder mirroring the cloud document tree
    #[clap(long, env = "RMD_STORE_ROOT", value_name = "DIR")]
    pub store_root: Option<PathBuf>,

    /// Endpoint issuing user tokens from the device token
    #[clap(long, env = "RMD_TOKEN_URL", value_name = "URL")]
    pub token_url: Option<String>,

    /// YAML file supplying values for anything not given above
    #[clap(long, env = "RMD_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Fully resolved settings for one run.
#[derive(Debug)]
pub struct Settings {
    pub dest: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retry: u32,
    pub keep: bool,
    pub tag: String,
    pub converter: String,
    pub credentials: Credentials,
    pub pocket: PocketAuth,
    pub store_root: PathBuf,
    pub token_url: String,
}

fn file_duration(raw: Option<String>, key: &str) -> Result<Option<Duration>> {
    raw.map(|r| parse_duration(&r).map_err(anyhow::Error::msg))
        .transpose()
        .with_context(|| format!("invalid `{key}` in config file"))
}

impl Settings {
    /// Merge command line/environment values over the config file and defaults.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self> {
        let device = cli.rm_device.or(file.rm_device).unwrap_or_default();
        if device.is_empty() {
            bail!("missing cloud device token (--rm-device or RMD_RM_DEVICE_TOKEN)");
        }
        let store_root = match cli.store_root.or(file.store_root) {
            Some(root) => root,
            None => bail!("missing store root (--store-root or RMD_STORE_ROOT)"),
        };

        let pocket = match (
            cli.pocket_key.or(file.pocket_key),
            cli.pocket_token.or(file.pocket_token),
        ) {
            (Some(consumer_key), Some(access_token)) => PocketAuth {
                consumer_key,
                access_token,
            },
            _ => {
                let path = cli
                    .pocket_auth
                    .or(file.pocket_auth)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_POCKET_AUTH));
                load_pocket_auth(&path)?
            }
        };

        Ok(Self {
            dest: cli.dest.or(file.dest).unwrap_or_else(|| DEFAULT_DEST_DIR.to_string()),
            interval: cli
                .interval
                .or(file_duration(file.interval, "interval")?)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            timeout: cli
                .timeout
                .or(file_duration(file.timeout, "timeout")?)
                .unwrap_or(DEFAULT_TIMEOUT),
            retry: cli.retry.or(file.retry).unwrap_or(DEFAULT_CONNECTION_ATTEMPTS),
            keep: cli.keep || file.keep.unwrap_or(false),
            tag: cli.tag.or(file.tag).unwrap_or_else(|| DEFAULT_TAG.to_string()),
            converter: cli
                .converter
                .or(file.converter)
                .unwrap_or_else(|| DEFAULT_CONVERTER.to_string()),
            credentials: Credentials {
                device,
                session: cli.rm_user.or(file.rm_user).unwrap_or_default(),
            },
            pocket,
            store_root,
            token_url: cli
                .token_url
                .or(file.token_url)
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        })
    }

    pub fn pipeline_config(&self, work_dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::new(work_dir, self.credentials.clone());
        config.dest_dir = self.dest.clone();
        config.tag = self.tag.clone();
        config.poll_interval = self.interval;
        config.fetch_timeout = self.timeout;
        config.convert_timeout = self.timeout;
        config.connection_attempts = self.retry;
        config.keep = self.keep;
        config
    }
}

/// Install the global subscriber: `warn` by default, everything from rmd under `verbose`.
/// `RUST_LOG` takes precedence over both. Logs go to stderr.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,rmd=trace,rmd_core=trace"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries the companion tools' output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn finish_work_dir(work_dir: TempDir, keep: bool) {
    if keep {
        let path = work_dir.keep();
        info!(path = %path.display(), "working directory kept");
        return;
    }
    let path = work_dir.path().to_path_buf();
    match work_dir.close() {
        Ok(()) => trace!(path = %path.display(), "working directory removed"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove working directory"),
    }
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(cli, file)?;

    let work_dir = tempfile::Builder::new()
        .prefix("rmd")
        .tempdir()
        .context("failed to create working directory")?;
    trace!(path = %work_dir.path().display(), "working directory created");

    let config = settings.pipeline_config(work_dir.path());
    let collaborators = Collaborators {
        source: Arc::new(PocketClient::new(settings.pocket.clone())),
        extractor: Arc::new(HttpExtractor::new()),
        converter: Arc::new(PandocConverter::with_program(settings.converter.clone())),
        connector: Arc::new(MirrorConnector::new(
            settings.store_root.clone(),
            settings.token_url.clone(),
        )),
    };

    let result = pipeline::run(config, collaborators, shutdown::ctrl_c()).await;
    finish_work_dir(work_dir, settings.keep);

    let report = result.context("synchronisation failed")?;
    info!(?report, "Synchronisation complete");
    Ok(())
}
