//! `pocket-tail`: print the URL of every unread, tagged item as it shows up.
//!
//! Runs the same tailer as the daemon, without extraction or upload, so the stream can be fed
//! to other tools. Failed polls are logged and the loop keeps going until interrupted.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rmd_core::config::DEFAULT_TAG;
use rmd_core::contract::{RetrieveOptions, Source};
use rmd_core::shutdown::{self, ShutdownCoordinator};
use rmd_core::source::PocketClient;
use rmd_core::tailer::{TailEvent, Tailer};
use tracing::{info, trace, warn};

use crate::cli::DEFAULT_POCKET_AUTH;
use crate::load_config::{load_pocket_auth, parse_duration};

/// pocket-tail: follow unread, tagged Pocket items and print their URLs.
#[derive(Debug, Parser)]
#[clap(
    name = "pocket-tail",
    version,
    about = "Print the URLs of unread, tagged Pocket items as they appear"
)]
pub struct TailCli {
    /// Pocket credentials file
    #[clap(
        long,
        env = "RMD_POCKET_AUTH",
        value_name = "FILE",
        default_value = DEFAULT_POCKET_AUTH
    )]
    pub auth: PathBuf,

    /// Use DURATION as the poll interval
    #[clap(
        long,
        short = 'n',
        value_name = "DURATION",
        value_parser = parse_duration,
        default_value = "60s"
    )]
    pub interval: Duration,

    /// Follow only items carrying TAG
    #[clap(long, env = "RMD_TAG", value_name = "TAG", default_value = DEFAULT_TAG)]
    pub tag: String,

    /// Print debugging messages about progress
    #[clap(long, short = 'v', env = "RMD_VERBOSE")]
    pub verbose: bool,
}

/// Write one URL per line to `out` until `interrupt` resolves. Returns how many were printed.
pub async fn print_urls<W, F>(
    source: Arc<dyn Source>,
    tag: &str,
    interval: Duration,
    interrupt: F,
    out: &mut W,
) -> Result<u64>
where
    W: Write,
    F: Future<Output = ()> + Send + 'static,
{
    let mut coordinator = ShutdownCoordinator::new();
    let stop = coordinator.register();
    let signals = coordinator.spawn(interrupt);

    let options = RetrieveOptions::default().unread().with_tag(tag);
    let (mut events, tailer) = Tailer::new(source, options).spawn(interval, stop);

    let mut printed = 0;
    while let Some(event) = events.recv().await {
        match event {
            TailEvent::Item(target) => {
                writeln!(out, "{}", target.url).context("cannot write to output")?;
                out.flush().context("cannot write to output")?;
                printed += 1;
            }
            TailEvent::Failed(e) => warn!(error = %e, "cannot retrieve items"),
        }
    }

    if let Err(e) = tailer.await {
        warn!(error = %e, "tailer task ended abnormally");
    }
    signals.abort();
    trace!(printed, "tail stream closed");
    Ok(printed)
}

pub async fn run(cli: TailCli) -> Result<()> {
    let auth = load_pocket_auth(&cli.auth)?;
    info!(tag = %cli.tag, interval = ?cli.interval, "following source");
    let source = Arc::new(PocketClient::new(auth));
    print_urls(
        source,
        &cli.tag,
        cli.interval,
        shutdown::ctrl_c(),
        &mut std::io::stdout(),
    )
    .await?;
    Ok(())
}
