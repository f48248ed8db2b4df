//! Pipeline: wires the tailer, the workers and the uploader into one continuous sync run.
//!
//! # Lifecycle
//! 1. check the converter is available (fatal otherwise)
//! 2. connect to the remote store, regenerating the session credential if needed (fatal after
//!    the configured number of attempts)
//! 3. create the destination directory; "already exists" is fine, anything else is fatal
//! 4. spawn the uploader, register stop listeners, arm the interrupt handler
//! 5. spawn the tailer and start one worker per emitted target, with increasing sequence ids
//! 6. when the tail stream closes (after a stop), wait for every in-flight worker, then join
//!    the uploader
//!
//! # Error Handling
//! Only startup failures surface as [`PipelineError`]. Once polling has begun every failure is
//! per-item or per-poll: logged, counted in the [`SyncReport`] and otherwise ignored.
//!
//! # Callable From
//! - The `rmd` binary with the stock adapters and [`crate::shutdown::ctrl_c`]
//! - Tests, with mocks from [`crate::contract`] and any future as the interrupt

use std::future::Future;
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{error, info, trace, warn};

use crate::config::PipelineConfig;
use crate::connection::connect_with_retry;
use crate::contract::{Connector, Converter, Extractor, Session, Source};
use crate::error::PipelineError;
use crate::shutdown::ShutdownCoordinator;
use crate::tailer::{TailEvent, Tailer};
use crate::uploader::{UploadReport, Uploader, UploaderHandle, UploaderSettings};
use crate::worker::{spawn_worker, WorkerContext};

/// The external systems a run talks to.
pub struct Collaborators {
    pub source: Arc<dyn Source>,
    pub extractor: Arc<dyn Extractor>,
    pub converter: Arc<dyn Converter>,
    pub connector: Arc<dyn Connector>,
}

/// What a finished run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Workers started, one per emitted target.
    pub spawned: u64,
    /// Failed polls and unusable items reported by the tailer.
    pub poll_failures: u64,
    pub uploads: UploadReport,
}

async fn ensure_destination(
    session: &mut dyn Session,
    dest_dir: &str,
) -> Result<(), PipelineError> {
    match session.mkdir(dest_dir).await {
        Ok(()) => {
            info!(dest_dir, "destination directory created");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            trace!(dest_dir, "destination directory already exists");
            Ok(())
        }
        Err(source) => Err(PipelineError::Destination {
            path: dest_dir.to_string(),
            source,
        }),
    }
}

/// Run the pipeline until `interrupt` resolves and all in-flight work has drained.
pub async fn run<F>(
    config: PipelineConfig,
    collaborators: Collaborators,
    interrupt: F,
) -> Result<SyncReport, PipelineError>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.trace_loaded();
    let Collaborators {
        source,
        extractor,
        converter,
        connector,
    } = collaborators;

    converter.ensure_available()?;

    let mut credentials = config.credentials.clone();
    let mut session = connect_with_retry(
        connector.as_ref(),
        &mut credentials,
        config.connection_attempts,
    )
    .await?;
    info!("connected to remote store");
    ensure_destination(session.as_mut(), &config.dest_dir).await?;

    let mut coordinator = ShutdownCoordinator::new();
    let uploader_stop = coordinator.register();
    let tailer_stop = coordinator.register();

    let UploaderHandle {
        queue,
        join: uploader,
    } = Uploader::new(
        session,
        connector,
        credentials,
        UploaderSettings {
            dest_dir: config.dest_dir.clone(),
            keep: config.keep,
        },
    )
    .spawn(uploader_stop);

    let signals = coordinator.spawn(interrupt);

    let (mut events, tailer) =
        Tailer::new(source, config.retrieve_options()).spawn(config.poll_interval, tailer_stop);

    let ctx = Arc::new(WorkerContext {
        extractor,
        converter,
        work_dir: config.work_dir.clone(),
        fetch_timeout: config.fetch_timeout,
        convert_timeout: config.convert_timeout,
        uploads: queue,
    });
    let tracker = TaskTracker::new();
    let mut report = SyncReport::default();

    while let Some(event) = events.recv().await {
        match event {
            TailEvent::Item(target) => {
                let seq = report.spawned;
                trace!(seq, item_id = %target.item_id, url = %target.url, "starting worker");
                spawn_worker(&tracker, seq, target, ctx.clone());
                report.spawned += 1;
            }
            TailEvent::Failed(e) => {
                report.poll_failures += 1;
                error!(error = %e, "cannot retrieve items");
            }
        }
    }

    trace!(in_flight = tracker.len(), "tail stream closed, waiting for workers");
    tracker.close();
    drop(ctx);
    tracker.wait().await;

    if let Err(e) = tailer.await {
        warn!(error = %e, "tailer task ended abnormally");
    }
    report.uploads = match uploader.await {
        Ok(uploads) => uploads,
        Err(e) => {
            warn!(error = %e, "uploader task ended abnormally");
            UploadReport::default()
        }
    };
    signals.abort();

    info!(
        spawned = report.spawned,
        poll_failures = report.poll_failures,
        uploaded = report.uploads.uploaded,
        skipped = report.uploads.skipped,
        abandoned = report.uploads.abandoned,
        "sync finished"
    );
    Ok(report)
}
