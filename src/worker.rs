//! Retrieval/conversion workers: one short-lived task per discovered target.
//!
//! A worker fetches and extracts the page, converts it into an EPUB inside its own
//! `work_dir/<seq>/` directory and hands the artifact to the uploader. Any failure abandons
//! that single item. Workers are spawned on a shared [`TaskTracker`] so the pipeline can wait
//! for all of them before exiting. The pool is unbounded: one task per item.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, trace, warn};

use crate::contract::{Artifact, Converter, Extractor};
use crate::error::{ConvertError, ExtractError, WorkerError};
use crate::slug::slug;
use crate::tailer::Target;

pub const ARTIFACT_EXTENSION: &str = "epub";

pub struct WorkerContext {
    pub extractor: Arc<dyn Extractor>,
    pub converter: Arc<dyn Converter>,
    pub work_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub convert_timeout: Duration,
    pub uploads: mpsc::Sender<Artifact>,
}

/// Run `fut` under `timeout`, whatever the collaborator does with its own deadline.
async fn bounded<T, E>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(on_timeout()))
}

/// Fetch, extract and convert one target into a local artifact.
pub async fn process_item(
    seq: u64,
    target: &Target,
    ctx: &WorkerContext,
) -> Result<Artifact, WorkerError> {
    let url = target.url.as_str();
    trace!(seq, url, "retrieving item");
    let article = bounded(
        ctx.fetch_timeout,
        ctx.extractor.extract(url, ctx.fetch_timeout),
        || ExtractError::Timeout {
            url: url.to_string(),
            timeout: ctx.fetch_timeout,
        },
    )
    .await?;

    let name = slug(&article);
    trace!(seq, item = %name, "item retrieved");

    let dir = ctx.work_dir.join(seq.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| WorkerError::WorkDir {
            path: dir.clone(),
            source,
        })?;
    let output = dir.join(format!("{name}.{ARTIFACT_EXTENSION}"));

    trace!(seq, path = %output.display(), "converting item");
    bounded(
        ctx.convert_timeout,
        ctx.converter.convert(&article, &output, ctx.convert_timeout),
        || ConvertError::Timeout {
            program: "converter".to_string(),
            timeout: ctx.convert_timeout,
        },
    )
    .await?;
    trace!(seq, path = %output.display(), "item converted");

    Ok(Artifact {
        seq,
        item_id: target.item_id.clone(),
        path: output,
    })
}

/// Full worker body: process the item and submit the artifact. Failures are logged here.
pub async fn run_worker(
    seq: u64,
    target: Target,
    ctx: Arc<WorkerContext>,
) -> Result<(), WorkerError> {
    trace!(seq, item_id = %target.item_id, "worker started");
    let result = match process_item(seq, &target, &ctx).await {
        Ok(artifact) => {
            let path = artifact.path.clone();
            match ctx.uploads.send(artifact).await {
                Ok(()) => {
                    info!(
                        seq,
                        item_id = %target.item_id,
                        path = %path.display(),
                        "item queued for upload"
                    );
                    Ok(())
                }
                Err(_) => {
                    warn!(
                        seq,
                        item_id = %target.item_id,
                        path = %path.display(),
                        "uploader stopped, artifact dropped"
                    );
                    Err(WorkerError::UploaderGone)
                }
            }
        }
        Err(e) => {
            warn!(
                seq,
                item_id = %target.item_id,
                url = %target.url,
                error = %e,
                "item processing failed, skipping"
            );
            Err(e)
        }
    };
    trace!(seq, "worker done");
    result
}

/// Spawn one worker on the shared completion tracker.
pub fn spawn_worker(
    tracker: &TaskTracker,
    seq: u64,
    target: Target,
    ctx: Arc<WorkerContext>,
) -> JoinHandle<Result<(), WorkerError>> {
    tracker.spawn(run_worker(seq, target, ctx))
}
