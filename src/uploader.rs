//! Uploader: the single task that talks to the remote store.
//!
//! All uploads are serialised here so "already exists" handling and the reconnect-and-retry
//! policy live in one place. Per artifact:
//! 1. upload into the destination directory
//! 2. "already exists" is a skip, not an error
//! 3. any other failure triggers exactly one reconnect and one retry
//! 4. a failed retry abandons the artifact (it is never requeued)
//! 5. unless `keep` is set, the local artifact is removed afterwards
//!
//! On stop the task returns at once; artifacts still queued are dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{reconnect, Credentials};
use crate::contract::{Artifact, Connector, Session};
use crate::shutdown::StopSignal;

pub const UPLOAD_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct UploaderSettings {
    /// Destination directory on the remote store.
    pub dest_dir: String,
    /// Keep local artifacts after upload.
    pub keep: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The destination already had it.
    Skipped,
    Abandoned,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

impl UploadReport {
    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded => self.uploaded += 1,
            UploadOutcome::Skipped => self.skipped += 1,
            UploadOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

pub struct UploaderHandle {
    /// Inbound queue; workers send finished artifacts here.
    pub queue: mpsc::Sender<Artifact>,
    pub join: JoinHandle<UploadReport>,
}

pub struct Uploader {
    session: Box<dyn Session>,
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    settings: UploaderSettings,
}

impl Uploader {
    pub fn new(
        session: Box<dyn Session>,
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        settings: UploaderSettings,
    ) -> Self {
        Self {
            session,
            connector,
            credentials,
            settings,
        }
    }

    /// Upload with the skip/reconnect/retry policy. Does not touch the local file.
    pub async fn upload_one(&mut self, artifact: &Artifact) -> UploadOutcome {
        let dest = self.settings.dest_dir.as_str();
        let err = match self.session.upload(&artifact.path, dest).await {
            Ok(()) => return UploadOutcome::Uploaded,
            Err(e) if e.is_already_exists() => {
                trace!(
                    seq = artifact.seq,
                    item_id = %artifact.item_id,
                    "file already exists, skipping"
                );
                return UploadOutcome::Skipped;
            }
            Err(e) => e,
        };

        warn!(
            seq = artifact.seq,
            item_id = %artifact.item_id,
            path = %artifact.path.display(),
            error = %err,
            "document upload failed, refreshing connection"
        );
        match reconnect(self.connector.as_ref(), &mut self.credentials).await {
            Ok(session) => {
                self.session = session;
                trace!(seq = artifact.seq, "connection refreshed");
            }
            Err(e) => {
                error!(
                    seq = artifact.seq,
                    item_id = %artifact.item_id,
                    error = %e,
                    "cannot refresh connection, skipping document"
                );
                return UploadOutcome::Abandoned;
            }
        }

        match self.session.upload(&artifact.path, dest).await {
            Ok(()) => UploadOutcome::Uploaded,
            Err(e) if e.is_already_exists() => {
                trace!(
                    seq = artifact.seq,
                    item_id = %artifact.item_id,
                    "file already exists, skipping"
                );
                UploadOutcome::Skipped
            }
            Err(e) => {
                error!(
                    seq = artifact.seq,
                    item_id = %artifact.item_id,
                    path = %artifact.path.display(),
                    error = %e,
                    "document upload failed after reconnect, skipping document"
                );
                UploadOutcome::Abandoned
            }
        }
    }

    /// Remove the artifact and its per-worker directory. Failures are logged only.
    async fn cleanup(artifact: &Artifact) {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => {
                trace!(seq = artifact.seq, path = %artifact.path.display(), "document removed")
            }
            Err(e) => {
                warn!(
                    seq = artifact.seq,
                    path = %artifact.path.display(),
                    error = %e,
                    "failed to remove document"
                );
                return;
            }
        }
        let Some(parent) = artifact.path.parent() else {
            return;
        };
        let seq_dir = artifact.seq.to_string();
        if parent.file_name().and_then(|n| n.to_str()) == Some(seq_dir.as_str()) {
            if let Err(e) = tokio::fs::remove_dir(parent).await {
                debug!(path = %parent.display(), error = %e, "worker directory left in place");
            }
        }
    }

    /// Upload one artifact and apply the local cleanup policy.
    pub async fn handle(&mut self, artifact: Artifact) -> UploadOutcome {
        let outcome = self.upload_one(&artifact).await;
        if outcome == UploadOutcome::Uploaded {
            info!(seq = artifact.seq, item_id = %artifact.item_id, "document uploaded");
        }
        if !self.settings.keep {
            Self::cleanup(&artifact).await;
        }
        outcome
    }

    /// Drain the inbound queue on a dedicated task until `stop` fires.
    pub fn spawn(mut self, mut stop: StopSignal) -> UploaderHandle {
        let (tx, mut rx) = mpsc::channel::<Artifact>(UPLOAD_QUEUE_CAPACITY);
        let join = tokio::spawn(async move {
            trace!("uploader started");
            let mut report = UploadReport::default();
            loop {
                tokio::select! {
                    biased;
                    _ = stop.recv() => {
                        trace!(dropped = rx.len(), "uploader received shutdown request");
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(artifact) => {
                            let outcome = self.handle(artifact).await;
                            report.record(outcome);
                        }
                        None => {
                            trace!("upload queue closed");
                            break;
                        }
                    }
                }
            }
            trace!(?report, "uploader done");
            report
        });
        UploaderHandle { queue: tx, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockConnector, MockSession};
    use crate::error::StoreError;
    use crate::shutdown::ShutdownCoordinator;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    fn artifact(dir: &TempDir, seq: u64) -> Artifact {
        let seq_dir = dir.path().join(seq.to_string());
        std::fs::create_dir_all(&seq_dir).unwrap();
        let path = seq_dir.join("doc.epub");
        std::fs::write(&path, b"epub").unwrap();
        Artifact {
            seq,
            item_id: format!("item-{seq}"),
            path,
        }
    }

    fn settings(keep: bool) -> UploaderSettings {
        UploaderSettings {
            dest_dir: "/Pocket".into(),
            keep,
        }
    }

    fn creds() -> Credentials {
        Credentials {
            device: "device".into(),
            session: "session".into(),
        }
    }

    fn session_returning(
        result: impl Fn() -> Result<(), StoreError> + Send + 'static,
    ) -> MockSession {
        let mut session = MockSession::new();
        session
            .expect_upload()
            .withf(|_, dest| dest == "/Pocket")
            .returning(move |_, _| result());
        session
    }

    fn no_reconnect() -> MockConnector {
        let mut connector = MockConnector::new();
        connector.expect_issue_session_credential().never();
        connector.expect_connect().never();
        connector
    }

    /// Connector whose single reconnect yields a session answering with `retry`.
    fn one_reconnect(
        retry: fn() -> Result<(), StoreError>,
        issued: Arc<AtomicUsize>,
    ) -> MockConnector {
        let mut connector = MockConnector::new();
        connector
            .expect_issue_session_credential()
            .times(1)
            .returning(move |_| {
                issued.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".into())
            });
        connector
            .expect_connect()
            .withf(|_, session| session == "fresh")
            .times(1)
            .returning(move |_, _| Ok(Box::new(session_returning(retry))));
        connector
    }

    #[tokio::test]
    async fn already_exists_is_a_skip_and_file_is_removed() {
        let dir = tempdir().unwrap();
        let a = artifact(&dir, 0);
        let mut uploader = Uploader::new(
            Box::new(session_returning(|| Err(StoreError::AlreadyExists("doc".into())))),
            Arc::new(no_reconnect()),
            creds(),
            settings(false),
        );

        let outcome = uploader.handle(a.clone()).await;
        assert_eq!(outcome, UploadOutcome::Skipped);
        assert!(!a.path.exists());
        assert!(!dir.path().join("0").exists());
    }

    #[tokio::test]
    async fn success_keeps_file_when_asked() {
        let dir = tempdir().unwrap();
        let a = artifact(&dir, 1);
        let mut uploader = Uploader::new(
            Box::new(session_returning(|| Ok(()))),
            Arc::new(no_reconnect()),
            creds(),
            settings(true),
        );

        assert_eq!(uploader.handle(a.clone()).await, UploadOutcome::Uploaded);
        assert!(a.path.exists());
    }

    #[tokio::test]
    async fn failure_reconnects_once_then_succeeds() {
        let dir = tempdir().unwrap();
        let a = artifact(&dir, 2);
        let issued = Arc::new(AtomicUsize::new(0));
        let mut uploader = Uploader::new(
            Box::new(session_returning(|| Err(StoreError::Auth("expired".into())))),
            Arc::new(one_reconnect(|| Ok(()), issued.clone())),
            creds(),
            settings(false),
        );

        assert_eq!(uploader.handle(a.clone()).await, UploadOutcome::Uploaded);
        assert_eq!(issued.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.credentials.session, "fresh");
        assert!(!a.path.exists());
    }

    #[tokio::test]
    async fn retry_already_exists_is_still_a_skip() {
        let dir = tempdir().unwrap();
        let a = artifact(&dir, 3);
        let issued = Arc::new(AtomicUsize::new(0));
        let mut uploader = Uploader::new(
            Box::new(session_returning(|| Err(StoreError::Api("flaky".into())))),
            Arc::new(one_reconnect(
                || Err(StoreError::AlreadyExists("doc".into())),
                issued.clone(),
            )),
            creds(),
            settings(false),
        );

        assert_eq!(uploader.handle(a).await, UploadOutcome::Skipped);
        assert_eq!(issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_api_errors_abandon_after_a_single_reconnect() {
        for keep in [false, true] {
            let dir = tempdir().unwrap();
            let a = artifact(&dir, 4);
            let issued = Arc::new(AtomicUsize::new(0));
            let mut uploader = Uploader::new(
                Box::new(session_returning(|| Err(StoreError::Api("boom".into())))),
                Arc::new(one_reconnect(
                    || Err(StoreError::Api("boom again".into())),
                    issued.clone(),
                )),
                creds(),
                settings(keep),
            );

            assert_eq!(uploader.handle(a.clone()).await, UploadOutcome::Abandoned);
            assert_eq!(issued.load(Ordering::SeqCst), 1);
            assert_eq!(a.path.exists(), keep, "keep={keep}");
        }
    }

    #[tokio::test]
    async fn failed_reconnect_keeps_the_old_session() {
        let dir = tempdir().unwrap();
        let first = artifact(&dir, 5);
        let second = artifact(&dir, 6);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut session = MockSession::new();
        {
            let calls = calls.clone();
            session.expect_upload().returning(move |_, _| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StoreError::Api("down".into()))
                } else {
                    Ok(())
                }
            });
        }
        let mut connector = MockConnector::new();
        connector
            .expect_issue_session_credential()
            .times(1)
            .returning(|_| Err(StoreError::Auth("device revoked".into())));
        connector.expect_connect().never();

        let mut uploader =
            Uploader::new(Box::new(session), Arc::new(connector), creds(), settings(false));
        assert_eq!(uploader.handle(first).await, UploadOutcome::Abandoned);
        assert_eq!(uploader.handle(second).await, UploadOutcome::Uploaded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn spawned_uploader_drains_queue_until_closed() {
        let dir = tempdir().unwrap();
        let uploaded = Arc::new(std::sync::Mutex::new(Vec::<PathBuf>::new()));
        let mut session = MockSession::new();
        {
            let uploaded = uploaded.clone();
            session.expect_upload().returning(move |local: &Path, _| {
                uploaded.lock().unwrap().push(local.to_path_buf());
                Ok(())
            });
        }
        let mut coordinator = ShutdownCoordinator::new();
        let stop = coordinator.register();
        let uploader = Uploader::new(
            Box::new(session),
            Arc::new(no_reconnect()),
            creds(),
            settings(false),
        );
        let UploaderHandle { queue, join } = uploader.spawn(stop);

        let a = artifact(&dir, 7);
        let b = artifact(&dir, 8);
        queue.send(a.clone()).await.unwrap();
        queue.send(b.clone()).await.unwrap();
        drop(queue);

        let report = join.await.unwrap();
        assert_eq!(
            report,
            UploadReport {
                uploaded: 2,
                skipped: 0,
                abandoned: 0
            }
        );
        assert_eq!(*uploaded.lock().unwrap(), vec![a.path, b.path]);
    }

    #[tokio::test]
    async fn stop_drops_queued_artifacts() {
        let dir = tempdir().unwrap();
        let mut session = MockSession::new();
        session.expect_upload().never();
        let mut coordinator = ShutdownCoordinator::new();
        let stop = coordinator.register();
        coordinator.broadcast();

        let uploader = Uploader::new(
            Box::new(session),
            Arc::new(no_reconnect()),
            creds(),
            settings(false),
        );
        let UploaderHandle { queue, join } = uploader.spawn(stop);
        let a = artifact(&dir, 9);
        let _ = queue.send(a.clone()).await;

        let report = join.await.unwrap();
        assert_eq!(report, UploadReport::default());
        assert!(a.path.exists(), "dropped artifacts are not touched");
    }

    #[test]
    fn handle_future_can_cross_threads() {
        fn assert_send<T: Send>(_: &T) {}
        let dir = tempdir().unwrap();
        let mut uploader = Uploader::new(
            Box::new(MockSession::new()),
            Arc::new(no_reconnect()),
            creds(),
            settings(false),
        );
        let fut = uploader.handle(artifact(&dir, 0));
        assert_send(&fut);
    }
}
