//! Stock remote store adapter: a document tree mirrored into a local directory (typically a
//! folder kept in sync with the device), guarded by the same device/session credential pair
//! the hosted store uses. Session credentials are issued by an HTTP token endpoint.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::contract::{Connector, Session};
use crate::error::StoreError;

pub const DEFAULT_TOKEN_URL: &str = "https://my.remarkable.com/token/json/2/user/new";

pub struct MirrorConnector {
    root: PathBuf,
    token_url: String,
    http: reqwest::Client,
}

impl MirrorConnector {
    pub fn new(root: impl Into<PathBuf>, token_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            token_url: token_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Connector for MirrorConnector {
    async fn connect(&self, device: &str, session: &str) -> Result<Box<dyn Session>, StoreError> {
        if device.is_empty() {
            return Err(StoreError::Auth("empty device credential".into()));
        }
        if session.is_empty() {
            return Err(StoreError::Auth("empty session credential".into()));
        }
        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(StoreError::NotFound(self.root.display().to_string()));
        }
        debug!(root = %self.root.display(), "store session opened");
        Ok(Box::new(MirrorSession {
            root: self.root.clone(),
        }))
    }

    async fn issue_session_credential(&self, device: &str) -> Result<String, StoreError> {
        let resp = self
            .http
            .post(&self.token_url)
            .bearer_auth(device)
            .send()
            .await
            .map_err(|e| StoreError::Api(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Auth(format!(
                "token endpoint responded with status {}",
                status.as_u16()
            )));
        }
        let token = resp
            .text()
            .await
            .map_err(|e| StoreError::Api(format!("token response unreadable: {e}")))?
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(StoreError::Auth("token endpoint returned an empty credential".into()));
        }
        Ok(token)
    }
}

pub struct MirrorSession {
    root: PathBuf,
}

impl MirrorSession {
    /// Map a store path like `/Pocket/Later` onto the mirror, refusing to leave it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(path.trim().trim_matches('/'));
        let mut resolved = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(StoreError::Api(format!("invalid store path {path:?}"))),
            }
        }
        Ok(resolved)
    }
}

/// Copy next to the destination, then rename into place.
async fn publish(local: &Path, partial: &Path, dest: &Path) -> std::io::Result<()> {
    tokio::fs::copy(local, partial).await?;
    tokio::fs::rename(partial, dest).await
}

#[async_trait]
impl Session for MirrorSession {
    async fn mkdir(&mut self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            return if meta.is_dir() {
                Err(StoreError::AlreadyExists(path.to_string()))
            } else {
                Err(StoreError::Api(format!(
                    "a file with the same path already exists: {path}"
                )))
            };
        }
        let parent_ok = match target.parent() {
            Some(parent) => tokio::fs::metadata(parent)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => false,
        };
        if !parent_ok {
            return Err(StoreError::NotFound(format!(
                "parent directory of {path} doesn't exist"
            )));
        }
        tokio::fs::create_dir(&target).await?;
        trace!(path, "directory created");
        Ok(())
    }

    async fn upload(&mut self, local: &Path, dest_dir: &str) -> Result<(), StoreError> {
        let dir = self.resolve(dest_dir)?;
        let is_dir = tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(StoreError::NotFound(format!(
                "directory doesn't exist: {dest_dir}"
            )));
        }

        let name = local
            .file_name()
            .ok_or_else(|| StoreError::Api(format!("not a file: {}", local.display())))?;
        let dest = dir.join(name);
        if tokio::fs::try_exists(&dest).await? {
            return Err(StoreError::AlreadyExists(dest.display().to_string()));
        }

        let mut partial_name = name.to_os_string();
        partial_name.push(".partial");
        let partial = dir.join(partial_name);
        if let Err(e) = publish(local, &partial, &dest).await {
            match tokio::fs::remove_file(&partial).await {
                Ok(()) => trace!(path = %partial.display(), "partial upload removed"),
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => warn!(
                    path = %partial.display(),
                    error = %cleanup,
                    "failed to remove partial upload"
                ),
            }
            return Err(e.into());
        }
        trace!(src = %local.display(), dest = %dest.display(), "document stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(root: &Path) -> MirrorSession {
        MirrorSession {
            root: root.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn mkdir_creates_then_reports_existing() {
        let root = tempdir().unwrap();
        let mut s = session(root.path());
        s.mkdir("/Pocket").await.unwrap();
        assert!(root.path().join("Pocket").is_dir());
        assert!(s.mkdir("Pocket/").await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn mkdir_needs_parent() {
        let root = tempdir().unwrap();
        let err = session(root.path()).mkdir("/a/b").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn paths_cannot_escape_the_mirror() {
        let root = tempdir().unwrap();
        let err = session(root.path()).mkdir("/../evil").await.unwrap_err();
        assert!(matches!(err, StoreError::Api(_)));
    }

    #[tokio::test]
    async fn upload_then_duplicate_is_already_exists() {
        let root = tempdir().unwrap();
        let work = tempdir().unwrap();
        let local = work.path().join("doc.epub");
        std::fs::write(&local, b"epub").unwrap();

        let mut s = session(root.path());
        s.mkdir("/Pocket").await.unwrap();
        s.upload(&local, "/Pocket").await.unwrap();
        assert_eq!(
            std::fs::read(root.path().join("Pocket/doc.epub")).unwrap(),
            b"epub"
        );
        assert!(s.upload(&local, "/Pocket").await.unwrap_err().is_already_exists());
    }

    // reading /proc/self/mem at offset 0 fails after the copy target was created
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_copy_leaves_no_partial_file() {
        let root = tempdir().unwrap();
        let mut s = session(root.path());
        s.mkdir("/Pocket").await.unwrap();

        let err = s
            .upload(Path::new("/proc/self/mem"), "/Pocket")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)), "unexpected error: {err:?}");
        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("Pocket"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn upload_into_missing_directory_is_not_found() {
        let root = tempdir().unwrap();
        let work = tempdir().unwrap();
        let local = work.path().join("doc.epub");
        std::fs::write(&local, b"epub").unwrap();
        let err = session(root.path())
            .upload(&local, "/Nowhere")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn connect_requires_both_credentials() {
        let root = tempdir().unwrap();
        let connector = MirrorConnector::new(root.path(), "http://unused");
        assert!(matches!(
            connector.connect("", "s").await.err().unwrap(),
            StoreError::Auth(_)
        ));
        assert!(matches!(
            connector.connect("d", "").await.err().unwrap(),
            StoreError::Auth(_)
        ));
        assert!(connector.connect("d", "s").await.is_ok());
    }

    #[tokio::test]
    async fn issues_session_credential_with_device_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/json/2/user/new"))
            .and(header("authorization", "Bearer device-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("session-token\n"))
            .expect(1)
            .mount(&server)
            .await;

        let connector = MirrorConnector::new(
            "/unused",
            format!("{}/token/json/2/user/new", server.uri()),
        );
        let token = connector
            .issue_session_credential("device-token")
            .await
            .unwrap();
        assert_eq!(token, "session-token");
    }

    #[tokio::test]
    async fn rejected_issuance_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let connector = MirrorConnector::new("/unused", server.uri());
        let err = connector.issue_session_credential("d").await.unwrap_err();
        assert!(matches!(err, StoreError::Auth(_)));
    }
}
