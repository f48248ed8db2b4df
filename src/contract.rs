//! # contract: collaborator interfaces driven by the pipeline
//!
//! The pipeline never talks to a transport directly. Everything outside the core goes
//! through one of the traits below:
//! - [`Source`]: the read-it-later service (retrieve with a `since` cursor)
//! - [`Extractor`]: fetches a page and pulls out readable content
//! - [`Converter`]: turns extracted content into an e-book file
//! - [`Connector`] / [`Session`]: the remote document store and its credentials
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; the mocks are exported under the
//!   `test-export-mocks` feature so dependent crates can use them in their own tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;

use crate::error::{ConvertError, ExtractError, SourceError, StoreError};

/// Read state filter for a retrieve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadState {
    Unread,
    Archive,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Oldest,
    Newest,
}

/// Options for one retrieve call. Serialises to the source's request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrieveOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ReadState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub sort: SortOrder,
    #[serde(rename = "detailType")]
    pub detail_type: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub since: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            state: None,
            tag: None,
            content_type: "article".to_string(),
            sort: SortOrder::Oldest,
            detail_type: "simple".to_string(),
            since: 0,
        }
    }
}

impl RetrieveOptions {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn unread(mut self) -> Self {
        self.state = Some(ReadState::Unread);
        self
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = since;
        self
    }
}

/// One article as listed by the source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    pub id: String,
    pub given_url: String,
    pub resolved_url: String,
    /// Server-assigned ordering key within a single response.
    pub sort_key: i64,
}

impl Item {
    /// The URL to fetch: the resolved one when present, otherwise the one originally saved.
    pub fn retrieval_url(&self) -> Option<&str> {
        if !self.resolved_url.is_empty() {
            Some(&self.resolved_url)
        } else if !self.given_url.is_empty() {
            Some(&self.given_url)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetrieveResponse {
    /// Items in response order.
    pub items: Vec<Item>,
    /// Watermark for the next call.
    pub since: i64,
}

/// Readable content pulled out of a web page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Article {
    pub title: String,
    pub site_name: String,
    pub content: String,
    /// Input format understood by the converter, e.g. `html`.
    pub format: String,
}

/// A converted file waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Worker sequence id, for log correlation only.
    pub seq: u64,
    pub item_id: String,
    pub path: PathBuf,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Source: Send + Sync {
    /// Retrieve every item changed since `options.since`.
    async fn retrieve(&self, options: &RetrieveOptions) -> Result<RetrieveResponse, SourceError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch `url` and extract its readable content. Must give up after `timeout`.
    async fn extract(&self, url: &str, timeout: Duration) -> Result<Article, ExtractError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Converter: Send + Sync {
    /// Fail fast when the external program cannot be found.
    fn ensure_available(&self) -> Result<(), ConvertError>;

    /// Convert `article` into `output`. A deadline breach is [`ConvertError::Timeout`].
    async fn convert(
        &self,
        article: &Article,
        output: &Path,
        timeout: Duration,
    ) -> Result<(), ConvertError>;
}

/// An authenticated remote store session. Owned by exactly one task.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Session: Send {
    async fn mkdir(&mut self, path: &str) -> Result<(), StoreError>;

    /// Upload `local` into the directory `dest_dir`, keeping its file stem as document name.
    async fn upload(&mut self, local: &Path, dest_dir: &str) -> Result<(), StoreError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &str, session: &str) -> Result<Box<dyn Session>, StoreError>;

    /// Exchange the long-lived device credential for a fresh session credential.
    async fn issue_session_credential(&self, device: &str) -> Result<String, StoreError>;
}
