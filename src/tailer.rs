//! Tailer: turns periodic retrieve calls into a stream of retrieval targets.
//!
//! Every tick issues one retrieve with the current cursor. On success the cursor moves past
//! the response watermark and the items are emitted sorted by their server ordering key; on
//! failure the error is emitted and the cursor stays put, so the same window is retried on
//! the next tick. The first tick fires immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};
use url::Url;

use crate::contract::{RetrieveOptions, Source};
use crate::cursor::Cursor;
use crate::error::SourceError;
use crate::shutdown::StopSignal;

/// A discovered article, ready to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub item_id: String,
    pub url: Url,
    pub sort_key: i64,
}

/// What the tailer produces: a target or the reason a poll (or one item of it) failed.
#[derive(Debug)]
pub enum TailEvent {
    Item(Target),
    Failed(SourceError),
}

pub struct Tailer {
    source: Arc<dyn Source>,
    options: RetrieveOptions,
    cursor: Cursor,
}

impl Tailer {
    pub fn new(source: Arc<dyn Source>, options: RetrieveOptions) -> Self {
        Self {
            source,
            options,
            cursor: Cursor::new(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// One retrieve round. The outer error is a failed poll; per-item URL problems come back
    /// as [`TailEvent::Failed`] entries alongside the good targets.
    pub async fn poll_once(&mut self) -> Result<Vec<TailEvent>, SourceError> {
        let mut options = self.options.clone();
        options.since = self.cursor.current();

        let response = self.source.retrieve(&options).await?;
        self.cursor.advance(response.since);
        debug!(
            items = response.items.len(),
            since = options.since,
            next = self.cursor.current(),
            "poll succeeded"
        );

        let mut items = response.items;
        // stable: equal keys keep response order
        items.sort_by_key(|item| item.sort_key);

        let mut events = Vec::with_capacity(items.len());
        for item in items {
            let Some(raw) = item.retrieval_url() else {
                warn!(item_id = %item.id, "item has neither resolved nor given url, skipping");
                continue;
            };
            match Url::parse(raw) {
                Ok(url) => events.push(TailEvent::Item(Target {
                    item_id: item.id.clone(),
                    url,
                    sort_key: item.sort_key,
                })),
                Err(e) => events.push(TailEvent::Failed(SourceError::InvalidUrl {
                    item_id: item.id.clone(),
                    url: raw.to_string(),
                    reason: e.to_string(),
                })),
            }
        }
        Ok(events)
    }

    /// Run the tick loop on its own task until `stop` fires.
    ///
    /// The returned receiver closes when the loop ends. A retrieve already in flight when the
    /// stop arrives is allowed to finish, but nothing more is emitted.
    pub fn spawn(
        mut self,
        interval: Duration,
        mut stop: StopSignal,
    ) -> (mpsc::Receiver<TailEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            trace!("tailer started");
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            'outer: loop {
                tokio::select! {
                    biased;
                    _ = stop.recv() => {
                        trace!("tailer received shutdown request");
                        break;
                    }
                    _ = ticker.tick() => {
                        let events = match self.poll_once().await {
                            Ok(events) => events,
                            Err(e) => vec![TailEvent::Failed(e)],
                        };
                        for event in events {
                            tokio::select! {
                                biased;
                                _ = stop.recv() => {
                                    trace!("tailer received shutdown request while emitting");
                                    break 'outer;
                                }
                                sent = tx.send(event) => {
                                    if sent.is_err() {
                                        trace!("tailer consumer gone");
                                        break 'outer;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            trace!(cursor = self.cursor.current(), "tailer done");
        });
        (rx, handle)
    }
}
