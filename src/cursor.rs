/// The "since" watermark bounding which items are new on the next poll.
///
/// Owned by the tailer task alone; it is never shared, so it needs no lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    since: i64,
}

impl Cursor {
    /// Starts at zero, i.e. everything since the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> i64 {
        self.since
    }

    /// Move past a successful response's watermark. Never moves backwards.
    pub fn advance(&mut self, response_since: i64) {
        self.since = self.since.max(response_since.saturating_add(1));
    }
}
