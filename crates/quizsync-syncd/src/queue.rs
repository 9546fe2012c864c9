use crate::cache::LocalStore;
use crate::remote::RemoteStore;
use anyhow::Result;
use quizsync_core::models::SyncQueueEntry;
use serde_json::Value;

/// Fixed retry ceiling. Entries failing more often are dropped to bound
/// queue growth: delivery is best-effort, not at-least-once.
pub const RETRY_CEILING: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub retained: usize,
    pub dropped: usize,
}

/// Durable FIFO buffer for remote writes that could not be delivered.
///
/// Persisted through the local cache store under the `sync_queue` key so
/// it survives process restart.
pub struct SyncQueue {
    entries: Vec<SyncQueueEntry>,
    flushing: bool,
}

impl SyncQueue {
    /// Restore the queue persisted by a previous run.
    pub fn load(cache: &LocalStore) -> Result<Self> {
        Ok(Self {
            entries: cache.load_queue()?,
            flushing: false,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a deferred write and persist the queue immediately.
    pub fn enqueue(&mut self, cache: &LocalStore, payload: Value) -> Result<()> {
        self.entries.push(SyncQueueEntry::new(payload));
        cache.save_queue(&self.entries)
    }

    /// Attempt every entry in original enqueue order.
    ///
    /// Successful entries are removed; failed ones stay with their attempt
    /// count bumped, except entries past [`RETRY_CEILING`], which are
    /// dropped (accepted, documented data loss). Entries are removed by
    /// side effect, so a flush already in progress is never re-entered.
    pub async fn flush<S: RemoteStore>(
        &mut self,
        cache: &LocalStore,
        store: &S,
        path: &str,
    ) -> Result<FlushReport> {
        if self.flushing {
            return Ok(FlushReport::default());
        }
        self.flushing = true;

        let mut report = FlushReport::default();
        let mut retained = Vec::new();

        for mut entry in self.entries.drain(..) {
            match store.update_fields(path, entry.payload.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts > RETRY_CEILING {
                        report.dropped += 1;
                        eprintln!(
                            "WARNING: Dropping queued write after {} failed attempts: {}",
                            entry.attempts, e
                        );
                    } else {
                        retained.push(entry);
                    }
                }
            }
        }

        report.retained = retained.len();
        self.entries = retained;
        let saved = cache.save_queue(&self.entries);
        self.flushing = false;
        saved?;
        Ok(report)
    }
}
