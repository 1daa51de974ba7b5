//! Background drain of the offline queue.

use std::sync::Arc;

use crate::client::{ResponseRecord, ResponseStore};
use crate::queue::{InFlight, QueueError, SubmissionQueue};

/// Tally for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Replays queued submissions when connectivity returns. Shares the
/// [`InFlight`] set with the foreground coordinator so the two never
/// deliver the same entry concurrently.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn ResponseStore>,
    queue: SubmissionQueue,
    in_flight: InFlight,
}

impl SyncService {
    pub fn new(store: Arc<dyn ResponseStore>, queue: SubmissionQueue, in_flight: InFlight) -> Self {
        Self {
            store,
            queue,
            in_flight,
        }
    }

    /// One pass over the queue, oldest entries first. Failed entries stay
    /// queued for the next pass; a pass over an already drained queue does
    /// nothing.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        for entry in self.queue.pending()? {
            let Some(_guard) = self.in_flight.claim(&entry.id) else {
                tracing::debug!(client_id = %entry.id, "entry already in flight, skipping");
                continue;
            };

            let record = ResponseRecord {
                client_id: entry.id.clone(),
                form_id: entry.form_id.clone(),
                payload: entry.payload,
            };
            match self.store.create_response(&record).await {
                Ok(()) => {
                    self.queue.mark_synced(&entry.id)?;
                    report.delivered += 1;
                    tracing::info!(client_id = %entry.id, "queued submission delivered");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(client_id = %entry.id, error = %err, "sync attempt failed");
                }
            }
        }
        Ok(report)
    }
}
