//! Foreground submission with offline fallback.
//!
//! Every user-initiated submit mints exactly one `client_id`. Retries of
//! the same submission, whether foreground or from the background drain,
//! reuse that id so the store can deduplicate.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use fieldform_spec::{FormSchema, GeometryKind, ResponseDraft};

use crate::attachments::{AttachmentUploads, resolve_into_draft};
use crate::client::{ResponseRecord, ResponseStore, StoreWriteError};
use crate::payload::{Geometry, build_payload};
use crate::queue::{InFlight, PendingSubmission, QueueError, SubmissionQueue};

/// What became of one submit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The store accepted the response.
    Delivered { client_id: String },
    /// The store was unreachable; the response sits in the local queue and
    /// will be retried by the sync service.
    QueuedOffline { client_id: String },
    /// The store refused the payload. Nothing was queued, retrying the
    /// identical payload cannot succeed.
    Rejected { reason: String },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("form requires geometry but none was captured")]
    GeometryMissing,
    #[error("attachment upload failed: {reason}")]
    AttachmentFailed { reason: String },
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Drives submissions against the store, falling back to the durable queue
/// when the store is unreachable.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: Arc<dyn ResponseStore>,
    queue: SubmissionQueue,
    in_flight: InFlight,
}

impl SubmissionCoordinator {
    pub fn new(store: Arc<dyn ResponseStore>, queue: SubmissionQueue, in_flight: InFlight) -> Self {
        Self {
            store,
            queue,
            in_flight,
        }
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    /// Submits a finished draft. Mints a fresh `client_id` for this user
    /// action; call [`Self::retry`] to re-attempt an already queued entry.
    pub async fn submit(
        &self,
        schema: &FormSchema,
        draft: &ResponseDraft,
        geometry: Option<Geometry>,
    ) -> Result<SubmitOutcome, SubmitError> {
        if schema.geometry_type != GeometryKind::None && geometry.is_none() {
            return Err(SubmitError::GeometryMissing);
        }

        let client_id = Uuid::new_v4().to_string();
        let payload = build_payload(draft.values(), draft.attachments(), geometry, &client_id);
        let entry = PendingSubmission {
            id: client_id,
            form_id: schema.id.clone(),
            payload,
            created_at: OffsetDateTime::now_utc(),
            synced: false,
        };
        self.deliver(entry).await
    }

    /// Waits for outstanding attachment uploads, folds their storage
    /// handles into the draft, then submits. A failed upload aborts the
    /// submission; nothing reaches the store or the queue.
    pub async fn submit_with_uploads(
        &self,
        schema: &FormSchema,
        draft: &mut ResponseDraft,
        uploads: &AttachmentUploads,
        geometry: Option<Geometry>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let handles = uploads
            .finish()
            .await
            .map_err(|err| SubmitError::AttachmentFailed {
                reason: err.to_string(),
            })?;
        resolve_into_draft(draft, &handles);
        self.submit(schema, draft, geometry).await
    }

    /// Re-attempts a specific queued submission by its `client_id`.
    pub async fn retry(&self, client_id: &str) -> Result<SubmitOutcome, SubmitError> {
        let entry = self.queue.load(client_id)?;
        if entry.synced {
            return Ok(SubmitOutcome::Delivered {
                client_id: entry.id,
            });
        }
        self.deliver(entry).await
    }

    async fn deliver(&self, entry: PendingSubmission) -> Result<SubmitOutcome, SubmitError> {
        let Some(_guard) = self.in_flight.claim(&entry.id) else {
            // Another attempt holds the claim; treat it as queued rather
            // than racing it.
            return Ok(SubmitOutcome::QueuedOffline {
                client_id: entry.id,
            });
        };

        let record = ResponseRecord {
            client_id: entry.id.clone(),
            form_id: entry.form_id.clone(),
            payload: entry.payload.clone(),
        };

        match self.store.create_response(&record).await {
            Ok(()) => {
                if self.queue.contains(&entry.id) {
                    self.queue.mark_synced(&entry.id)?;
                }
                tracing::info!(client_id = %entry.id, form_id = %entry.form_id, "submission delivered");
                Ok(SubmitOutcome::Delivered {
                    client_id: entry.id,
                })
            }
            Err(StoreWriteError::Transient { reason }) => {
                if !self.queue.contains(&entry.id) {
                    self.queue.push(&entry)?;
                }
                tracing::warn!(
                    client_id = %entry.id,
                    reason = %reason,
                    "store unreachable, submission queued for sync"
                );
                Ok(SubmitOutcome::QueuedOffline {
                    client_id: entry.id,
                })
            }
            Err(StoreWriteError::Rejected { reason }) => {
                tracing::warn!(client_id = %entry.id, reason = %reason, "store rejected submission");
                Ok(SubmitOutcome::Rejected { reason })
            }
        }
    }
}
