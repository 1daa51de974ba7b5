//! Background attachment uploads.
//!
//! Uploads start as soon as the user picks a file, so by the time the
//! wizard reaches submit most handles are already resolved. Submission
//! waits for the stragglers through [`AttachmentUploads::finish`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::task::JoinHandle;

use fieldform_spec::ResponseDraft;

use crate::client::{AttachmentStore, StoreWriteError};

/// One upload task per field name. Re-picking a file for the same field
/// cancels the previous upload.
pub struct AttachmentUploads {
    store: Arc<dyn AttachmentStore>,
    tasks: Mutex<BTreeMap<String, JoinHandle<Result<String, StoreWriteError>>>>,
}

impl AttachmentUploads {
    pub fn new(store: Arc<dyn AttachmentStore>) -> Self {
        Self {
            store,
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Starts uploading `bytes` under `path` for the given field.
    pub fn start(&self, field: impl Into<String>, path: impl Into<String>, bytes: Bytes) {
        let field = field.into();
        let path = path.into();
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move { store.upload(&path, bytes).await });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = tasks.insert(field.clone(), handle) {
            tracing::debug!(field = %field, "replacing in-progress attachment upload");
            previous.abort();
        }
    }

    /// Drops the upload for a field, aborting it if still running.
    pub fn cancel(&self, field: &str) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tasks.remove(field) {
            handle.abort();
        }
    }

    /// Waits for every remaining upload and returns field name to storage
    /// handle. Any failed upload fails the whole batch, submission must not
    /// proceed with a dangling attachment reference.
    pub async fn finish(&self) -> Result<BTreeMap<String, String>, StoreWriteError> {
        let drained: Vec<(String, JoinHandle<Result<String, StoreWriteError>>)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *tasks).into_iter().collect()
        };

        let mut handles = BTreeMap::new();
        for (field, task) in drained {
            let outcome = task.await.map_err(|err| StoreWriteError::Transient {
                reason: format!("upload task for '{field}' aborted: {err}"),
            })?;
            handles.insert(field, outcome?);
        }
        Ok(handles)
    }
}

/// Copies finished upload handles into a draft so they travel with the
/// submission payload.
pub fn resolve_into_draft(draft: &mut ResponseDraft, handles: &BTreeMap<String, String>) {
    for (field, handle) in handles {
        draft.set_attachment(field.clone(), handle.clone());
    }
}
