//! Durable local spool for submissions that could not be delivered online.
//!
//! One JSON file per `client_id`. Entries are append-only with a `synced`
//! tombstone instead of immediate deletion, so the spool doubles as a
//! retry audit trail and survives process restarts.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::payload::ResponsePayload;

/// Durable record for one submission awaiting delivery. `id` is the
/// submission's `client_id` and is never regenerated on retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: String,
    pub form_id: String,
    pub payload: ResponsePayload,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub synced: bool,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode queue entry '{id}': {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown queue entry '{id}'")]
    UnknownEntry { id: String },
}

/// On-disk spool of pending submissions.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    root: PathBuf,
}

impl SubmissionQueue {
    /// Opens the spool directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| QueueError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persists a new entry. The write goes through a temp file rename so
    /// a crash cannot leave a half-written record behind.
    pub fn push(&self, entry: &PendingSubmission) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec_pretty(entry).map_err(|source| QueueError::Encode {
            id: entry.id.clone(),
            source,
        })?;
        self.write_atomic(&self.entry_path(&entry.id), &bytes)?;
        tracing::debug!(id = %entry.id, form_id = %entry.form_id, "submission queued");
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry_path(id).is_file()
    }

    pub fn load(&self, id: &str) -> Result<PendingSubmission, QueueError> {
        let path = self.entry_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Err(QueueError::UnknownEntry { id: id.to_string() });
            }
            Err(source) => return Err(QueueError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|_| QueueError::UnknownEntry { id: id.to_string() })
    }

    /// Entries not yet delivered, oldest first so a user's own submissions
    /// arrive at the store in the order they were made.
    pub fn pending(&self) -> Result<Vec<PendingSubmission>, QueueError> {
        let mut entries = self.load_all()?;
        entries.retain(|entry| !entry.synced);
        Ok(entries)
    }

    /// Flags an entry delivered, keeping the tombstone for auditing.
    pub fn mark_synced(&self, id: &str) -> Result<(), QueueError> {
        let mut entry = self.load(id)?;
        entry.synced = true;
        let bytes = serde_json::to_vec_pretty(&entry).map_err(|source| QueueError::Encode {
            id: id.to_string(),
            source,
        })?;
        self.write_atomic(&self.entry_path(id), &bytes)?;
        tracing::debug!(id = %id, "queue entry marked synced");
        Ok(())
    }

    /// Removes one entry entirely (explicit user deletion).
    pub fn delete(&self, id: &str) -> Result<(), QueueError> {
        let path = self.entry_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                Err(QueueError::UnknownEntry { id: id.to_string() })
            }
            Err(source) => Err(QueueError::Io { path, source }),
        }
    }

    /// Deletes delivered tombstones; returns how many were removed.
    pub fn purge_synced(&self) -> Result<usize, QueueError> {
        let mut purged = 0;
        for entry in self.load_all()? {
            if entry.synced {
                self.delete(&entry.id)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), QueueError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|source| QueueError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| QueueError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_all(&self) -> Result<Vec<PendingSubmission>, QueueError> {
        let dir = fs::read_dir(&self.root).map_err(|source| QueueError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|source| QueueError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(|source| QueueError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_slice::<PendingSubmission>(&bytes) {
                Ok(entry) => entries.push(entry),
                // A corrupt file must not block draining the rest.
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping corrupt queue entry");
                }
            }
        }

        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }
}

/// Tracks client ids with a delivery attempt currently in flight, so a
/// foreground submit and a background drain can never race on one entry.
/// The claim is released when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<BTreeSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims an id; `None` when an attempt is already running.
    pub fn claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id: id.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<BTreeSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.remove(&self.id);
    }
}
