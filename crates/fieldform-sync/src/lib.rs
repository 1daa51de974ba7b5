#![allow(missing_docs)]

pub mod attachments;
pub mod client;
pub mod location;
pub mod payload;
pub mod queue;
pub mod submit;
pub mod sync;

pub use attachments::{AttachmentUploads, resolve_into_draft};
pub use client::{AttachmentStore, ResponseRecord, ResponseStore, StoreWriteError};
#[cfg(feature = "http")]
pub use client::{HttpResponseStore, HttpStoreConfig};
pub use location::{LocationTracker, LocationWarning, PositionSource, spawn_capture};
pub use payload::{CLIENT_ID_PROPERTY, CapturedPosition, Geometry, ResponsePayload, build_payload};
pub use queue::{InFlight, InFlightGuard, PendingSubmission, QueueError, SubmissionQueue};
pub use submit::{SubmissionCoordinator, SubmitError, SubmitOutcome};
pub use sync::{DrainReport, SyncService};
