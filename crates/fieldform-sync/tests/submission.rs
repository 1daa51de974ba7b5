use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use time::OffsetDateTime;

use fieldform_spec::{
    ConditionMode, FieldDefinition, FieldKind, FormSchema, GeometryKind, ResponseDraft, Section,
};
use bytes::Bytes;
use fieldform_sync::{
    AttachmentStore, AttachmentUploads, CLIENT_ID_PROPERTY, DrainReport, Geometry, InFlight,
    ResponseRecord, ResponseStore, StoreWriteError, SubmissionCoordinator, SubmissionQueue,
    SubmitError, SubmitOutcome, SyncService,
};

/// Store double that fails a scripted number of attempts with a transient
/// error, then accepts. Writes deduplicate on `client_id` like the real
/// store does.
#[derive(Default)]
struct ScriptedStore {
    transient_failures: AtomicUsize,
    reject_all: bool,
    records: Mutex<Vec<ResponseRecord>>,
}

impl ScriptedStore {
    fn failing(times: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn delivered_ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.client_id.clone())
            .collect()
    }
}

#[async_trait]
impl ResponseStore for ScriptedStore {
    async fn create_response(&self, record: &ResponseRecord) -> Result<(), StoreWriteError> {
        if self.reject_all {
            return Err(StoreWriteError::Rejected {
                reason: "schema version retired".to_string(),
            });
        }
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreWriteError::Transient {
                reason: "connection refused".to_string(),
            });
        }
        let mut records = self.records.lock().unwrap();
        if !records.iter().any(|seen| seen.client_id == record.client_id) {
            records.push(record.clone());
        }
        Ok(())
    }
}

fn schema(geometry: GeometryKind) -> FormSchema {
    let species = FieldDefinition {
        name: "species".to_string(),
        label: "Species".to_string(),
        kind: FieldKind::Text,
        required: true,
        description: None,
        placeholder: None,
        options: Vec::new(),
        rules: Vec::new(),
        conditions: Vec::new(),
        condition_mode: ConditionMode::All,
        calculation: None,
        section_id: "main".to_string(),
    };
    FormSchema {
        id: "tree-survey".to_string(),
        title: "Tree survey".to_string(),
        description: None,
        geometry_type: geometry,
        multi_page: false,
        total_pages: 1,
        sections: vec![Section {
            id: "main".to_string(),
            title: "Main".to_string(),
            page_number: 1,
        }],
        fields: vec![species],
    }
}

fn draft(schema: &FormSchema) -> ResponseDraft {
    let mut draft = ResponseDraft::new(schema);
    draft.set_value(schema, "species", json!("oak"));
    draft
}

fn pipeline(
    store: Arc<ScriptedStore>,
    dir: &TempDir,
) -> (SubmissionCoordinator, SyncService) {
    let queue = SubmissionQueue::open(dir.path()).unwrap();
    let in_flight = InFlight::new();
    let coordinator = SubmissionCoordinator::new(
        store.clone(),
        queue.clone(),
        in_flight.clone(),
    );
    let sync = SyncService::new(store, queue, in_flight);
    (coordinator, sync)
}

#[tokio::test]
async fn online_submission_delivers_without_queuing() {
    let store = Arc::new(ScriptedStore::default());
    let dir = TempDir::new().unwrap();
    let (coordinator, _) = pipeline(store.clone(), &dir);

    let schema = schema(GeometryKind::None);
    let outcome = coordinator.submit(&schema, &draft(&schema), None).await.unwrap();

    let SubmitOutcome::Delivered { client_id } = outcome else {
        panic!("expected delivery, got {outcome:?}");
    };
    assert_eq!(store.delivered_ids(), vec![client_id]);
    assert!(coordinator.queue().pending().unwrap().is_empty());
}

#[tokio::test]
async fn geometry_bearing_form_requires_a_position() {
    let store = Arc::new(ScriptedStore::default());
    let dir = TempDir::new().unwrap();
    let (coordinator, _) = pipeline(store.clone(), &dir);

    let schema = schema(GeometryKind::Point);
    let result = coordinator.submit(&schema, &draft(&schema), None).await;
    assert!(matches!(result, Err(SubmitError::GeometryMissing)));

    let geometry = Geometry::Point {
        coordinates: [18.07, 59.33],
    };
    let outcome = coordinator
        .submit(&schema, &draft(&schema), Some(geometry.clone()))
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Delivered { .. }));

    let records = store.records.lock().unwrap();
    assert_eq!(records[0].payload.geometry, Some(geometry));
    assert_eq!(
        records[0].payload.properties.get(CLIENT_ID_PROPERTY),
        Some(&Value::String(records[0].client_id.clone()))
    );
}

#[tokio::test]
async fn two_offline_attempts_deliver_exactly_once() {
    // First two delivery attempts hit a dead network.
    let store = Arc::new(ScriptedStore::failing(2));
    let dir = TempDir::new().unwrap();
    let (coordinator, sync) = pipeline(store.clone(), &dir);

    let schema = schema(GeometryKind::None);
    let outcome = coordinator.submit(&schema, &draft(&schema), None).await.unwrap();
    let SubmitOutcome::QueuedOffline { client_id } = outcome else {
        panic!("expected offline queuing, got {outcome:?}");
    };

    // User retries while still offline. Same client_id, still one entry.
    let outcome = coordinator.retry(&client_id).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::QueuedOffline { .. }));
    let pending = coordinator.queue().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].synced);
    assert_eq!(pending[0].created_at.year(), OffsetDateTime::now_utc().year());

    // Connectivity returns; one drain delivers the single entry.
    let report = sync.drain().await.unwrap();
    assert_eq!(report, DrainReport { delivered: 1, failed: 0 });
    assert_eq!(store.delivered_ids(), vec![client_id.clone()]);
    assert!(coordinator.queue().pending().unwrap().is_empty());

    // A second drain has nothing to do.
    let report = sync.drain().await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert_eq!(store.delivered_ids().len(), 1);

    // Even an explicit retry after delivery stays a no-op at the store.
    let outcome = coordinator.retry(&client_id).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Delivered { .. }));
    assert_eq!(store.delivered_ids().len(), 1);
}

struct PassthroughUploads;

#[async_trait]
impl AttachmentStore for PassthroughUploads {
    async fn upload(&self, path: &str, _bytes: Bytes) -> Result<String, StoreWriteError> {
        Ok(format!("stored://{path}"))
    }
}

#[tokio::test]
async fn submit_waits_for_attachment_uploads() {
    let store = Arc::new(ScriptedStore::default());
    let dir = TempDir::new().unwrap();
    let (coordinator, _) = pipeline(store.clone(), &dir);

    let uploads = AttachmentUploads::new(Arc::new(PassthroughUploads));
    uploads.start("photo", "resp-1/photo.jpg", Bytes::from_static(b"jpeg"));

    let schema = schema(GeometryKind::None);
    let mut draft = draft(&schema);
    let outcome = coordinator
        .submit_with_uploads(&schema, &mut draft, &uploads, None)
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Delivered { .. }));

    let records = store.records.lock().unwrap();
    assert_eq!(
        records[0].payload.properties.get("photo"),
        Some(&json!("stored://resp-1/photo.jpg"))
    );
}

#[tokio::test]
async fn rejected_submission_is_not_queued() {
    let store = Arc::new(ScriptedStore {
        reject_all: true,
        ..ScriptedStore::default()
    });
    let dir = TempDir::new().unwrap();
    let (coordinator, _) = pipeline(store.clone(), &dir);

    let schema = schema(GeometryKind::None);
    let outcome = coordinator.submit(&schema, &draft(&schema), None).await.unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Rejected { reason } if reason.contains("retired")
    ));
    assert!(coordinator.queue().pending().unwrap().is_empty());
}

#[tokio::test]
async fn drain_skips_entries_claimed_by_a_foreground_attempt() {
    let store = Arc::new(ScriptedStore::failing(1));
    let dir = TempDir::new().unwrap();

    let queue = SubmissionQueue::open(dir.path()).unwrap();
    let in_flight = InFlight::new();
    let coordinator =
        SubmissionCoordinator::new(store.clone(), queue.clone(), in_flight.clone());
    let sync = SyncService::new(store.clone(), queue, in_flight.clone());

    let schema = schema(GeometryKind::None);
    let outcome = coordinator.submit(&schema, &draft(&schema), None).await.unwrap();
    let SubmitOutcome::QueuedOffline { client_id } = outcome else {
        panic!("expected offline queuing, got {outcome:?}");
    };

    let guard = in_flight.claim(&client_id).unwrap();
    let report = sync.drain().await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert_eq!(coordinator.queue().pending().unwrap().len(), 1);

    drop(guard);
    let report = sync.drain().await.unwrap();
    assert_eq!(report, DrainReport { delivered: 1, failed: 0 });
}
