use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use fieldform_spec::{
    ConditionMode, FieldDefinition, FieldKind, FormSchema, GeometryKind, ResponseDraft, Section,
};
use fieldform_sync::{AttachmentStore, AttachmentUploads, StoreWriteError, resolve_into_draft};

/// Upload double that records every accepted path and can fail outright.
#[derive(Default)]
struct RecordingStore {
    uploads: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl AttachmentStore for RecordingStore {
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<String, StoreWriteError> {
        if self.fail {
            return Err(StoreWriteError::Transient {
                reason: "connection reset".to_string(),
            });
        }
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(format!("stored://{path}#{}", bytes.len()))
    }
}

#[tokio::test]
async fn finish_returns_a_handle_per_field() {
    let store = Arc::new(RecordingStore::default());
    let uploads = AttachmentUploads::new(store.clone());

    uploads.start("photo", "resp-1/photo.jpg", Bytes::from_static(b"jpeg"));
    uploads.start("audio", "resp-1/note.ogg", Bytes::from_static(b"ogg"));

    let handles = uploads.finish().await.unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(
        handles.get("photo").map(String::as_str),
        Some("stored://resp-1/photo.jpg#4")
    );

    // A later finish has nothing left to wait for.
    assert!(uploads.finish().await.unwrap().is_empty());
}

#[tokio::test]
async fn repicking_a_file_replaces_the_upload() {
    let store = Arc::new(RecordingStore::default());
    let uploads = AttachmentUploads::new(store.clone());

    uploads.start("photo", "resp-1/first.jpg", Bytes::from_static(b"one"));
    uploads.start("photo", "resp-1/second.jpg", Bytes::from_static(b"two"));

    let handles = uploads.finish().await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(
        handles.get("photo").map(String::as_str),
        Some("stored://resp-1/second.jpg#3")
    );
}

#[tokio::test]
async fn cancel_discards_the_upload() {
    let store = Arc::new(RecordingStore::default());
    let uploads = AttachmentUploads::new(store.clone());

    uploads.start("photo", "resp-1/photo.jpg", Bytes::from_static(b"jpeg"));
    uploads.cancel("photo");

    assert!(uploads.finish().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_upload_fails_the_batch() {
    let store = Arc::new(RecordingStore {
        fail: true,
        ..RecordingStore::default()
    });
    let uploads = AttachmentUploads::new(store.clone());

    uploads.start("photo", "resp-1/photo.jpg", Bytes::from_static(b"jpeg"));
    let result = uploads.finish().await;
    assert!(matches!(result, Err(StoreWriteError::Transient { .. })));
}

#[tokio::test]
async fn handles_land_in_the_draft() {
    let photo = FieldDefinition {
        name: "photo".to_string(),
        label: "Photo".to_string(),
        kind: FieldKind::File,
        required: false,
        description: None,
        placeholder: None,
        options: Vec::new(),
        rules: Vec::new(),
        conditions: Vec::new(),
        condition_mode: ConditionMode::All,
        calculation: None,
        section_id: "main".to_string(),
    };
    let schema = FormSchema {
        id: "survey".to_string(),
        title: "Survey".to_string(),
        description: None,
        geometry_type: GeometryKind::None,
        multi_page: false,
        total_pages: 1,
        sections: vec![Section {
            id: "main".to_string(),
            title: "Main".to_string(),
            page_number: 1,
        }],
        fields: vec![photo],
    };
    let mut draft = ResponseDraft::new(&schema);

    let store = Arc::new(RecordingStore::default());
    let uploads = AttachmentUploads::new(store);
    uploads.start("photo", "resp-1/photo.jpg", Bytes::from_static(b"jpeg"));

    let handles = uploads.finish().await.unwrap();
    resolve_into_draft(&mut draft, &handles);
    assert_eq!(
        draft.attachments().get("photo").map(String::as_str),
        Some("stored://resp-1/photo.jpg#4")
    );
}
