use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::ResponsePayload;

/// Record written to the backing store for one response. `client_id` is
/// the store's deduplication key and equals the `_client_id` property
/// inside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub client_id: String,
    pub form_id: String,
    pub payload: ResponsePayload,
}

/// Store write failures, split by retryability. The split is what keeps
/// the offline queue bounded: only transient failures are ever queued.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    /// Connectivity-class failure; the same write may succeed later.
    #[error("transient store failure: {reason}")]
    Transient { reason: String },
    /// The store rejected the payload; retrying cannot succeed.
    #[error("store rejected the submission: {reason}")]
    Rejected { reason: String },
}

impl StoreWriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Backing-store obligations for response writes.
///
/// Implementations must treat a second write carrying a previously seen
/// `client_id` as success, so repeated delivery attempts stay idempotent.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn create_response(&self, record: &ResponseRecord) -> Result<(), StoreWriteError>;
}

/// Attachment uploads keyed by an opaque storage path; the returned handle
/// is what ends up in the response properties.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<String, StoreWriteError>;
}

#[cfg(feature = "http")]
pub use http::{HttpResponseStore, HttpStoreConfig};

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::StatusCode;
    use url::Url;

    use super::*;

    /// Connection settings for the HTTP store. Passed in explicitly, never
    /// read from globals.
    #[derive(Debug, Clone)]
    pub struct HttpStoreConfig {
        pub base_url: Url,
        pub auth_token: Option<String>,
        /// Bounded per-request timeout so a hung request cannot stall the
        /// drain loop.
        pub request_timeout: Duration,
    }

    impl HttpStoreConfig {
        pub fn new(base_url: Url) -> Self {
            Self {
                base_url,
                auth_token: None,
                request_timeout: Duration::from_secs(30),
            }
        }

        pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
            self.auth_token = Some(token.into());
            self
        }

        pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
            self.request_timeout = timeout;
            self
        }
    }

    /// [`ResponseStore`] and [`AttachmentStore`] over the store's HTTP API.
    #[derive(Debug, Clone)]
    pub struct HttpResponseStore {
        client: reqwest::Client,
        config: HttpStoreConfig,
    }

    impl HttpResponseStore {
        pub fn new(config: HttpStoreConfig) -> Result<Self, reqwest::Error> {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?;
            Ok(Self { client, config })
        }

        fn endpoint(&self, path: &str) -> Result<Url, StoreWriteError> {
            self.config
                .base_url
                .join(path)
                .map_err(|err| StoreWriteError::Rejected {
                    reason: format!("invalid store url: {err}"),
                })
        }

        fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
            match &self.config.auth_token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        }
    }

    #[async_trait]
    impl ResponseStore for HttpResponseStore {
        async fn create_response(&self, record: &ResponseRecord) -> Result<(), StoreWriteError> {
            let url = self.endpoint("responses")?;
            let response = self
                .authorized(self.client.post(url).json(record))
                .send()
                .await
                .map_err(transient)?;

            let status = response.status();
            if status.is_success() {
                tracing::debug!(client_id = %record.client_id, "response stored");
                return Ok(());
            }
            // The store signals an already-seen client_id with 409; that
            // means an earlier attempt got through.
            if status == StatusCode::CONFLICT {
                tracing::debug!(
                    client_id = %record.client_id,
                    "duplicate client_id, treating as delivered"
                );
                return Ok(());
            }
            Err(classify(status, response).await)
        }
    }

    #[async_trait]
    impl AttachmentStore for HttpResponseStore {
        async fn upload(&self, path: &str, bytes: Bytes) -> Result<String, StoreWriteError> {
            let url = self.endpoint(&format!("attachments/{path}"))?;
            let response = self
                .authorized(self.client.put(url).body(bytes))
                .send()
                .await
                .map_err(transient)?;

            let status = response.status();
            if !status.is_success() {
                return Err(classify(status, response).await);
            }

            #[derive(Deserialize)]
            struct UploadReply {
                handle: String,
            }
            let reply: UploadReply = response.json().await.map_err(|err| {
                StoreWriteError::Rejected {
                    reason: format!("malformed upload reply: {err}"),
                }
            })?;
            Ok(reply.handle)
        }
    }

    fn transient(err: reqwest::Error) -> StoreWriteError {
        StoreWriteError::Transient {
            reason: err.to_string(),
        }
    }

    async fn classify(status: StatusCode, response: reqwest::Response) -> StoreWriteError {
        let reason = match response.text().await {
            Ok(body) if !body.is_empty() => format!("{status}: {body}"),
            _ => status.to_string(),
        };
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            StoreWriteError::Transient { reason }
        } else {
            StoreWriteError::Rejected { reason }
        }
    }
}
