//! Object storage client
//!
//! Ties the request gate, token provider, chunked upload engine and
//! recombination waiter together behind three calls: upload, details and
//! wait.

use crate::auth::{TokenProvider, READ_SCOPES, UPLOAD_SCOPES};
use crate::config::ConfigFile;
use crate::context::Context;
use crate::error::Result;
use crate::gate::RequestGate;
use crate::object::{fetch_details, put_object, ObjectDetails, ObjectTarget};
use crate::recombination::{RecombinationConfig, RecombinationWaiter};
use crate::upload::{
    ChunkedOutcome, ChunkedUploader, ProgressFn, UploadConfig, UploadProgress, UploadSession,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// Client for the object storage buckets API
#[derive(Clone)]
pub struct OssClient {
    gate: Arc<RequestGate>,
    auth: Arc<dyn TokenProvider>,
    buckets_url: String,
    upload: UploadConfig,
    recombination: RecombinationConfig,
}

impl OssClient {
    /// Create a client with default upload and polling settings
    pub fn new(
        gate: Arc<RequestGate>,
        auth: Arc<dyn TokenProvider>,
        buckets_url: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            auth,
            buckets_url: buckets_url.into(),
            upload: UploadConfig::default(),
            recombination: RecombinationConfig::default(),
        }
    }

    /// Build the full stack from a configuration file
    pub fn from_config(config: &ConfigFile, auth: Arc<dyn TokenProvider>) -> Result<Self> {
        let gate = RequestGate::with_timeout(&config.endpoint_limits(), config.request_timeout())?;

        Ok(Self::new(Arc::new(gate), auth, config.buckets_url())
            .with_upload_config(config.upload_config())
            .with_recombination_config(config.recombination_config()))
    }

    pub fn with_upload_config(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_recombination_config(mut self, recombination: RecombinationConfig) -> Self {
        self.recombination = recombination;
        self
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn buckets_url(&self) -> &str {
        &self.buckets_url
    }

    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload
    }

    /// Upload `payload` as `object_name` into `bucket_key`
    pub async fn upload_object(
        &self,
        ctx: &Context,
        bucket_key: &str,
        object_name: &str,
        payload: Bytes,
    ) -> Result<ObjectDetails> {
        self.upload_object_with_progress(ctx, bucket_key, object_name, payload, None)
            .await
    }

    /// Upload `payload`, reporting chunk progress for large payloads.
    ///
    /// Payloads at or below the chunking threshold go out in one request.
    /// Larger ones are chunked; if the service does not return the metadata
    /// with the last chunk, the object's details are polled until it is
    /// assembled.
    pub async fn upload_object_with_progress(
        &self,
        ctx: &Context,
        bucket_key: &str,
        object_name: &str,
        payload: Bytes,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ObjectDetails> {
        let size = payload.len() as u64;

        if !self.upload.requires_chunking(size) {
            let token = self.auth.access_token(UPLOAD_SCOPES).await?;
            let target = ObjectTarget::new(&self.buckets_url, bucket_key, object_name);
            let details = put_object(&self.gate, ctx, target, &token, payload).await?;
            if let Some(report) = progress {
                report(UploadProgress {
                    bytes_sent: size,
                    total_bytes: size,
                    chunks_sent: 1,
                    chunk_count: 1,
                });
            }
            return Ok(details);
        }

        let mut session = self.start_session(object_name, size)?;
        self.upload_object_resumable(ctx, bucket_key, object_name, &mut session, &payload, progress)
            .await
    }

    /// New chunked upload session sized with this client's chunk size
    pub fn start_session(&self, object_name: &str, size: u64) -> Result<UploadSession> {
        UploadSession::new(object_name, size, self.upload.chunk_size)
    }

    /// Upload `payload` in chunks through a caller-owned `session`.
    ///
    /// The chunking threshold is not consulted. On error the session keeps
    /// the first byte the service has not acknowledged, so calling again with
    /// the same session and payload resends only the remainder. A session
    /// rebuilt with [`UploadSession::resume`] continues an upload started by
    /// another process.
    pub async fn upload_object_resumable(
        &self,
        ctx: &Context,
        bucket_key: &str,
        object_name: &str,
        session: &mut UploadSession,
        payload: &Bytes,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ObjectDetails> {
        let token = self.auth.access_token(UPLOAD_SCOPES).await?;
        let target = ObjectTarget::new(&self.buckets_url, bucket_key, object_name);
        info!(
            object = object_name,
            session = %session.id(),
            cursor = session.cursor(),
            chunks = session.chunk_count(),
            "starting chunked upload"
        );

        let outcome = ChunkedUploader::new(&self.gate)
            .upload(ctx, target, session, payload, &token, progress)
            .await?;

        match outcome {
            ChunkedOutcome::Complete(details) => Ok(details),
            ChunkedOutcome::Pending => {
                RecombinationWaiter::new(&self.gate, self.recombination)
                    .await_completion(ctx, target, &token)
                    .await
            }
        }
    }

    /// Current metadata of an object
    pub async fn object_details(
        &self,
        ctx: &Context,
        bucket_key: &str,
        object_name: &str,
    ) -> Result<ObjectDetails> {
        let token = self.auth.access_token(READ_SCOPES).await?;
        let target = ObjectTarget::new(&self.buckets_url, bucket_key, object_name);
        fetch_details(&self.gate, ctx, target, &token).await
    }

    /// Poll until a chunk-uploaded object has been assembled
    pub async fn wait_for_recombination(
        &self,
        ctx: &Context,
        bucket_key: &str,
        object_name: &str,
    ) -> Result<ObjectDetails> {
        let token = self.auth.access_token(READ_SCOPES).await?;
        let target = ObjectTarget::new(&self.buckets_url, bucket_key, object_name);
        RecombinationWaiter::new(&self.gate, self.recombination)
            .await_completion(ctx, target, &token)
            .await
    }
}

impl std::fmt::Debug for OssClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OssClient")
            .field("buckets_url", &self.buckets_url)
            .field("upload", &self.upload)
            .field("recombination", &self.recombination)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::error::Error;
    use crate::testing::{fast_gate, mock_buckets_url};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records the scopes every token request asks for
    #[derive(Default)]
    struct RecordingAuth {
        scopes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TokenProvider for RecordingAuth {
        async fn access_token(&self, scopes: &str) -> Result<String> {
            self.scopes.lock().unwrap().push(scopes.to_string());
            Ok("token".to_string())
        }
    }

    fn client_for(server: &MockServer, auth: Arc<dyn TokenProvider>) -> OssClient {
        OssClient::new(Arc::new(fast_gate(server)), auth, mock_buckets_url(server))
            .with_upload_config(UploadConfig {
                chunking_threshold: 10,
                chunk_size: 4,
            })
            .with_recombination_config(RecombinationConfig {
                poll_interval: Duration::from_millis(20),
                timeout: Duration::from_secs(5),
            })
    }

    fn object_name() -> String {
        format!("{}.bin", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_small_payload_skips_chunking() {
        let server = MockServer::start().await;
        let name = object_name();
        Mock::given(method("PUT"))
            .and(path(format!("/oss/v2/buckets/bucket/objects/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "objectKey": name,
                "sha1": "small",
                "size": 10
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"/resumable$"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let auth = Arc::new(RecordingAuth::default());
        let client = client_for(&server, auth.clone());

        let details = client
            .upload_object(&Context::new(), "bucket", &name, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        assert_eq!(details.sha1, "small");
        assert_eq!(*auth.scopes.lock().unwrap(), vec!["data:write data:read"]);
    }

    #[tokio::test]
    async fn test_large_payload_is_chunked() {
        let server = MockServer::start().await;
        let name = object_name();
        let resumable = format!("/oss/v2/buckets/bucket/objects/{}/resumable", name);
        Mock::given(method("PUT"))
            .and(path(resumable.clone()))
            .and(header("content-range", "bytes 8-10/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha1": "abc",
                "size": 11
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(resumable))
            .respond_with(ResponseTemplate::new(202))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("token")));
        let details = client
            .upload_object(&Context::new(), "bucket", &name, Bytes::from_static(b"01234567890"))
            .await
            .unwrap();

        assert_eq!(details.sha1, "abc");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_pending_upload_waits_for_recombination() {
        let server = MockServer::start().await;
        let name = object_name();
        Mock::given(method("PUT"))
            .and(path(format!("/oss/v2/buckets/bucket/objects/{}/resumable", name)))
            .respond_with(ResponseTemplate::new(202))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/oss/v2/buckets/bucket/objects/{}/details", name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha1": "assembled"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("token")));
        let details = client
            .upload_object(&Context::new(), "bucket", &name, Bytes::from_static(b"01234567890"))
            .await
            .unwrap();

        assert_eq!(details.sha1, "assembled");
    }

    #[tokio::test]
    async fn test_interrupted_upload_resumes_with_same_session() {
        let server = MockServer::start().await;
        let name = object_name();
        let resumable = format!("/oss/v2/buckets/bucket/objects/{}/resumable", name);
        Mock::given(method("PUT"))
            .and(path(resumable.clone()))
            .and(header("content-range", "bytes 4-7/11"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(resumable.clone()))
            .and(header("content-range", "bytes 8-10/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha1": "resumed",
                "size": 11
            })))
            .with_priority(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(resumable))
            .respond_with(ResponseTemplate::new(202))
            .with_priority(3)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("token")));
        let payload = Bytes::from_static(b"01234567890");
        let mut session = client.start_session(&name, 11).unwrap();
        assert_eq!(session.chunk_size(), 4);

        let err = client
            .upload_object_resumable(&Context::new(), "bucket", &name, &mut session, &payload, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(session.cursor(), 4);

        // A second process picks the upload up from the persisted values
        let mut resumed = UploadSession::resume(
            session.id().clone(),
            session.total(),
            session.chunk_size(),
            session.cursor(),
        )
        .unwrap();
        let details = client
            .upload_object_resumable(&Context::new(), "bucket", &name, &mut resumed, &payload, None)
            .await
            .unwrap();

        assert_eq!(details.sha1, "resumed");
        let ranges: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.headers.get("content-range").unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            ranges,
            vec!["bytes 0-3/11", "bytes 4-7/11", "bytes 4-7/11", "bytes 8-10/11"]
        );
        let ids: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.headers.get("session-id").unwrap().to_str().unwrap().to_string())
            .collect();
        assert!(ids.iter().all(|id| id == session.id().as_str()));
    }

    #[tokio::test]
    async fn test_object_details_uses_read_scope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oss/v2/buckets/bucket/objects/a.txt/details"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "objectKey": "a.txt",
                "sha1": "abc"
            })))
            .mount(&server)
            .await;

        let auth = Arc::new(RecordingAuth::default());
        let client = client_for(&server, auth.clone());
        let details = client
            .object_details(&Context::new(), "bucket", "a.txt")
            .await
            .unwrap();

        assert_eq!(details.object_key, "a.txt");
        assert_eq!(*auth.scopes.lock().unwrap(), vec!["data:read"]);
    }

    #[tokio::test]
    async fn test_auth_failure_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("")));
        let result = client
            .upload_object(&Context::new(), "bucket", "a.txt", Bytes::from_static(b"x"))
            .await;

        assert!(matches!(result, Err(Error::Authentication(_))));
    }
}
