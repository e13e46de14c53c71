//! Chunked (resumable) uploads
//!
//! Payloads above the chunking threshold are sent as a sequence of byte ranges
//! to the object's `/resumable` endpoint, all tagged with the same session id.
//! The service answers `202 Accepted` for every range but the last, and
//! `200 OK` with the object metadata once the final range is in. Ranges are
//! sent strictly one after another.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::gate::RequestGate;
use crate::object::{protocol_error, read_details, send, ObjectDetails, ObjectTarget};
use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Body, Method, StatusCode};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Payloads larger than this many bytes are uploaded in chunks
pub const DEFAULT_CHUNKING_THRESHOLD: u64 = 100_000_000;

/// Bytes per chunk
pub const DEFAULT_CHUNK_SIZE: u64 = 5_000_000;

const SESSION_HEADER: &str = "Session-Id";
const CHUNK_CONTENT_TYPE: &str = "application/stream";

/// Upload configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    /// Payloads strictly larger than this are chunked
    pub chunking_threshold: u64,
    pub chunk_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunking_threshold: DEFAULT_CHUNKING_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl UploadConfig {
    /// Check if a payload of `len` bytes needs a chunked upload
    pub fn requires_chunking(&self, len: u64) -> bool {
        len > self.chunking_threshold
    }
}

/// Check if a payload of `len` bytes needs a chunked upload under the
/// default threshold
pub fn requires_chunking(len: u64) -> bool {
    UploadConfig::default().requires_chunking(len)
}

/// Identifier tying the chunks of one upload attempt together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Derive a fresh id from the object name, the current time and a random
    /// suffix, so two attempts on the same object never share one
    pub fn generate(object_name: &str) -> Self {
        let digest = Sha256::digest(object_name.as_bytes());
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: u32 = rand::random();
        Self(format!("{}-{}-{:08x}", hex::encode(&digest[..8]), millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inclusive byte range of a chunked upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ChunkRange {
    /// `Content-Range` header value, e.g. `bytes 0-4999999/12000000`
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }

    pub fn is_last(&self) -> bool {
        self.end + 1 == self.total
    }
}

/// State of one chunked upload attempt
///
/// The cursor only moves forward when the service acknowledges a chunk, so a
/// session left behind by a failed upload can be passed to
/// [`ChunkedUploader::upload`] again to continue where it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    id: SessionId,
    total: u64,
    chunk_size: u64,
    cursor: u64,
}

impl UploadSession {
    /// Start a new session for `total` bytes
    pub fn new(object_name: &str, total: u64, chunk_size: u64) -> Result<Self> {
        Self::resume(SessionId::generate(object_name), total, chunk_size, 0)
    }

    /// Rebuild a session from persisted values
    pub fn resume(id: SessionId, total: u64, chunk_size: u64, cursor: u64) -> Result<Self> {
        if total == 0 {
            return Err(Error::InvalidInput(
                "cannot upload an empty payload in chunks".to_string(),
            ));
        }
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be greater than 0".to_string()));
        }
        if cursor > total {
            return Err(Error::InvalidInput(format!(
                "session cursor {} is past the end of a {} byte payload",
                cursor, total
            )));
        }

        Ok(Self {
            id,
            total,
            chunk_size,
            cursor,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// First byte not yet acknowledged by the service
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == self.total
    }

    /// Number of chunks the whole payload is split into
    pub fn chunk_count(&self) -> u64 {
        self.total.div_ceil(self.chunk_size)
    }

    /// Number of chunks acknowledged so far
    pub fn chunks_sent(&self) -> u64 {
        self.cursor.div_ceil(self.chunk_size)
    }

    /// Range to send next, if any bytes remain
    pub fn next_chunk(&self) -> Option<ChunkRange> {
        if self.cursor >= self.total {
            return None;
        }
        let end = (self.cursor + self.chunk_size).min(self.total) - 1;
        Some(ChunkRange {
            start: self.cursor,
            end,
            total: self.total,
        })
    }

    fn advance(&mut self, range: ChunkRange) {
        self.cursor = range.end + 1;
    }

    fn progress(&self) -> UploadProgress {
        UploadProgress {
            bytes_sent: self.cursor,
            total_bytes: self.total,
            chunks_sent: self.chunks_sent(),
            chunk_count: self.chunk_count(),
        }
    }
}

/// Progress of a chunked upload, reported after each acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub chunks_sent: u64,
    pub chunk_count: u64,
}

impl UploadProgress {
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Callback receiving [`UploadProgress`] updates
pub type ProgressFn<'a> = &'a (dyn Fn(UploadProgress) + Send + Sync);

/// How a chunked upload ended
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkedOutcome {
    /// The final chunk was answered with the object metadata
    Complete(ObjectDetails),
    /// Every chunk was accepted but the service is still assembling the
    /// object; poll its details until the hash appears
    Pending,
}

/// Sends a payload as sequential chunks through a [`RequestGate`]
#[derive(Debug, Clone, Copy)]
pub struct ChunkedUploader<'a> {
    gate: &'a RequestGate,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(gate: &'a RequestGate) -> Self {
        Self { gate }
    }

    /// Send the unacknowledged part of `payload`, starting at the session
    /// cursor.
    ///
    /// On error the session keeps the cursor of the first chunk that was not
    /// acknowledged. Chunks already accepted are not rolled back.
    #[instrument(
        skip_all,
        fields(
            bucket = target.bucket_key,
            object = target.object_name,
            session = %session.id(),
            total = session.total()
        )
    )]
    pub async fn upload(
        &self,
        ctx: &Context,
        target: ObjectTarget<'_>,
        session: &mut UploadSession,
        payload: &Bytes,
        token: &str,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ChunkedOutcome> {
        if payload.len() as u64 != session.total() {
            return Err(Error::InvalidInput(format!(
                "payload is {} bytes but the upload session expects {}",
                payload.len(),
                session.total()
            )));
        }

        let result = self
            .send_chunks(ctx, target, session, payload, token, progress)
            .await;

        if let Err(err) = &result {
            warn!(
                session = %session.id(),
                cursor = session.cursor(),
                error = %err,
                "chunked upload aborted"
            );
        }
        result
    }

    async fn send_chunks(
        &self,
        ctx: &Context,
        target: ObjectTarget<'_>,
        session: &mut UploadSession,
        payload: &Bytes,
        token: &str,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ChunkedOutcome> {
        let url = target.resumable_url();

        loop {
            let Some(range) = session.next_chunk() else {
                return Err(Error::InvalidInput(format!(
                    "upload session {} has no bytes left to send",
                    session.id()
                )));
            };

            let chunk = payload.slice(range.start as usize..=range.end as usize);
            let request = self
                .gate
                .dispatch(ctx, Method::PUT, &url, Some(Body::from(chunk)))
                .await?
                .bearer_auth(token)
                .header(CONTENT_TYPE, CHUNK_CONTENT_TYPE)
                .header(CONTENT_RANGE, range.content_range())
                .header(SESSION_HEADER, session.id().as_str());

            let response = send(ctx, request).await?;
            let status = response.status();

            if status == StatusCode::ACCEPTED {
                session.advance(range);
                debug!(range = %range.content_range(), "chunk accepted");
                if let Some(report) = progress {
                    report(session.progress());
                }
                if range.is_last() {
                    info!("all chunks accepted, object not yet assembled");
                    return Ok(ChunkedOutcome::Pending);
                }
            } else if status == StatusCode::OK && range.is_last() {
                // The cursor only moves once the final body decodes, so a
                // garbled reply leaves the last chunk to resend
                let details = read_details(ctx, response).await?;
                session.advance(range);
                if let Some(report) = progress {
                    report(session.progress());
                }
                info!(sha1 = %details.sha1, "chunked upload complete");
                return Ok(ChunkedOutcome::Complete(details));
            } else {
                return Err(protocol_error(ctx, response).await);
            }
        }
    }
}
