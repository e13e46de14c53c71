//! Object metadata and single-request object operations

use crate::context::Context;
use crate::error::{Error, Result};
use crate::gate::RequestGate;
use bytes::Bytes;
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Metadata the storage service returns for an uploaded object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectDetails {
    pub bucket_key: String,
    #[serde(alias = "objectID")]
    pub object_id: String,
    pub object_key: String,
    /// Content hash; empty until the service has finished assembling the object
    pub sha1: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub location: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub block_sizes: Vec<i64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub deltas: HashMap<String, String>,
}

impl ObjectDetails {
    /// True once the content hash is populated
    pub fn is_complete(&self) -> bool {
        !self.sha1.is_empty()
    }
}

/// Addresses one object below a buckets collection URL
#[derive(Debug, Clone, Copy)]
pub struct ObjectTarget<'a> {
    pub buckets_url: &'a str,
    pub bucket_key: &'a str,
    pub object_name: &'a str,
}

impl<'a> ObjectTarget<'a> {
    pub fn new(buckets_url: &'a str, bucket_key: &'a str, object_name: &'a str) -> Self {
        Self {
            buckets_url,
            bucket_key,
            object_name,
        }
    }

    /// `{buckets}/{bucket}/objects/{object}`
    pub fn object_url(&self) -> String {
        format!(
            "{}/{}/objects/{}",
            self.buckets_url.trim_end_matches('/'),
            self.bucket_key,
            self.object_name
        )
    }

    /// Endpoint receiving chunked uploads
    pub fn resumable_url(&self) -> String {
        format!("{}/resumable", self.object_url())
    }

    /// Endpoint reporting object metadata
    pub fn details_url(&self) -> String {
        format!("{}/details", self.object_url())
    }
}

/// Send a built request, bounded by `ctx`
pub(crate) async fn send(ctx: &Context, request: RequestBuilder) -> Result<Response> {
    let response = ctx.run(request.send()).await??;
    Ok(response)
}

/// Decode a metadata response body
pub(crate) async fn read_details(ctx: &Context, response: Response) -> Result<ObjectDetails> {
    let details = ctx.run(response.json::<ObjectDetails>()).await??;
    Ok(details)
}

/// Turn an unexpected response into an error carrying its status and body
pub(crate) async fn protocol_error(ctx: &Context, response: Response) -> Error {
    let status = response.status().as_u16();
    match ctx.run(response.text()).await {
        Ok(body) => Error::Protocol {
            status,
            body: body.unwrap_or_default(),
        },
        Err(err) => err,
    }
}

/// Upload `payload` in a single request
#[instrument(
    level = "debug",
    skip(gate, ctx, token, payload),
    fields(bucket = target.bucket_key, object = target.object_name, size = payload.len())
)]
pub async fn put_object(
    gate: &RequestGate,
    ctx: &Context,
    target: ObjectTarget<'_>,
    token: &str,
    payload: Bytes,
) -> Result<ObjectDetails> {
    let request = gate
        .dispatch(ctx, Method::PUT, &target.object_url(), Some(Body::from(payload)))
        .await?
        .bearer_auth(token);

    let response = send(ctx, request).await?;
    if response.status() != StatusCode::OK {
        return Err(protocol_error(ctx, response).await);
    }

    let details = read_details(ctx, response).await?;
    debug!(sha1 = %details.sha1, "object stored");
    Ok(details)
}

/// Fetch the current metadata of an object
pub async fn fetch_details(
    gate: &RequestGate,
    ctx: &Context,
    target: ObjectTarget<'_>,
    token: &str,
) -> Result<ObjectDetails> {
    let request = gate
        .dispatch(ctx, Method::GET, &target.details_url(), None)
        .await?
        .bearer_auth(token);

    let response = send(ctx, request).await?;
    if response.status() != StatusCode::OK {
        return Err(protocol_error(ctx, response).await);
    }
    read_details(ctx, response).await
}
