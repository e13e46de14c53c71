//! Rate-limited request construction
//!
//! [`RequestGate`] is the single entry point for every outgoing request: it
//! resolves the request to its limiter, waits for a token, then hands back a
//! [`RequestBuilder`] carrying only the method, URL and body. Headers and
//! sending stay with the caller.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::limits::{EndpointLimitTable, LimiterRegistry};
use reqwest::{Body, Client, Method, RequestBuilder, Url};
use std::time::Duration;
use tracing::{debug, instrument};

/// Gate that blocks each request until its endpoint's limiter admits it
#[derive(Debug)]
pub struct RequestGate {
    http: Client,
    registry: LimiterRegistry,
}

impl RequestGate {
    /// Build a gate over an existing HTTP client
    pub fn new(http: Client, table: &EndpointLimitTable) -> Result<Self> {
        Ok(Self {
            http,
            registry: LimiterRegistry::new(table)?,
        })
    }

    /// Build a gate with its own HTTP client
    pub fn with_timeout(table: &EndpointLimitTable, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("osspilot/{}", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Self::new(http, table)
    }

    pub fn registry(&self) -> &LimiterRegistry {
        &self.registry
    }

    /// Wait for capacity on the limiter governing `method url`, then build
    /// the request.
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`] if `ctx`
    /// ends first; nothing is sent in that case.
    #[instrument(level = "debug", skip(self, ctx, body), fields(limiter = tracing::field::Empty))]
    pub async fn dispatch(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        body: Option<Body>,
    ) -> Result<RequestBuilder> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("invalid request URL '{}': {}", url, e)))?;

        let limiter = self.registry.lookup_url(&method, &url);
        tracing::Span::current().record("limiter", limiter.label().as_str());

        limiter.bucket().acquire(ctx).await?;
        debug!("rate limit token acquired");

        let request = self.http.request(method, url);
        Ok(match body {
            Some(body) => request.body(body),
            None => request,
        })
    }
}
