//! Access token acquisition

use crate::error::{Error, Result};
use async_trait::async_trait;

/// Scopes needed to upload an object and read back its metadata
pub const UPLOAD_SCOPES: &str = "data:write data:read";

/// Scope needed to read object metadata
pub const READ_SCOPES: &str = "data:read";

/// Source of bearer tokens for the storage service
///
/// Implementations may cache and refresh tokens; the client asks for one at
/// the start of every operation.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a token valid for the space-separated `scopes`
    async fn access_token(&self, scopes: &str) -> Result<String>;
}

/// A fixed, externally obtained token
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self, _scopes: &str) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(Error::Authentication("access token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}
