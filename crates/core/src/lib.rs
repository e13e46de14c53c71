//! osspilot-core - Core library for the osspilot CLI
//!
//! This library provides rate-limited access to the object storage service:
//! per-endpoint token buckets, a request gate every call goes through,
//! chunked (resumable) uploads with recombination polling, and configuration
//! management.

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod limits;
pub mod object;
pub mod recombination;
pub mod upload;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use auth::{StaticToken, TokenProvider};
pub use client::OssClient;
pub use config::{
    config_exists, get_config_path, load_config, load_config_from, save_config, save_config_to,
    validate_config,
};
pub use config::{Config, ConfigFile, LoggingConfig, ACCESS_TOKEN_ENV};
pub use context::Context;
pub use error::{Error, Result};
pub use gate::RequestGate;
pub use limiter::TokenBucket;
pub use limits::{EndpointLimitTable, EndpointRule, LimitScope, LimiterRegistry, RouteLimiter};
pub use object::{ObjectDetails, ObjectTarget};
pub use recombination::{RecombinationConfig, RecombinationWaiter};
pub use reqwest::Method;
pub use upload::{
    requires_chunking, ChunkRange, ChunkedOutcome, ChunkedUploader, SessionId, UploadConfig,
    UploadProgress, UploadSession,
};
