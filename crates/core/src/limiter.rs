//! Token bucket rate limiting
//!
//! Each bucket admits one request per refill interval with no burst allowance,
//! using the GCRA limiter from the governor crate.

use crate::context::Context;
use crate::error::{Error, Result};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Rate limiter with capacity 1, refilled continuously at a per-minute ceiling
///
/// Safe to share between tasks; waiting callers are served best-effort, not
/// in arrival order. The clock is the wall clock unless built with
/// [`TokenBucket::with_clock`].
pub struct TokenBucket<C: Clock = DefaultClock> {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>,
    per_minute: NonZeroU32,
}

impl TokenBucket {
    /// Create a bucket admitting `requests_per_minute` acquisitions per minute
    pub fn per_minute(requests_per_minute: u32) -> Result<Self> {
        Self::with_clock(requests_per_minute, DefaultClock::default())
    }

    /// Wait until a token is available, or until `ctx` is cancelled or expires.
    ///
    /// A cancelled wait takes no token.
    pub async fn acquire(&self, ctx: &Context) -> Result<()> {
        ctx.run(self.limiter.until_ready()).await
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a bucket driven by `clock`
    pub fn with_clock(requests_per_minute: u32, clock: C) -> Result<Self> {
        let per_minute = NonZeroU32::new(requests_per_minute).ok_or_else(|| {
            Error::InvalidConfig("rate limit must allow at least one request per minute".to_string())
        })?;

        let quota = Quota::with_period(ONE_MINUTE / per_minute.get())
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "rate limit of {} requests per minute is too high",
                    per_minute
                ))
            })?
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            limiter: GovernorRateLimiter::direct_with_clock(quota, clock),
            per_minute,
        })
    }

    /// Configured ceiling in requests per minute
    pub fn ceiling(&self) -> u32 {
        self.per_minute.get()
    }

    /// Time it takes to refill one token
    pub fn refill_interval(&self) -> Duration {
        ONE_MINUTE / self.per_minute.get()
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl<C: Clock> fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}
