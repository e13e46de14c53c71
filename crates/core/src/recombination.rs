//! Waiting for a chunked upload to be assembled
//!
//! After the last chunk the service may still be stitching the object
//! together. The only signal is the details endpoint: the `sha1` field stays
//! empty until the object is ready.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::gate::RequestGate;
use crate::object::{fetch_details, ObjectDetails, ObjectTarget};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RECOMBINATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Polling cadence and overall budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecombinationConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for RecombinationConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_RECOMBINATION_TIMEOUT,
        }
    }
}

/// Polls object details until the content hash is populated
#[derive(Debug, Clone, Copy)]
pub struct RecombinationWaiter<'a> {
    gate: &'a RequestGate,
    config: RecombinationConfig,
}

impl<'a> RecombinationWaiter<'a> {
    pub fn new(gate: &'a RequestGate, config: RecombinationConfig) -> Self {
        Self { gate, config }
    }

    /// Poll every `poll_interval` (first poll one interval from now) until the
    /// object is complete.
    ///
    /// A non-200 answer fails immediately. Running out of time yields
    /// [`Error::RecombinationTimeout`], never a protocol error.
    #[instrument(
        skip_all,
        fields(bucket = target.bucket_key, object = target.object_name)
    )]
    pub async fn await_completion(
        &self,
        ctx: &Context,
        target: ObjectTarget<'_>,
        token: &str,
    ) -> Result<ObjectDetails> {
        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let expiry = tokio::time::sleep(self.config.timeout);
        tokio::pin!(expiry);

        let mut polls: u32 = 0;
        loop {
            let due = ctx
                .run(async {
                    tokio::select! {
                        biased;
                        _ = &mut expiry => false,
                        _ = ticker.tick() => true,
                    }
                })
                .await?;
            if !due {
                return Err(Error::RecombinationTimeout(self.config.timeout));
            }

            polls += 1;
            let details = tokio::select! {
                biased;
                _ = &mut expiry => return Err(Error::RecombinationTimeout(self.config.timeout)),
                result = fetch_details(self.gate, ctx, target, token) => result?,
            };

            if details.is_complete() {
                info!(polls, sha1 = %details.sha1, "object assembled");
                return Ok(details);
            }
            debug!(polls, "object not assembled yet");
        }
    }
}
