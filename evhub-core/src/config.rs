//! Configuration for a [`crate::processor::Processor`] instance.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ownership::OwnerId;
use crate::retry::RetryOptions;

/// Tuning for one processor instance.
///
/// `ownership_expiration` must be at least twice `load_balance_update`
/// (enforced by [`ProcessorConfig::validate`]): a lease has to survive at
/// least one missed renewal cycle, or every instance would see every other
/// instance's leases as perpetually expired and the balancer would thrash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Identity presented to the checkpoint store. Generated once at
    /// construction unless overridden.
    #[serde(default = "OwnerId::generate")]
    pub identifier: OwnerId,

    /// How often the load-balancer loop runs one full cycle.
    #[serde(default = "default_load_balance_update", with = "humantime_serde")]
    pub load_balance_update: Duration,

    /// How long an unrenewed ownership lease stays active.
    #[serde(default = "default_ownership_expiration", with = "humantime_serde")]
    pub ownership_expiration: Duration,

    /// Per-partition-pump read wait: how long `read_events` blocks for the
    /// first event of a batch before returning empty.
    #[serde(default = "default_max_wait_time", with = "humantime_serde")]
    pub max_wait_time: Duration,

    /// Whether consumers request last-enqueued-event metadata from the
    /// transport (cost/latency tradeoff the transport implementation is
    /// free to ignore).
    #[serde(default)]
    pub track_last_enqueued_event_properties: bool,

    /// Retry behavior for store and transport operations.
    #[serde(default)]
    pub retry_options: RetryOptions,
}

fn default_load_balance_update() -> Duration {
    Duration::from_secs(10)
}

fn default_ownership_expiration() -> Duration {
    Duration::from_secs(30)
}

fn default_max_wait_time() -> Duration {
    Duration::from_secs(60)
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            identifier: OwnerId::generate(),
            load_balance_update: default_load_balance_update(),
            ownership_expiration: default_ownership_expiration(),
            max_wait_time: default_max_wait_time(),
            track_last_enqueued_event_properties: false,
            retry_options: RetryOptions::default(),
        }
    }
}

impl ProcessorConfig {
    /// Override the generated identifier, e.g. to recover a known identity
    /// after a restart.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = OwnerId(identifier.into());
        self
    }

    #[must_use]
    pub fn with_load_balance_update(mut self, interval: Duration) -> Self {
        self.load_balance_update = interval;
        self
    }

    #[must_use]
    pub fn with_ownership_expiration(mut self, expiration: Duration) -> Self {
        self.ownership_expiration = expiration;
        self
    }

    #[must_use]
    pub fn with_max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time = max_wait;
        self
    }

    #[must_use]
    pub fn with_track_last_enqueued_event_properties(mut self, track: bool) -> Self {
        self.track_last_enqueued_event_properties = track;
        self
    }

    #[must_use]
    pub fn with_retry_options(mut self, retry_options: RetryOptions) -> Self {
        self.retry_options = retry_options;
        self
    }

    /// `ownership_expiration` as a [`chrono::Duration`], for arithmetic
    /// against store-assigned timestamps.
    #[must_use]
    pub fn ownership_expiration_chrono(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.ownership_expiration)
            .unwrap_or_else(|_| ChronoDuration::seconds(30))
    }

    /// Reject configurations where a lease can't survive a single missed
    /// renewal cycle.
    pub fn validate(&self) -> Result<()> {
        if self.ownership_expiration < self.load_balance_update.saturating_mul(2) {
            return Err(Error::Configuration(format!(
                "ownership_expiration ({:?}) must be at least twice load_balance_update ({:?})",
                self.ownership_expiration, self.load_balance_update
            )));
        }
        Ok(())
    }
}
