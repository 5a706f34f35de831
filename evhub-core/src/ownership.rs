//! Ownership leases and checkpoints — the two record types the
//! [`CheckpointStore`](crate::store::CheckpointStore) persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{OffsetValue, PartitionId, SequenceNumber};

/// Unique identifier of one live processor instance.
///
/// Generated at construction unless the caller overrides it through
/// [`crate::config::ProcessorConfig::with_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque value returned by the store enabling optimistic concurrency.
///
/// Callers never construct or inspect these; they're captured from one
/// store response and presented verbatim to a later claim/renew/write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionToken(pub String);

/// A time-bounded claim on a partition by one processor instance.
///
/// At most one record exists per (namespace, hub, group, partition). A
/// lease is *active* iff `now - last_modified < ownership_expiration`;
/// otherwise it's *expired* and eligible to be claimed by anyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionOwnership {
    pub fully_qualified_namespace: String,
    pub event_hub_name: String,
    pub consumer_group: String,
    pub partition_id: PartitionId,
    /// Empty/absent on a not-yet-claimed record; non-empty once claimed.
    pub owner_id: Option<OwnerId>,
    /// Assigned by the store at write time. `None` on a record this
    /// instance has observed but never successfully claimed/renewed.
    pub last_modified: Option<DateTime<Utc>>,
    /// Assigned by the store at write time. Present on a claim submitted
    /// for the first time as `None` (the store treats an absent token as
    /// "no record exists yet").
    pub version: Option<VersionToken>,
}

impl PartitionOwnership {
    /// Construct an unclaimed ownership record to present to `ClaimOwnership`
    /// as a first-ever claim attempt (no prior version token).
    #[must_use]
    pub fn first_claim(
        namespace: impl Into<String>,
        hub: impl Into<String>,
        group: impl Into<String>,
        partition_id: impl Into<PartitionId>,
        owner_id: OwnerId,
    ) -> Self {
        Self {
            fully_qualified_namespace: namespace.into(),
            event_hub_name: hub.into(),
            consumer_group: group.into(),
            partition_id: partition_id.into(),
            owner_id: Some(owner_id),
            last_modified: None,
            version: None,
        }
    }

    /// Whether this record's lease is still active as of `now`, given the
    /// configured TTL. Uses the store-assigned `last_modified`, never the
    /// local clock's notion of "when I last saw this" — see `DESIGN.md`'s
    /// clock-skew resolution.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>, ownership_expiration: chrono::Duration) -> bool {
        match (&self.owner_id, self.last_modified) {
            (Some(_), Some(last_modified)) => now - last_modified < ownership_expiration,
            _ => false,
        }
    }
}

/// A durable (offset, sequence) position marking progress for one
/// (group, partition). Last-writer-wins; the store does not enforce
/// monotonicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub fully_qualified_namespace: String,
    pub event_hub_name: String,
    pub consumer_group: String,
    pub partition_id: PartitionId,
    pub offset: OffsetValue,
    pub sequence_number: SequenceNumber,
}
