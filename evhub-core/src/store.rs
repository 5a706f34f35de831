//! The checkpoint/ownership store interface (spec'd component 4.1).
//!
//! A durable external key/value surface used for both ownership leases and
//! per-partition checkpoints, with optimistic-concurrency semantics via an
//! opaque version token. Two implementations ship: [`crate::store_memory`]
//! (in-process, for tests) and the `evhub-store-blob` crate (blob-backed,
//! for production use).

use async_trait::async_trait;

use crate::error::Result;
use crate::ownership::{Checkpoint, PartitionOwnership};

/// Durable external surface for ownership leases and checkpoints.
///
/// Implementations retry nothing themselves — transient failures are
/// surfaced to the caller, which retries per its own `RetryPolicy`
/// (see spec.md §4.1: "All operations are retried locally by the caller").
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// List every ownership record for a (namespace, hub, group), active or
    /// expired.
    async fn list_ownership(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
    ) -> Result<Vec<PartitionOwnership>>;

    /// Attempt to claim/renew a batch of ownership records.
    ///
    /// Each element carries the version token previously observed (or
    /// `None` for a first-ever claim). The store performs an atomic
    /// compare-and-set per element: it succeeds iff the stored token
    /// equals the presented one (or no record exists and the presented
    /// token is `None`). Failed elements are silently omitted from the
    /// result — partial success is the normal case, not an error.
    async fn claim_ownership(
        &self,
        ownerships: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>>;

    /// List every checkpoint for a (namespace, hub, group).
    async fn list_checkpoints(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
    ) -> Result<Vec<Checkpoint>>;

    /// Write a checkpoint unconditionally (last-writer-wins).
    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;
}
