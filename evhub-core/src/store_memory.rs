//! In-memory [`CheckpointStore`] for tests and local development.
//!
//! Mirrors the shape of a real compare-and-set store (e.g.
//! `evhub-store-blob`'s blob-backed implementation) using a monotonically
//! increasing counter as the opaque version token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::PartitionId;
use crate::ownership::{Checkpoint, PartitionOwnership, VersionToken};
use crate::store::CheckpointStore;

fn scope_key(namespace: &str, hub: &str, group: &str, partition: &PartitionId) -> String {
    format!("{namespace}/{hub}/{group}/{partition}")
}

/// In-memory reference implementation of [`CheckpointStore`].
#[derive(Default)]
pub struct InMemoryStore {
    ownership: RwLock<HashMap<String, PartitionOwnership>>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    next_version: AtomicU64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(&self) -> VersionToken {
        let v = self.next_version.fetch_add(1, Ordering::SeqCst);
        VersionToken(v.to_string())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn list_ownership(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
    ) -> Result<Vec<PartitionOwnership>> {
        let prefix = format!("{namespace}/{hub}/{group}/");
        let ownership = self.ownership.read().await;
        Ok(ownership
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn claim_ownership(
        &self,
        ownerships: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>> {
        let mut store = self.ownership.write().await;
        let mut claimed = Vec::with_capacity(ownerships.len());

        for mut candidate in ownerships {
            let key = scope_key(
                &candidate.fully_qualified_namespace,
                &candidate.event_hub_name,
                &candidate.consumer_group,
                &candidate.partition_id,
            );

            let current_token = store.get(&key).and_then(|o| o.version.clone());
            if current_token != candidate.version {
                continue;
            }

            candidate.last_modified = Some(Utc::now());
            candidate.version = Some(self.next_token());
            store.insert(key, candidate.clone());
            claimed.push(candidate);
        }

        Ok(claimed)
    }

    async fn list_checkpoints(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
    ) -> Result<Vec<Checkpoint>> {
        let prefix = format!("{namespace}/{hub}/{group}/");
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let key = scope_key(
            &checkpoint.fully_qualified_namespace,
            &checkpoint.event_hub_name,
            &checkpoint.consumer_group,
            &checkpoint.partition_id,
        );
        self.checkpoints.write().await.insert(key, checkpoint);
        Ok(())
    }
}
