//! [`BlobStore`]: the `object_store`-backed [`CheckpointStore`].

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion,
};
use tracing::{debug, warn};

use evhub_core::error::{Operation, Result as CoreResult};
use evhub_core::ownership::{Checkpoint, OwnerId, PartitionOwnership, VersionToken};
use evhub_core::store::CheckpointStore;

use crate::error::Error;
use crate::paths;

/// Canonical metadata keys, per spec.md §6's "Persisted layout".
const OWNER_ID_KEY: &str = "ownerid";
const SEQUENCE_NUMBER_KEY: &str = "sequencenumber";
const OFFSET_KEY: &str = "offset";

/// Reference [`CheckpointStore`] backed by any `object_store::ObjectStore`
/// (local disk, S3, Azure, GCS, or `object_store::memory::InMemory` for
/// tests) that supports conditional writes.
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
}

impl BlobStore {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn claim_one(&self, candidate: PartitionOwnership) -> Result<Option<PartitionOwnership>, Error> {
        let path = paths::ownership_path(
            &candidate.fully_qualified_namespace,
            &candidate.event_hub_name,
            &candidate.consumer_group,
            &candidate.partition_id,
        );

        let mode = match &candidate.version {
            Some(token) => PutMode::Update(UpdateVersion { e_tag: Some(token.0.clone()), version: None }),
            None => PutMode::Create,
        };

        let mut attributes = Attributes::new();
        if let Some(owner) = &candidate.owner_id {
            attributes.insert(
                Attribute::Metadata(Cow::Borrowed(OWNER_ID_KEY)),
                AttributeValue::from(owner.0.clone()),
            );
        }

        let outcome = self
            .store
            .put_opts(&path, PutPayload::from_static(b""), PutOptions { mode, attributes, ..Default::default() })
            .await;

        match outcome {
            Ok(result) => {
                let version = result
                    .e_tag
                    .or(result.version)
                    .map(VersionToken)
                    .or_else(|| candidate.version.clone());
                let last_modified = self
                    .store
                    .head(&path)
                    .await
                    .map(|meta| meta.last_modified)
                    .unwrap_or_else(|_| chrono::Utc::now());
                Ok(Some(PartitionOwnership { version, last_modified: Some(last_modified), ..candidate }))
            }
            // A lost compare-and-set is the normal "someone else got there
            // first" case (spec.md §4.1: "failed entries are silently
            // omitted"), not an error.
            Err(object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. }) => {
                debug!(partition = %candidate.partition_id, "claim lost the compare-and-set race");
                Ok(None)
            }
            Err(source) => Err(Error::store(Operation::ClaimOwnership, source)),
        }
    }

    async fn read_ownership(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
        location: &object_store::path::Path,
    ) -> Result<Option<PartitionOwnership>, Error> {
        let Some(partition_id) = paths::partition_id_of(location) else {
            return Ok(None);
        };
        let result = self
            .store
            .get(location)
            .await
            .map_err(|source| Error::store(Operation::ListOwnership, source))?;
        let meta = result.meta.clone();
        let attributes = result
            .attributes
            .get(&Attribute::Metadata(Cow::Borrowed(OWNER_ID_KEY)))
            .map(attribute_value_to_string);

        Ok(Some(PartitionOwnership {
            fully_qualified_namespace: namespace.to_string(),
            event_hub_name: hub.to_string(),
            consumer_group: group.to_string(),
            partition_id,
            owner_id: attributes.map(OwnerId),
            last_modified: Some(meta.last_modified),
            version: meta.e_tag.or(meta.version).map(VersionToken),
        }))
    }

    async fn read_checkpoint(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
        location: &object_store::path::Path,
    ) -> Result<Option<Checkpoint>, Error> {
        let Some(partition_id) = paths::partition_id_of(location) else {
            return Ok(None);
        };
        let result = self
            .store
            .get(location)
            .await
            .map_err(|source| Error::store(Operation::ListCheckpoints, source))?;

        let offset = result
            .attributes
            .get(&Attribute::Metadata(Cow::Borrowed(OFFSET_KEY)))
            .map(attribute_value_to_string)
            .and_then(|s| s.parse::<i64>().ok());
        let sequence_number = result
            .attributes
            .get(&Attribute::Metadata(Cow::Borrowed(SEQUENCE_NUMBER_KEY)))
            .map(attribute_value_to_string)
            .and_then(|s| s.parse::<i64>().ok());

        let (Some(offset), Some(sequence_number)) = (offset, sequence_number) else {
            return Err(Error::Malformed {
                path: location.to_string(),
                message: "missing offset/sequencenumber metadata".into(),
            });
        };

        Ok(Some(Checkpoint {
            fully_qualified_namespace: namespace.to_string(),
            event_hub_name: hub.to_string(),
            consumer_group: group.to_string(),
            partition_id,
            offset,
            sequence_number,
        }))
    }
}

fn attribute_value_to_string(value: &AttributeValue) -> String {
    value.as_ref().to_string()
}

#[async_trait]
impl CheckpointStore for BlobStore {
    async fn list_ownership(
        &self,
        namespace: &str,
        hub: &str,
        group: &str,
    ) -> CoreResult<Vec<PartitionOwnership>> {
        let prefix = paths::ownership_prefix(namespace, hub, group);
        let mut stream = self.store.list(Some(&prefix));
        let mut out = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|source| Error::store(Operation::ListOwnership, source))?;
            match self.read_ownership(namespace, hub, group, &meta.location).await {
                Ok(Some(ownership)) => out.push(ownership),
                Ok(None) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(out)
    }

    async fn claim_ownership(
        &self,
        ownerships: Vec<PartitionOwnership>,
    ) -> CoreResult<Vec<PartitionOwnership>> {
        let mut out = Vec::with_capacity(ownerships.len());
        for candidate in ownerships {
            match self.claim_one(candidate).await {
                Ok(Some(ownership)) => out.push(ownership),
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "claim_ownership failed for one candidate");
                    return Err(err.into());
                }
            }
        }
        Ok(out)
    }

    async fn list_checkpoints(&self, namespace: &str, hub: &str, group: &str) -> CoreResult<Vec<Checkpoint>> {
        let prefix = paths::checkpoint_prefix(namespace, hub, group);
        let mut stream = self.store.list(Some(&prefix));
        let mut out = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|source| Error::store(Operation::ListCheckpoints, source))?;
            match self.read_checkpoint(namespace, hub, group, &meta.location).await {
                Ok(Some(checkpoint)) => out.push(checkpoint),
                Ok(None) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(out)
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> CoreResult<()> {
        let path = paths::checkpoint_path(
            &checkpoint.fully_qualified_namespace,
            &checkpoint.event_hub_name,
            &checkpoint.consumer_group,
            &checkpoint.partition_id,
        );

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed(OFFSET_KEY)),
            AttributeValue::from(checkpoint.offset.to_string()),
        );
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed(SEQUENCE_NUMBER_KEY)),
            AttributeValue::from(checkpoint.sequence_number.to_string()),
        );

        // Unconditional last-writer-wins (spec.md §4.1): no compare-and-set.
        self.store
            .put_opts(
                &path,
                PutPayload::from_static(b""),
                PutOptions { mode: PutMode::Overwrite, attributes, ..Default::default() },
            )
            .await
            .map_err(|source| Error::store(Operation::UpdateCheckpoint, source))?;
        Ok(())
    }
}
