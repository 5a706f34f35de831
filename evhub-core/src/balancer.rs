//! The load-balancer loop: one task per processor instance that renews
//! owned leases, observes peers, claims at most one partition per cycle,
//! and starts/stops pumps accordingly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ProcessorConfig;
use crate::error::{Operation, Result};
use crate::event::{EventPosition, PartitionId};
use crate::ownership::{OwnerId, PartitionOwnership, VersionToken};
use crate::pump::{CloseReason, Handlers, PartitionContext, PartitionPump};
use crate::retry::RetryPolicy;
use crate::store::CheckpointStore;
use crate::transport::{ConsumerOptions, Transport};

/// Read-batch size used by every pump this loop starts. Not user-
/// configurable: spec.md's configuration table only exposes per-try wait
/// time and retry behavior at this layer, not batch size.
const DEFAULT_MAX_BATCH: usize = 100;

struct PumpHandle {
    cancel: CancellationToken,
    close_reason: Arc<Mutex<CloseReason>>,
    join: JoinHandle<Result<()>>,
}

/// Owns `InstanceOwnership` and `ActivePumps` for one processor instance
/// and drives the renew/reap/heal/observe/claim/pace cycle (spec.md §4.4).
pub struct LoadBalancer {
    namespace: String,
    hub: String,
    group: String,
    identifier: OwnerId,
    config: ProcessorConfig,
    store: Arc<dyn CheckpointStore>,
    transport: Arc<dyn Transport>,
    handlers: Handlers,
    instance_ownership: HashMap<PartitionId, PartitionOwnership>,
    active_pumps: RwLock<HashMap<PartitionId, PumpHandle>>,
    rng: StdRng,
    cancel: CancellationToken,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        hub: impl Into<String>,
        group: impl Into<String>,
        config: ProcessorConfig,
        store: Arc<dyn CheckpointStore>,
        transport: Arc<dyn Transport>,
        handlers: Handlers,
    ) -> Self {
        let identifier = config.identifier.clone();
        Self {
            namespace: namespace.into(),
            hub: hub.into(),
            group: group.into(),
            identifier,
            config,
            store,
            transport,
            handlers,
            instance_ownership: HashMap::new(),
            active_pumps: RwLock::new(HashMap::new()),
            rng: StdRng::from_entropy(),
            cancel: CancellationToken::new(),
        }
    }

    /// How many partitions this instance currently believes it owns.
    #[must_use]
    pub fn owned_partition_count(&self) -> usize {
        self.instance_ownership.len()
    }

    async fn retry_op<F, Fut, T>(&self, operation: Operation, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        RetryPolicy::new(self.config.retry_options.clone()).run(operation, f).await
    }

    /// Run the loop until `cancel` fires, then stop every active pump with
    /// reason `Shutdown` and clear `InstanceOwnership`. Leases are not
    /// explicitly surrendered; they expire (spec.md §4.4 "Stop sequence").
    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let start = Instant::now();
            self.run_cycle().await;
            let elapsed = start.elapsed();
            let remaining = self.config.load_balance_update.saturating_sub(elapsed);
            tokio::select! {
                () = tokio::time::sleep(remaining) => {}
                () = cancel.cancelled() => break,
            }
        }
        self.stop_all_pumps(CloseReason::Shutdown).await;
        self.instance_ownership.clear();
    }

    async fn run_cycle(&mut self) {
        self.renew().await;
        self.reap().await;
        self.heal().await;

        let Some(all_ownership) = self.observe().await else { return };
        let Some(partitions) = self.enumerate_partitions().await else { return };

        self.claim_one(&all_ownership, &partitions).await;
    }

    /// Phase A: re-submit every owned record with its current version.
    async fn renew(&mut self) {
        if self.instance_ownership.is_empty() {
            return;
        }
        let candidates: Vec<PartitionOwnership> = self.instance_ownership.values().cloned().collect();
        let store = self.store.clone();
        match self
            .retry_op(Operation::RenewOwnership, move || {
                let store = store.clone();
                let candidates = candidates.clone();
                async move { store.claim_ownership(candidates).await }
            })
            .await
        {
            Ok(renewed) => {
                let renewed_ids: HashSet<PartitionId> =
                    renewed.iter().map(|o| o.partition_id.clone()).collect();
                self.instance_ownership.retain(|id, _| renewed_ids.contains(id));
                for ownership in renewed {
                    self.instance_ownership.insert(ownership.partition_id.clone(), ownership);
                }
            }
            Err(err) => {
                warn!(error = %err, "renewing ownership failed, proceeding with stale view");
                self.handlers.notify_error(None, Operation::RenewOwnership, err).await;
            }
        }
    }

    /// Phase B: stop pumps for partitions we no longer own.
    async fn reap(&mut self) {
        let active: Vec<PartitionId> = self.active_pumps.read().await.keys().cloned().collect();
        for partition in active {
            if !self.instance_ownership.contains_key(&partition) {
                self.stop_pump(&partition, CloseReason::OwnershipLost).await;
            }
        }
    }

    /// Phase C: (re)start a pump for every owned partition with no running
    /// (or crashed) pump.
    async fn heal(&mut self) {
        let owned: Vec<PartitionId> = self.instance_ownership.keys().cloned().collect();
        for partition in owned {
            let needs_restart = {
                let pumps = self.active_pumps.read().await;
                pumps.get(&partition).is_none_or(|handle| handle.join.is_finished())
            };
            if needs_restart {
                self.stop_pump(&partition, CloseReason::Shutdown).await;
                let position = self.lookup_checkpoint_position(&partition).await;
                self.start_pump(partition, position).await;
            }
        }
    }

    /// Phase D: full cross-processor ownership view. Returns `None` (and
    /// skips phases E/F this cycle) on store failure.
    async fn observe(&self) -> Option<Vec<PartitionOwnership>> {
        let store = self.store.clone();
        let (ns, hub, group) = (self.namespace.clone(), self.hub.clone(), self.group.clone());
        match self
            .retry_op(Operation::ListOwnership, move || {
                let store = store.clone();
                let (ns, hub, group) = (ns.clone(), hub.clone(), group.clone());
                async move { store.list_ownership(&ns, &hub, &group).await }
            })
            .await
        {
            Ok(ownership) => Some(ownership),
            Err(err) => {
                self.handlers.notify_error(None, Operation::ListOwnership, err).await;
                None
            }
        }
    }

    /// Phase E: the transport's current partition id set. Returns `None`
    /// (and skips phase F) on failure.
    async fn enumerate_partitions(&self) -> Option<Vec<PartitionId>> {
        let transport = self.transport.clone();
        match self
            .retry_op(Operation::GetPartitionIds, move || {
                let transport = transport.clone();
                async move { transport.get_partition_ids().await }
            })
            .await
        {
            Ok(partitions) => Some(partitions),
            Err(err) => {
                self.handlers.notify_error(None, Operation::GetPartitionIds, err).await;
                None
            }
        }
    }

    /// Phase F: claim at most one partition this cycle.
    async fn claim_one(&mut self, all_ownership: &[PartitionOwnership], partitions: &[PartitionId]) {
        let now = chrono::Utc::now();
        let expiration = self.config.ownership_expiration_chrono();
        let active_view: Vec<PartitionOwnership> =
            all_ownership.iter().filter(|o| o.is_active(now, expiration)).cloned().collect();

        let mut owner_counts: HashMap<OwnerId, usize> = HashMap::new();
        for ownership in &active_view {
            if let Some(owner) = &ownership.owner_id {
                *owner_counts.entry(owner.clone()).or_insert(0) += 1;
            }
        }
        owner_counts.entry(self.identifier.clone()).or_insert(0);

        let owner_count = owner_counts.len();
        let partition_count = partitions.len();
        if owner_count == 0 || partition_count == 0 {
            return;
        }
        let (min_per_owner, max_per_owner) = compute_quota(partition_count, owner_count);
        let mine = *owner_counts.get(&self.identifier).unwrap_or(&0);

        if !is_claim_eligible(mine, min_per_owner, &owner_counts) {
            return;
        }

        let Some((partition_id, version)) = select_claim_target(
            partitions,
            all_ownership,
            &active_view,
            &owner_counts,
            max_per_owner,
            min_per_owner,
            mine,
            &mut self.rng,
        ) else {
            return;
        };

        let claim = PartitionOwnership {
            fully_qualified_namespace: self.namespace.clone(),
            event_hub_name: self.hub.clone(),
            consumer_group: self.group.clone(),
            partition_id: partition_id.clone(),
            owner_id: Some(self.identifier.clone()),
            last_modified: None,
            version,
        };

        let store = self.store.clone();
        let result = self
            .retry_op(Operation::ClaimOwnership, move || {
                let store = store.clone();
                let claim = claim.clone();
                async move { store.claim_ownership(vec![claim]).await }
            })
            .await;

        match result {
            Ok(mut claimed) => {
                if let Some(ownership) = claimed.pop() {
                    info!(partition = %partition_id, owner = %self.identifier, "claimed partition");
                    self.instance_ownership.insert(partition_id.clone(), ownership);
                    let position = self.lookup_checkpoint_position(&partition_id).await;
                    self.start_pump(partition_id, position).await;
                }
                // An empty result means the CAS lost the race; try again
                // next cycle (spec.md §4.4: "next cycle will re-evaluate").
            }
            Err(err) => {
                self.handlers.notify_error(None, Operation::ClaimOwnership, err).await;
            }
        }
    }

    async fn lookup_checkpoint_position(&self, partition: &PartitionId) -> Option<EventPosition> {
        let store = self.store.clone();
        let (ns, hub, group) = (self.namespace.clone(), self.hub.clone(), self.group.clone());
        let checkpoints = self
            .retry_op(Operation::ListCheckpoints, move || {
                let store = store.clone();
                let (ns, hub, group) = (ns.clone(), hub.clone(), group.clone());
                async move { store.list_checkpoints(&ns, &hub, &group).await }
            })
            .await
            .ok()?;
        checkpoints
            .into_iter()
            .find(|c| &c.partition_id == partition)
            .map(|c| EventPosition::FromSequence { sequence: c.sequence_number, inclusive: false })
    }

    async fn start_pump(&self, partition: PartitionId, existing_checkpoint: Option<EventPosition>) {
        let context = PartitionContext {
            fully_qualified_namespace: self.namespace.clone(),
            event_hub_name: self.hub.clone(),
            consumer_group: self.group.clone(),
            partition_id: partition.clone(),
        };
        let options = ConsumerOptions {
            prefetch: None,
            track_last_enqueued_event_properties: self.config.track_last_enqueued_event_properties,
        };
        let pump = PartitionPump::new(
            context,
            self.transport.clone(),
            self.store.clone(),
            self.handlers.clone(),
            existing_checkpoint,
            options,
            RetryPolicy::new(self.config.retry_options.clone()),
            DEFAULT_MAX_BATCH,
            self.config.max_wait_time,
        );
        let close_reason = pump.close_reason_handle();
        let child = self.cancel.child_token();
        let join = tokio::spawn(pump.run(child.clone()));
        info!(partition = %partition, "pump started");
        self.active_pumps
            .write()
            .await
            .insert(partition, PumpHandle { cancel: child, close_reason, join });
    }

    async fn stop_pump(&self, partition: &PartitionId, reason: CloseReason) {
        let handle = self.active_pumps.write().await.remove(partition);
        if let Some(handle) = handle {
            *handle.close_reason.lock().expect("close_reason mutex poisoned") = reason;
            handle.cancel.cancel();
            if let Err(err) = handle.join.await {
                warn!(partition = %partition, error = %err, "pump task panicked");
            }
            info!(partition = %partition, ?reason, "pump stopped");
        }
    }

    async fn stop_all_pumps(&self, reason: CloseReason) {
        let partitions: Vec<PartitionId> = self.active_pumps.read().await.keys().cloned().collect();
        let mut handles = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            if let Some(handle) = self.active_pumps.write().await.remove(partition) {
                *handle.close_reason.lock().expect("close_reason mutex poisoned") = reason;
                handle.cancel.cancel();
                handles.push(handle.join);
            }
        }
        for join in handles {
            let _ = join.await;
        }
    }
}

/// `(minPerOwner, maxPerOwner)` per spec.md §4.4 Phase F.
fn compute_quota(partition_count: usize, owner_count: usize) -> (usize, usize) {
    let min_per_owner = partition_count / owner_count;
    (min_per_owner, min_per_owner + 1)
}

/// Whether self is allowed to claim a partition this cycle.
fn is_claim_eligible(mine: usize, min_per_owner: usize, owner_counts: &HashMap<OwnerId, usize>) -> bool {
    mine < min_per_owner || (mine == min_per_owner && owner_counts.values().all(|&c| c >= min_per_owner))
}

/// Victim-selection order: unclaimed, then over-quota, then at-max (only
/// while still under quota ourselves).
fn select_claim_target(
    partitions: &[PartitionId],
    all_ownership: &[PartitionOwnership],
    active_view: &[PartitionOwnership],
    owner_counts: &HashMap<OwnerId, usize>,
    max_per_owner: usize,
    min_per_owner: usize,
    mine: usize,
    rng: &mut impl Rng,
) -> Option<(PartitionId, Option<VersionToken>)> {
    let active_ids: HashSet<&PartitionId> = active_view.iter().map(|o| &o.partition_id).collect();
    let unclaimed: Vec<&PartitionId> = partitions.iter().filter(|p| !active_ids.contains(p)).collect();
    if !unclaimed.is_empty() {
        let chosen = unclaimed[rng.gen_range(0..unclaimed.len())].clone();
        let version = all_ownership.iter().find(|o| o.partition_id == chosen).and_then(|o| o.version.clone());
        return Some((chosen, version));
    }

    let over_quota_victims: Vec<&PartitionOwnership> = active_view
        .iter()
        .filter(|o| {
            o.owner_id.as_ref().is_some_and(|id| *owner_counts.get(id).unwrap_or(&0) > max_per_owner)
        })
        .collect();
    if !over_quota_victims.is_empty() {
        let victim = over_quota_victims[rng.gen_range(0..over_quota_victims.len())];
        return Some((victim.partition_id.clone(), victim.version.clone()));
    }

    if mine < min_per_owner {
        let at_max_victims: Vec<&PartitionOwnership> = active_view
            .iter()
            .filter(|o| {
                o.owner_id.as_ref().is_some_and(|id| *owner_counts.get(id).unwrap_or(&0) == max_per_owner)
            })
            .collect();
        if !at_max_victims.is_empty() {
            let victim = at_max_victims[rng.gen_range(0..at_max_victims.len())];
            return Some((victim.partition_id.clone(), victim.version.clone()));
        }
    }

    None
}
