//! Multi-instance load-balancing and pump-lifecycle scenarios (spec.md
//! §8's six boundary scenarios), driven against the in-memory reference
//! `Store`/`Transport` with short, real (unpaused) intervals — several
//! independently `tokio::spawn`ed tasks (one load-balancer per processor,
//! one pump per owned partition) interleave here, which is awkward to
//! drive deterministically under `tokio::time::pause`; generous wall-clock
//! sleeps at millisecond-scale intervals make these reliable without that
//! complexity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use evhub_core::{
    Checkpoint, CheckpointStore, CloseReason, Error, Event, EventPosition, InMemoryStore, InMemoryTransport,
    Operation, PartitionId, Processor, ProcessorConfig,
};

const NAMESPACE: &str = "ns.example.com";
const HUB: &str = "orders";
const GROUP: &str = "$Default";

fn fast_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_load_balance_update(Duration::from_millis(20))
        .with_ownership_expiration(Duration::from_millis(50))
}

fn partitions(n: usize) -> Vec<PartitionId> {
    (0..n).map(|i| i.to_string()).collect()
}

async fn publish_n(transport: &InMemoryTransport, partition: &PartitionId, n: usize) {
    for i in 0..n {
        transport.publish(partition, Event::new(vec![i as u8], 0, 0)).await;
    }
}

async fn ownership_counts(store: &InMemoryStore) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for ownership in store.list_ownership(NAMESPACE, HUB, GROUP).await.unwrap() {
        if let Some(owner) = ownership.owner_id {
            *counts.entry(owner.0).or_insert(0) += 1;
        }
    }
    counts
}

/// Scenario 1: solo processor, 4 partitions — every partition ends up in
/// `InstanceOwnership` and every partition's pump delivers its event.
#[tokio::test]
async fn solo_processor_claims_every_partition() {
    let transport = Arc::new(InMemoryTransport::new(partitions(4)));
    let store = Arc::new(InMemoryStore::new());
    for p in partitions(4) {
        transport.publish(&p, Event::new(b"hello".to_vec(), 0, 0)).await;
    }

    let processor =
        Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone()).unwrap();

    let seen: Arc<StdMutex<HashSet<PartitionId>>> = Arc::new(StdMutex::new(HashSet::new()));
    let seen_captured = seen.clone();
    processor
        .on_event(move |ctx, _event, checkpoint| {
            let seen = seen_captured.clone();
            async move {
                checkpoint.commit().await?;
                seen.lock().unwrap().insert(ctx.partition_id);
                Ok(())
            }
        })
        .unwrap();
    processor.on_error(|_ctx, _op, _err| async {}).unwrap();

    processor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let owned = ownership_counts(&store).await;
    assert_eq!(owned.values().sum::<usize>(), 4);
    assert_eq!(seen.lock().unwrap().len(), 4);

    processor.stop().await.unwrap();
}

/// Scenario 2: two healthy processors converge to 2+2; killing one hands
/// all four to the survivor after `OwnershipExpiration + LoadBalanceUpdate`.
#[tokio::test]
async fn two_processors_balance_then_survivor_takes_over() {
    let transport = Arc::new(InMemoryTransport::new(partitions(4)));
    let store = Arc::new(InMemoryStore::new());

    let p1 =
        Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone()).unwrap();
    let p2 =
        Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone()).unwrap();
    for p in [&p1, &p2] {
        p.on_event(|_ctx, _event, _checkpoint| async { Ok(()) }).unwrap();
        p.on_error(|_ctx, _op, _err| async {}).unwrap();
    }

    p1.start().await.unwrap();
    p2.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let counts = ownership_counts(&store).await;
    let mut sizes: Vec<usize> = counts.values().copied().collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 2], "expected a balanced 2+2 split, got {counts:?}");

    p2.stop().await.unwrap();
    // Leases aren't surrendered on stop (spec.md §4.4); the survivor must
    // wait out the expiration window before reclaiming.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let counts = ownership_counts(&store).await;
    assert_eq!(counts.values().sum::<usize>(), 4);
    assert_eq!(counts.len(), 1, "only the survivor should hold active leases");

    p1.stop().await.unwrap();
}

/// Scenario 3: three processors, 4 partitions — steady state is one owner
/// of 2 and two owners of 1 (never any instance stuck at 0 once converged).
#[tokio::test]
async fn three_processors_four_partitions_splits_two_one_one() {
    let transport = Arc::new(InMemoryTransport::new(partitions(4)));
    let store = Arc::new(InMemoryStore::new());

    let processors: Vec<Processor> = (0..3)
        .map(|_| {
            let p = Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone())
                .unwrap();
            p.on_event(|_ctx, _event, _checkpoint| async { Ok(()) }).unwrap();
            p.on_error(|_ctx, _op, _err| async {}).unwrap();
            p
        })
        .collect();

    for p in &processors {
        p.start().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let counts = ownership_counts(&store).await;
    let mut sizes: Vec<usize> = counts.values().copied().collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 1, 2], "expected a 2/1/1 split, got {counts:?}");

    for p in &processors {
        p.stop().await.unwrap();
    }
}

/// Scenario 4: 13 partitions, 3 processors — steady state is {5, 4, 4},
/// requiring the `mine == minPerOwner` claim-eligible rule to fire so the
/// 13th (remainder) partition gets picked up.
#[tokio::test]
async fn thirteen_partitions_three_processors_splits_five_four_four() {
    let transport = Arc::new(InMemoryTransport::new(partitions(13)));
    let store = Arc::new(InMemoryStore::new());

    let processors: Vec<Processor> = (0..3)
        .map(|_| {
            let p = Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone())
                .unwrap();
            p.on_event(|_ctx, _event, _checkpoint| async { Ok(()) }).unwrap();
            p.on_error(|_ctx, _op, _err| async {}).unwrap();
            p
        })
        .collect();

    for p in &processors {
        p.start().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(900)).await;

    let counts = ownership_counts(&store).await;
    let mut sizes: Vec<usize> = counts.values().copied().collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![4, 4, 5], "expected a 5/4/4 split, got {counts:?}");

    for p in &processors {
        p.stop().await.unwrap();
    }
}

/// Scenario 5: a handler error on one partition terminates only that
/// partition's pump; `on_error` is notified; the load-balancer restarts it
/// next cycle; the other partition is never disturbed.
#[tokio::test]
async fn handler_error_is_isolated_to_its_partition() {
    let transport = Arc::new(InMemoryTransport::new(partitions(2)));
    let store = Arc::new(InMemoryStore::new());
    publish_n(&transport, &"0".to_string(), 5).await;
    publish_n(&transport, &"1".to_string(), 5).await;

    let processor =
        Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone()).unwrap();

    let seen: Arc<StdMutex<Vec<(PartitionId, i64)>>> = Arc::new(StdMutex::new(Vec::new()));
    let seen_captured = seen.clone();
    let failed_once = Arc::new(AtomicBool::new(false));
    let failed_once_captured = failed_once.clone();
    processor
        .on_event(move |ctx, event, checkpoint| {
            let seen = seen_captured.clone();
            let failed_once = failed_once_captured.clone();
            async move {
                if ctx.partition_id == "1" && event.sequence_number == 2 && !failed_once.swap(true, Ordering::SeqCst)
                {
                    return Err(Error::Logic("synthetic handler failure".into()));
                }
                checkpoint.commit().await?;
                seen.lock().unwrap().push((ctx.partition_id, event.sequence_number));
                Ok(())
            }
        })
        .unwrap();

    let errors: Arc<StdMutex<Vec<Operation>>> = Arc::new(StdMutex::new(Vec::new()));
    let errors_captured = errors.clone();
    processor
        .on_error(move |_ctx, operation, _err| {
            let errors = errors_captured.clone();
            async move {
                errors.lock().unwrap().push(operation);
            }
        })
        .unwrap();

    let closed_with_error: Arc<StdMutex<bool>> = Arc::new(StdMutex::new(false));
    let closed_with_error_captured = closed_with_error.clone();
    processor
        .on_partition_closing(move |ctx, reason| {
            let closed_with_error = closed_with_error_captured.clone();
            async move {
                if ctx.partition_id == "1" && reason == CloseReason::ProcessingError {
                    *closed_with_error.lock().unwrap() = true;
                }
            }
        })
        .unwrap();

    processor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    processor.stop().await.unwrap();

    assert!(*closed_with_error.lock().unwrap(), "partition 1's pump should have closed with ProcessingError once");
    assert!(errors.lock().unwrap().contains(&Operation::ReadEvents));

    let seen = seen.lock().unwrap();
    let partition_0: Vec<i64> =
        seen.iter().filter(|(p, _)| p == "0").map(|(_, seq)| *seq).collect();
    assert_eq!(partition_0, vec![0, 1, 2, 3, 4], "partition 0 must be undisturbed by partition 1's failure");

    let partition_1: Vec<i64> =
        seen.iter().filter(|(p, _)| p == "1").map(|(_, seq)| *seq).collect();
    assert_eq!(partition_1, vec![0, 1, 2, 3, 4], "partition 1 must recover and redeliver from its checkpoint");
}

/// Scenario 6: after a restart, a processor's `on_partition_initializing`
/// sees the default `Earliest` position, but the store's checkpoint wins —
/// the first delivered event has a sequence number past the checkpoint.
#[tokio::test]
async fn existing_checkpoint_wins_over_initializing_default() {
    let transport = Arc::new(InMemoryTransport::new(partitions(1)));
    let store = Arc::new(InMemoryStore::new());
    publish_n(&transport, &"0".to_string(), 5).await;
    store
        .update_checkpoint(Checkpoint {
            fully_qualified_namespace: NAMESPACE.into(),
            event_hub_name: HUB.into(),
            consumer_group: GROUP.into(),
            partition_id: "0".into(),
            offset: 2,
            sequence_number: 2,
        })
        .await
        .unwrap();

    let processor =
        Processor::new(NAMESPACE, HUB, GROUP, fast_config(), store.clone(), transport.clone()).unwrap();

    let default_seen: Arc<StdMutex<Vec<EventPosition>>> = Arc::new(StdMutex::new(Vec::new()));
    let default_seen_captured = default_seen.clone();
    processor
        .on_partition_initializing(move |_ctx, default_position| {
            let default_seen = default_seen_captured.clone();
            async move {
                default_seen.lock().unwrap().push(default_position);
                EventPosition::Latest
            }
        })
        .unwrap();

    let seen: Arc<StdMutex<Vec<i64>>> = Arc::new(StdMutex::new(Vec::new()));
    let seen_captured = seen.clone();
    processor
        .on_event(move |_ctx, event, checkpoint| {
            let seen = seen_captured.clone();
            async move {
                checkpoint.commit().await?;
                seen.lock().unwrap().push(event.sequence_number);
                Ok(())
            }
        })
        .unwrap();
    processor.on_error(|_ctx, _op, _err| async {}).unwrap();

    processor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    processor.stop().await.unwrap();

    assert_eq!(*default_seen.lock().unwrap(), vec![EventPosition::Earliest]);

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![3, 4], "checkpoint at seq=2 (exclusive) must override the handler's Latest default");
}
