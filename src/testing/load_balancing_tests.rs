//! Multi-instance balancing properties driven directly through
//! [`OwnershipManager`] rounds against one shared store, without the timing
//! of real processors.

#[cfg(test)]
mod tests {
    use crate::balancer::OwnershipManager;
    use crate::config::ProcessorConfig;
    use crate::store::{CheckpointStore, InMemoryCheckpointStore};
    use crate::stream::SimulatedStream;
    use crate::types::{LoadBalancingStrategy, Ownership};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn manager(
        store: &Arc<InMemoryCheckpointStore>,
        stream: &Arc<SimulatedStream>,
        owner_id: &str,
        strategy: LoadBalancingStrategy,
        ownership_timeout: Duration,
    ) -> OwnershipManager {
        let config = ProcessorConfig::new("ns", "hub")
            .with_strategy(strategy)
            .with_load_balancing_interval(ownership_timeout / 10)
            .with_ownership_timeout(ownership_timeout);
        OwnershipManager::new(store.clone(), stream.clone(), &config, owner_id)
    }

    fn partition_set(claims: &[Ownership]) -> HashSet<String> {
        claims
            .iter()
            .map(|ownership| ownership.partition_id.clone())
            .collect()
    }

    /// Drive rounds until every instance owns exactly `expected` partitions
    /// or the round budget runs out. Returns the final per-instance sets.
    async fn run_until_even(
        managers: &mut [OwnershipManager],
        expected: usize,
        max_rounds: usize,
    ) -> Vec<HashSet<String>> {
        let mut sets: Vec<HashSet<String>> = vec![HashSet::new(); managers.len()];
        for _ in 0..max_rounds {
            for (index, manager) in managers.iter_mut().enumerate() {
                sets[index] = partition_set(&manager.claim_ownership().await.unwrap());
            }
            if sets.iter().all(|set| set.len() == expected) {
                return sets;
            }
        }
        sets
    }

    #[tokio::test]
    async fn test_three_greedy_instances_converge_without_gaps_or_overlap() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(9));
        let timeout = Duration::from_secs(30);

        let mut managers = vec![
            manager(&store, &stream, "a", LoadBalancingStrategy::Greedy, timeout),
            manager(&store, &stream, "b", LoadBalancingStrategy::Greedy, timeout),
            manager(&store, &stream, "c", LoadBalancingStrategy::Greedy, timeout),
        ];

        let sets = run_until_even(&mut managers, 3, 50).await;

        // Union covers the full partition set exactly once each.
        let mut union = HashSet::new();
        for set in &sets {
            assert_eq!(set.len(), 3);
            for partition_id in set {
                assert!(union.insert(partition_id.clone()), "duplicate ownership");
            }
        }
        assert_eq!(union.len(), 9);
    }

    #[tokio::test]
    async fn test_balanced_instances_converge_one_step_at_a_time() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(4));
        let timeout = Duration::from_secs(30);

        let mut managers = vec![
            manager(&store, &stream, "a", LoadBalancingStrategy::Balanced, timeout),
            manager(&store, &stream, "b", LoadBalancingStrategy::Balanced, timeout),
        ];

        // Balanced adjusts at most one partition per round, so the first
        // round grants at most one partition per instance.
        let first_a = managers[0].claim_ownership().await.unwrap();
        assert!(first_a.len() <= 1);

        let sets = run_until_even(&mut managers, 2, 50).await;
        assert!(sets[0].is_disjoint(&sets[1]));
        assert_eq!(sets[0].len(), 2);
        assert_eq!(sets[1].len(), 2);
    }

    #[tokio::test]
    async fn test_claim_sets_are_disjoint_every_round() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(5));
        let timeout = Duration::from_secs(30);

        let mut a = manager(&store, &stream, "a", LoadBalancingStrategy::Greedy, timeout);
        let mut b = manager(&store, &stream, "b", LoadBalancingStrategy::Greedy, timeout);
        let mut c = manager(&store, &stream, "c", LoadBalancingStrategy::Greedy, timeout);

        for _ in 0..20 {
            let (ra, rb, rc) = tokio::join!(
                a.claim_ownership(),
                b.claim_ownership(),
                c.claim_ownership()
            );
            let sa = partition_set(&ra.unwrap());
            let sb = partition_set(&rb.unwrap());
            let sc = partition_set(&rc.unwrap());

            // The store arbitrates every record; even fully concurrent
            // rounds never grant a partition to two instances.
            assert!(sa.is_disjoint(&sb));
            assert!(sa.is_disjoint(&sc));
            assert!(sb.is_disjoint(&sc));
        }
    }

    #[tokio::test]
    async fn test_lone_instance_owns_everything_within_two_rounds() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(2));
        let mut mgr = manager(
            &store,
            &stream,
            "a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(30),
        );

        let mut owned = HashSet::new();
        for _ in 0..2 {
            owned = partition_set(&mgr.claim_ownership().await.unwrap());
            if owned.len() == 2 {
                break;
            }
        }
        assert_eq!(owned.len(), 2);
    }

    #[tokio::test]
    async fn test_takeover_after_lease_expiry() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(2));
        let timeout = Duration::from_millis(200);

        let mut a = manager(&store, &stream, "a", LoadBalancingStrategy::Greedy, timeout);
        assert_eq!(a.claim_ownership().await.unwrap().len(), 2);

        // "a" vanishes without releasing; its leases lapse.
        tokio::time::sleep(timeout + Duration::from_millis(50)).await;

        let mut b = manager(&store, &stream, "b", LoadBalancingStrategy::Greedy, timeout);
        let mut owned = HashSet::new();
        for _ in 0..2 {
            owned = partition_set(&b.claim_ownership().await.unwrap());
            if owned.len() == 2 {
                break;
            }
        }
        assert_eq!(owned.len(), 2);
    }

    #[tokio::test]
    async fn test_active_records_name_at_most_one_owner_per_partition() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(6));
        let timeout = Duration::from_secs(30);

        let mut managers = vec![
            manager(&store, &stream, "a", LoadBalancingStrategy::Greedy, timeout),
            manager(&store, &stream, "b", LoadBalancingStrategy::Greedy, timeout),
        ];
        run_until_even(&mut managers, 3, 50).await;

        let records = store.list_ownership("ns", "hub", "$default").await.unwrap();
        let now = SystemTime::now();
        let mut seen = HashSet::new();
        for record in records {
            if record.is_active(now, timeout) {
                assert!(seen.insert(record.partition_id.clone()));
            }
        }
        assert_eq!(seen.len(), 6);
    }
}
