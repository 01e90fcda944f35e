//! The per-instance ownership manager.

use crate::config::ProcessorConfig;
use crate::error::Result;
use crate::store::CheckpointStore;
use crate::stream::StreamClient;
use crate::types::{LoadBalancingStrategy, Ownership};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Decides which partitions this instance should claim each round.
///
/// The manager never holds locks across instances: it derives a claim set
/// from a (possibly stale) listing and submits it through the store's
/// conditional writes. Its owned set for a round is exactly what the store
/// returned, nothing more.
pub struct OwnershipManager {
    store: Arc<dyn CheckpointStore>,
    client: Arc<dyn StreamClient>,
    fully_qualified_namespace: String,
    eventhub_name: String,
    consumer_group: String,
    owner_id: String,
    ownership_timeout: Duration,
    strategy: LoadBalancingStrategy,
    /// Partition ids are fixed for the lifetime of a stream; fetched once.
    partition_ids: Option<Vec<String>>,
}

impl OwnershipManager {
    /// Create a manager for one processor instance.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        client: Arc<dyn StreamClient>,
        config: &ProcessorConfig,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            client,
            fully_qualified_namespace: config.fully_qualified_namespace.clone(),
            eventhub_name: config.eventhub_name.clone(),
            consumer_group: config.consumer_group.clone(),
            owner_id: owner_id.into(),
            ownership_timeout: config.ownership_timeout,
            strategy: config.strategy,
            partition_ids: None,
        }
    }

    /// This instance's owner id.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Run one balancing round: list current ownership, derive the claim
    /// set, and submit it. Returns the partitions the store actually
    /// granted, with refreshed leases.
    pub async fn claim_ownership(&mut self) -> Result<Vec<Ownership>> {
        let partition_ids = self.partition_ids().await?;
        let current = self
            .store
            .list_ownership(
                &self.fully_qualified_namespace,
                &self.eventhub_name,
                &self.consumer_group,
            )
            .await?;

        let to_claim = self.balance(&partition_ids, &current, SystemTime::now());
        if to_claim.is_empty() {
            return Ok(Vec::new());
        }

        let claimed = self.store.claim_ownership(to_claim).await?;
        debug!(
            owner_id = %self.owner_id,
            claimed = claimed.len(),
            total = partition_ids.len(),
            "Balancing round complete"
        );
        Ok(claimed)
    }

    /// Explicitly relinquish a partition by writing an empty owner id.
    ///
    /// No-op (not an error) when ownership already changed hands or the
    /// record is no longer active; a lost conditional write is equally fine.
    pub async fn release_ownership(&self, partition_id: &str) -> Result<()> {
        let current = self
            .store
            .list_ownership(
                &self.fully_qualified_namespace,
                &self.eventhub_name,
                &self.consumer_group,
            )
            .await?;

        let now = SystemTime::now();
        let Some(record) = current.into_iter().find(|record| {
            record.partition_id == partition_id
                && record.owner_id == self.owner_id
                && record.is_active(now, self.ownership_timeout)
        }) else {
            return Ok(());
        };

        let mut release = record;
        release.owner_id = String::new();
        let released = self.store.claim_ownership(vec![release]).await?;
        if !released.is_empty() {
            info!(owner_id = %self.owner_id, partition_id, "Released partition ownership");
        }
        Ok(())
    }

    async fn partition_ids(&mut self) -> Result<Vec<String>> {
        if let Some(ids) = &self.partition_ids {
            return Ok(ids.clone());
        }
        let ids = self.client.partition_ids().await?;
        self.partition_ids = Some(ids.clone());
        Ok(ids)
    }

    /// Derive this round's claim set from a listing snapshot.
    fn balance(
        &self,
        partition_ids: &[String],
        current: &[Ownership],
        now: SystemTime,
    ) -> Vec<Ownership> {
        let mut rng = rand::thread_rng();

        let by_partition: HashMap<&str, &Ownership> = current
            .iter()
            .map(|record| (record.partition_id.as_str(), record))
            .collect();

        // Partitions with no record or an inactive record, pre-stamped with
        // our owner id. An existing record keeps its etag (if-match); a
        // missing one claims with no etag (if-none-match).
        let mut claimable: Vec<Ownership> = Vec::new();
        let mut active_by_owner: HashMap<&str, Vec<&Ownership>> = HashMap::new();

        for partition_id in partition_ids {
            match by_partition.get(partition_id.as_str()) {
                Some(record) if record.is_active(now, self.ownership_timeout) => {
                    active_by_owner
                        .entry(record.owner_id.as_str())
                        .or_default()
                        .push(record);
                }
                Some(record) => {
                    let mut claim = (*record).clone();
                    claim.owner_id = self.owner_id.clone();
                    claimable.push(claim);
                }
                None => claimable.push(self.new_ownership(partition_id)),
            }
        }

        let mut to_claim: Vec<Ownership> = active_by_owner
            .remove(self.owner_id.as_str())
            .unwrap_or_default()
            .into_iter()
            .cloned()
            .collect();

        // Self counts as an owner whether or not it holds anything yet.
        let owners_count = active_by_owner.len() + 1;
        let total = partition_ids.len();
        let expected = total / owners_count;
        let max_allowed = total.div_ceil(owners_count);

        if to_claim.len() > max_allowed {
            // Stop renewing one partition and let its lease lapse for
            // someone else. Never shed more than one per round.
            let victim = rng.gen_range(0..to_claim.len());
            let dropped = to_claim.swap_remove(victim);
            debug!(
                owner_id = %self.owner_id,
                partition_id = %dropped.partition_id,
                owned = to_claim.len() + 1,
                max_allowed,
                "Above fair share, letting one lease lapse"
            );
        } else if to_claim.len() < expected {
            if claimable.is_empty() {
                // Steal a single partition from the most loaded owner.
                if let Some(stolen) = self.steal_one(&active_by_owner, &mut rng) {
                    debug!(
                        owner_id = %self.owner_id,
                        partition_id = %stolen.partition_id,
                        "Below fair share, stealing a partition"
                    );
                    to_claim.push(stolen);
                }
            } else {
                match self.strategy {
                    LoadBalancingStrategy::Greedy => to_claim.append(&mut claimable),
                    LoadBalancingStrategy::Balanced => {
                        let pick = rng.gen_range(0..claimable.len());
                        to_claim.push(claimable.swap_remove(pick));
                    }
                }
            }
        }
        // Otherwise the set is unchanged; resubmitting refreshes the lease.

        to_claim
    }

    fn steal_one(
        &self,
        active_by_owner: &HashMap<&str, Vec<&Ownership>>,
        rng: &mut impl Rng,
    ) -> Option<Ownership> {
        let victim_owner = active_by_owner
            .iter()
            .max_by_key(|(owner, records)| (records.len(), *owner))?;

        let records = victim_owner.1;
        let mut stolen = records[rng.gen_range(0..records.len())].clone();
        stolen.owner_id = self.owner_id.clone();
        Some(stolen)
    }

    fn new_ownership(&self, partition_id: &str) -> Ownership {
        Ownership {
            fully_qualified_namespace: self.fully_qualified_namespace.clone(),
            eventhub_name: self.eventhub_name.clone(),
            consumer_group: self.consumer_group.clone(),
            partition_id: partition_id.to_string(),
            owner_id: self.owner_id.clone(),
            last_modified_time: SystemTime::UNIX_EPOCH,
            etag: None,
        }
    }
}

impl std::fmt::Debug for OwnershipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipManager")
            .field("owner_id", &self.owner_id)
            .field("consumer_group", &self.consumer_group)
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCheckpointStore;
    use crate::stream::SimulatedStream;

    fn manager(
        store: Arc<InMemoryCheckpointStore>,
        stream: Arc<SimulatedStream>,
        owner_id: &str,
        strategy: LoadBalancingStrategy,
    ) -> OwnershipManager {
        let config = ProcessorConfig::new("ns", "hub")
            .with_ownership_timeout(Duration::from_secs(30))
            .with_strategy(strategy);
        OwnershipManager::new(store, stream, &config, owner_id)
    }

    fn active(partition_id: &str, owner_id: &str) -> Ownership {
        Ownership {
            fully_qualified_namespace: "ns".into(),
            eventhub_name: "hub".into(),
            consumer_group: "$default".into(),
            partition_id: partition_id.into(),
            owner_id: owner_id.into(),
            last_modified_time: SystemTime::now(),
            etag: Some("1".into()),
        }
    }

    fn expired(partition_id: &str, owner_id: &str) -> Ownership {
        let mut record = active(partition_id, owner_id);
        record.last_modified_time = SystemTime::now() - Duration::from_secs(120);
        record
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_lone_greedy_instance_claims_everything() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(4));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Greedy);

        // Zero other active owners: expected == total.
        let claims = mgr.balance(&ids(4), &[], SystemTime::now());
        assert_eq!(claims.len(), 4);
        assert!(claims.iter().all(|c| c.owner_id == "a" && c.etag.is_none()));
    }

    #[test]
    fn test_lone_balanced_instance_claims_one_per_round() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(4));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Balanced);

        let claims = mgr.balance(&ids(4), &[], SystemTime::now());
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn test_fair_share_is_left_unchanged_and_renewed() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(4));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Greedy);

        let current = vec![
            active("0", "a"),
            active("1", "a"),
            active("2", "b"),
            active("3", "b"),
        ];
        let claims = mgr.balance(&ids(4), &current, SystemTime::now());
        let mut owned: Vec<_> = claims.iter().map(|c| c.partition_id.as_str()).collect();
        owned.sort();
        assert_eq!(owned, vec!["0", "1"]);
    }

    #[test]
    fn test_over_max_allowed_sheds_exactly_one() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(4));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Greedy);

        // Two active owners, four partitions: max_allowed is 2, yet self
        // holds three.
        let current = vec![
            active("0", "a"),
            active("1", "a"),
            active("2", "a"),
            active("3", "b"),
        ];
        let claims = mgr.balance(&ids(4), &current, SystemTime::now());
        assert_eq!(claims.len(), 2);
        assert!(claims.iter().all(|c| c.owner_id == "a"));
    }

    #[test]
    fn test_steals_exactly_one_when_nothing_claimable() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(4));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Greedy);

        let current = vec![
            active("0", "b"),
            active("1", "b"),
            active("2", "b"),
            active("3", "c"),
        ];
        let claims = mgr.balance(&ids(4), &current, SystemTime::now());

        // Steals a single partition, from the most loaded owner.
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].owner_id, "a");
        assert!(["0", "1", "2"].contains(&claims[0].partition_id.as_str()));
        // The stolen record reuses the victim's etag.
        assert_eq!(claims[0].etag.as_deref(), Some("1"));
    }

    #[test]
    fn test_expired_and_released_records_are_claimable() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(3));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Greedy);

        let released = active("2", "");
        let current = vec![expired("0", "b"), active("1", "b"), released];

        let claims = mgr.balance(&ids(3), &current, SystemTime::now());
        let mut claimed: Vec<_> = claims.iter().map(|c| c.partition_id.as_str()).collect();
        claimed.sort();
        // "b" only actively owns partition 1; expected = 3 / 2 = 1, so the
        // greedy pass takes both claimable partitions.
        assert_eq!(claimed, vec!["0", "2"]);
    }

    #[test]
    fn test_no_action_when_expected_share_is_zero() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(2));
        let mgr = manager(store, stream, "a", LoadBalancingStrategy::Greedy);

        // Two other active owners over two partitions: expected = 2 / 3 = 0,
        // so this instance neither claims nor steals.
        let current = vec![active("0", "b"), active("1", "c")];
        let claims = mgr.balance(&ids(2), &current, SystemTime::now());
        assert!(claims.is_empty());
    }

    #[tokio::test]
    async fn test_claim_round_against_store() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(2));
        let mut mgr = manager(
            store.clone(),
            stream,
            "a",
            LoadBalancingStrategy::Greedy,
        );

        let claimed = mgr.claim_ownership().await.unwrap();
        assert_eq!(claimed.len(), 2);

        // Second round renews both with fresh etags.
        let renewed = mgr.claim_ownership().await.unwrap();
        assert_eq!(renewed.len(), 2);
        assert_ne!(claimed[0].etag, renewed[0].etag);
    }

    #[tokio::test]
    async fn test_two_instances_converge_to_disjoint_halves() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(2));
        let mut a = manager(store.clone(), stream.clone(), "a", LoadBalancingStrategy::Greedy);
        let mut b = manager(store.clone(), stream, "b", LoadBalancingStrategy::Greedy);

        let mut last_a = Vec::new();
        let mut last_b = Vec::new();
        for _ in 0..10 {
            last_a = a.claim_ownership().await.unwrap();
            last_b = b.claim_ownership().await.unwrap();
            if last_a.len() == 1 && last_b.len() == 1 {
                break;
            }
        }

        assert_eq!(last_a.len(), 1);
        assert_eq!(last_b.len(), 1);
        assert_ne!(last_a[0].partition_id, last_b[0].partition_id);
    }

    #[tokio::test]
    async fn test_release_ownership() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(1));
        let mut mgr = manager(store.clone(), stream, "a", LoadBalancingStrategy::Greedy);

        mgr.claim_ownership().await.unwrap();
        mgr.release_ownership("0").await.unwrap();

        let records = store.list_ownership("ns", "hub", "$default").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].owner_id.is_empty());
    }

    #[tokio::test]
    async fn test_release_is_noop_for_foreign_partition() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(SimulatedStream::new(1));

        let mut other = manager(store.clone(), stream.clone(), "b", LoadBalancingStrategy::Greedy);
        other.claim_ownership().await.unwrap();

        let mgr = manager(store.clone(), stream, "a", LoadBalancingStrategy::Greedy);
        mgr.release_ownership("0").await.unwrap();

        let records = store.list_ownership("ns", "hub", "$default").await.unwrap();
        assert_eq!(records[0].owner_id, "b");
    }
}
