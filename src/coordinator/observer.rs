//! Background observers and the checker trigger
//!
//! The target observer pulls next targets from the broker and promotes them
//! once leader views cover them. The collection observer turns leader views
//! into partition load percentages.

use crate::cluster::NodeManager;
use crate::common::{Result, UniqueId};
use crate::coordinator::broker::Broker;
use crate::meta::{
    CollectionTarget, DistributionManager, LeaderViewFilter, LoadStatus, Meta, TargetManager,
    TargetScope,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

#[async_trait]
pub trait TargetObserver: Send + Sync {
    /// Pull the latest target into the next scope. The receiver turns `true`
    /// once that target becomes current.
    async fn update_next_target(&self, collection: UniqueId) -> Result<watch::Receiver<bool>>;

    fn release_collection(&self, collection: UniqueId);
}

pub trait CheckerController: Send + Sync {
    /// Ask the checkers to run a reconciliation round soon.
    fn check(&self);
}

/// Checker trigger backed by a [`Notify`]; the checker loop awaits [`NotifyChecker::notified`].
#[derive(Default)]
pub struct NotifyChecker {
    notify: Notify,
}

impl NotifyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl CheckerController for NotifyChecker {
    fn check(&self) {
        self.notify.notify_one();
    }
}

pub struct BrokerTargetObserver {
    meta: Arc<Meta>,
    targets: Arc<TargetManager>,
    dist: Arc<DistributionManager>,
    broker: Arc<dyn Broker>,
    notifiers: Mutex<HashMap<UniqueId, Vec<watch::Sender<bool>>>>,
    version: AtomicI64,
}

impl BrokerTargetObserver {
    pub fn new(
        meta: Arc<Meta>,
        targets: Arc<TargetManager>,
        dist: Arc<DistributionManager>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            meta,
            targets,
            dist,
            broker,
            notifiers: Mutex::new(HashMap::new()),
            version: AtomicI64::new(1),
        }
    }

    async fn pull_next_target(&self, collection: UniqueId) -> Result<()> {
        let partitions = self.meta.collections.get_partition_ids(collection);
        let info = self.broker.get_recovery_info(collection, &partitions).await?;
        let version = self.version.fetch_add(1, Ordering::Relaxed);
        self.targets.update_next_target(
            collection,
            CollectionTarget::new(info.channels, info.segments, version),
        );
        Ok(())
    }

    /// Every replica needs, per channel, a leader on one of its nodes serving
    /// all sealed segments of that channel.
    fn ready_to_promote(&self, collection: UniqueId, next: &CollectionTarget) -> bool {
        let replicas = self.meta.replicas.get_by_collection(collection);
        if replicas.is_empty() {
            return false;
        }
        for channel in next.channels.keys() {
            let views = self.dist.get_leader_views(
                &LeaderViewFilter::default()
                    .collection(collection)
                    .channel(channel.as_str()),
            );
            let required: Vec<UniqueId> = next
                .segments
                .values()
                .filter(|s| &s.channel == channel)
                .map(|s| s.id)
                .collect();
            for replica in &replicas {
                let served = views.iter().any(|v| {
                    replica.contains(v.node_id)
                        && required.iter().all(|id| v.segments.contains_key(id))
                });
                if !served {
                    return false;
                }
            }
        }
        true
    }

    /// One observation round: retry missing pulls and promote ready targets.
    pub async fn tick(&self) {
        for collection in self.meta.collections.get_all_collections() {
            let id = collection.collection_id;
            let next = self.targets.get_target(id, TargetScope::Next);
            let Some(next) = next else {
                if self.targets.get_target(id, TargetScope::Current).is_none() {
                    if let Err(e) = self.pull_next_target(id).await {
                        tracing::warn!(collection_id = id, "failed to pull next target: {}", e);
                    }
                }
                continue;
            };

            if self.ready_to_promote(id, &next) && self.targets.promote(id) {
                for tx in self.notifiers.lock().remove(&id).unwrap_or_default() {
                    let _ = tx.send(true);
                }
            }
        }
    }
}

#[async_trait]
impl TargetObserver for BrokerTargetObserver {
    async fn update_next_target(&self, collection: UniqueId) -> Result<watch::Receiver<bool>> {
        self.pull_next_target(collection).await?;
        let (tx, rx) = watch::channel(false);
        self.notifiers.lock().entry(collection).or_default().push(tx);
        Ok(rx)
    }

    fn release_collection(&self, collection: UniqueId) {
        self.notifiers.lock().remove(&collection);
    }
}

/// Derives partition load percentages from leader views.
pub struct CollectionObserver {
    meta: Arc<Meta>,
    targets: Arc<TargetManager>,
    dist: Arc<DistributionManager>,
}

impl CollectionObserver {
    pub fn new(meta: Arc<Meta>, targets: Arc<TargetManager>, dist: Arc<DistributionManager>) -> Self {
        Self {
            meta,
            targets,
            dist,
        }
    }

    /// Update every partition of collections still loading.
    pub fn observe(&self) {
        for collection in self.meta.collections.get_all_collections() {
            if collection.status == LoadStatus::Loaded {
                continue;
            }
            let id = collection.collection_id;
            let target = self
                .targets
                .get_target(id, TargetScope::Next)
                .or_else(|| self.targets.get_target(id, TargetScope::Current));
            let Some(target) = target else {
                continue;
            };

            for partition in self.meta.collections.get_partitions_by_collection(id) {
                if partition.status == LoadStatus::Loaded {
                    continue;
                }
                let percentage = self.partition_progress(id, partition.partition_id, &target);
                match self
                    .meta
                    .collections
                    .update_load_percentage(partition.partition_id, percentage)
                {
                    Ok(current) => tracing::debug!(
                        collection_id = id,
                        partition_id = partition.partition_id,
                        "load progress {}%, collection {}%",
                        percentage,
                        current
                    ),
                    Err(e) => tracing::warn!(collection_id = id, "failed to update load percentage: {}", e),
                }
            }
        }
    }

    /// Share of (channel + segment) x replica slots covered by leader views.
    fn partition_progress(&self, collection: UniqueId, partition: UniqueId, target: &CollectionTarget) -> i32 {
        let replicas = self.meta.replicas.get_by_collection(collection);
        if replicas.is_empty() {
            return 0;
        }
        let segments: Vec<(UniqueId, &str)> = target
            .segments
            .values()
            .filter(|s| s.partition_id == partition)
            .map(|s| (s.id, s.channel.as_str()))
            .collect();

        let total = (target.channels.len() + segments.len()) * replicas.len();
        if total == 0 {
            return 100;
        }

        let views = self
            .dist
            .get_leader_views(&LeaderViewFilter::default().collection(collection));
        let mut loaded = 0;
        for replica in &replicas {
            let replica_views: Vec<_> = views.iter().filter(|v| replica.contains(v.node_id)).collect();
            let channels: HashSet<&str> = replica_views.iter().map(|v| v.channel.as_str()).collect();
            loaded += target
                .channels
                .keys()
                .filter(|c| channels.contains(c.as_str()))
                .count();
            loaded += segments
                .iter()
                .filter(|(id, channel)| {
                    replica_views
                        .iter()
                        .any(|v| v.channel == *channel && v.segments.contains_key(id))
                })
                .count();
        }
        (loaded * 100 / total) as i32
    }
}

/// Spawn the periodic observer loop. It stops when `shutdown` flips to true.
pub fn start_observer_tasks(
    target_observer: Arc<BrokerTargetObserver>,
    collection_observer: Arc<CollectionObserver>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    collection_observer.observe();
                    target_observer.tick().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("observers stopped");
    })
}

/// Spawn the checker loop: every trigger heals replica node sets.
pub fn start_checker_task(
    checker: Arc<NotifyChecker>,
    meta: Arc<Meta>,
    nodes: Arc<NodeManager>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = checker.notified() => meta.recover_all_collections(|node| nodes.is_usable(node)),
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::broker::{CollectionSchema, IndexInfo, RecoveryInfo};
    use crate::meta::{Collection, DmChannel, LeaderView, LoadType, Partition, SegmentDist, TargetSegment};

    struct StaticBroker;

    #[async_trait]
    impl Broker for StaticBroker {
        async fn describe_collection(&self, collection: UniqueId) -> Result<CollectionSchema> {
            Ok(CollectionSchema {
                collection_id: collection,
                name: "c".into(),
                fields: vec![],
            })
        }

        async fn get_partitions(&self, _collection: UniqueId) -> Result<Vec<UniqueId>> {
            Ok(vec![10])
        }

        async fn describe_index(&self, _collection: UniqueId) -> Result<Vec<IndexInfo>> {
            Ok(vec![])
        }

        async fn get_recovery_info(&self, collection: UniqueId, _partitions: &[UniqueId]) -> Result<RecoveryInfo> {
            Ok(RecoveryInfo {
                channels: vec![DmChannel {
                    collection_id: collection,
                    channel_name: "dml_0".into(),
                }],
                segments: vec![TargetSegment {
                    id: 1,
                    collection_id: collection,
                    partition_id: 10,
                    channel: "dml_0".into(),
                    num_rows: 10,
                }],
            })
        }
    }

    fn setup() -> (Arc<Meta>, Arc<TargetManager>, Arc<DistributionManager>) {
        let meta = Arc::new(Meta::new(Duration::from_secs(60), 16));
        meta.resources.handle_node_up(1);
        meta.spawn_replicas_with_rg(100, &[], 1, |_| true).unwrap();
        meta.collections.put_collection(
            Collection::new(100, 1, LoadType::LoadCollection, HashMap::new()),
            vec![Partition::new(100, 10, 1)],
        );
        (meta, Arc::new(TargetManager::new()), Arc::new(DistributionManager::new()))
    }

    fn serve(dist: &DistributionManager, segments: &[UniqueId]) {
        dist.update_leader_views(
            1,
            vec![LeaderView {
                node_id: 1,
                collection_id: 100,
                channel: "dml_0".into(),
                segments: segments
                    .iter()
                    .map(|id| (*id, SegmentDist { node_id: 1, version: 1 }))
                    .collect(),
                version: 1,
            }],
        );
    }

    #[tokio::test]
    async fn test_promote_fires_notifier() {
        let (meta, targets, dist) = setup();
        let observer = BrokerTargetObserver::new(meta, targets.clone(), dist.clone(), Arc::new(StaticBroker));

        let rx = observer.update_next_target(100).await.unwrap();
        observer.tick().await;
        assert!(!*rx.borrow());

        serve(&dist, &[1]);
        observer.tick().await;
        assert!(*rx.borrow());
        assert!(targets.get_target(100, TargetScope::Current).is_some());
    }

    #[tokio::test]
    async fn test_collection_progress() {
        let (meta, targets, dist) = setup();
        let observer = BrokerTargetObserver::new(meta.clone(), targets.clone(), dist.clone(), Arc::new(StaticBroker));
        observer.update_next_target(100).await.unwrap();
        let progress = CollectionObserver::new(meta.clone(), targets, dist.clone());

        serve(&dist, &[]);
        progress.observe();
        assert_eq!(meta.collections.calculate_load_percentage(100), 50);

        serve(&dist, &[1]);
        progress.observe();
        assert_eq!(meta.collections.calculate_load_status(100), LoadStatus::Loaded);
    }
}
