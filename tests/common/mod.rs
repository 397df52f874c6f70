//! Shared fixtures: in-process broker, query node fleet and balancer doubles
//! wired into a real [`QueryCoord`].

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use querycoord::cluster::{
    Cluster, ComponentStates, LoadPartitionsRequest, LoadSegmentsRequest, ReleasePartitionsRequest,
    ReleaseSegmentsRequest, StateCode,
};
use querycoord::common::{CoordinatorConfig, Error, Result, Status, UniqueId};
use querycoord::coordinator::balance::{BalanceExecutor, BalancePlan};
use querycoord::coordinator::broker::{Broker, CollectionSchema, FieldSchema, IndexInfo, RecoveryInfo};
use querycoord::coordinator::observer::{BrokerTargetObserver, NotifyChecker};
use querycoord::coordinator::types::{HeartbeatRequest, LoadCollectionRequest, NodeUpRequest};
use querycoord::coordinator::{Collaborators, QueryCoord, Stores};
use querycoord::meta::{DmChannel, LeaderView, Segment, SegmentDist, TargetSegment};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL_0: &str = "by-dev-dml_0";
pub const CHANNEL_1: &str = "by-dev-dml_1";

/// Catalog double: partitions and recovery info per collection.
#[derive(Default)]
pub struct MockBroker {
    partitions: Mutex<HashMap<UniqueId, Vec<UniqueId>>>,
    recovery: Mutex<HashMap<UniqueId, RecoveryInfo>>,
}

impl MockBroker {
    pub fn set_partitions(&self, collection: UniqueId, partitions: Vec<UniqueId>) {
        self.partitions.lock().insert(collection, partitions);
    }

    pub fn has_recovery(&self, collection: UniqueId) -> bool {
        self.recovery.lock().contains_key(&collection)
    }

    /// One sealed segment per `(segment, partition, channel)` tuple.
    pub fn set_recovery(&self, collection: UniqueId, channels: &[&str], segments: &[(UniqueId, UniqueId, &str)]) {
        let info = RecoveryInfo {
            channels: channels
                .iter()
                .map(|name| DmChannel {
                    collection_id: collection,
                    channel_name: name.to_string(),
                })
                .collect(),
            segments: segments
                .iter()
                .map(|(id, partition, channel)| TargetSegment {
                    id: *id,
                    collection_id: collection,
                    partition_id: *partition,
                    channel: channel.to_string(),
                    num_rows: 100,
                })
                .collect(),
        };
        self.recovery.lock().insert(collection, info);
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn describe_collection(&self, collection: UniqueId) -> Result<CollectionSchema> {
        Ok(CollectionSchema {
            collection_id: collection,
            name: format!("collection_{}", collection),
            fields: vec![
                FieldSchema {
                    field_id: 100,
                    name: "pk".into(),
                    data_type: "Int64".into(),
                },
                FieldSchema {
                    field_id: 101,
                    name: "vector".into(),
                    data_type: "FloatVector".into(),
                },
            ],
        })
    }

    async fn get_partitions(&self, collection: UniqueId) -> Result<Vec<UniqueId>> {
        self.partitions
            .lock()
            .get(&collection)
            .cloned()
            .ok_or_else(|| Error::CollectionNotLoaded(collection, "unknown to catalog".into()))
    }

    async fn describe_index(&self, _collection: UniqueId) -> Result<Vec<IndexInfo>> {
        Ok(vec![IndexInfo {
            index_id: 1000,
            field_id: 101,
            index_name: "vector_index".into(),
        }])
    }

    async fn get_recovery_info(&self, collection: UniqueId, _partitions: &[UniqueId]) -> Result<RecoveryInfo> {
        Ok(self.recovery.lock().get(&collection).cloned().unwrap_or_default())
    }
}

/// Query node fleet double recording every call.
#[derive(Default)]
pub struct MockCluster {
    calls: Mutex<Vec<String>>,
    spans: Mutex<Vec<String>>,
    failing_loads: Mutex<HashSet<UniqueId>>,
    unreachable: Mutex<HashSet<UniqueId>>,
    states: Mutex<HashMap<UniqueId, StateCode>>,
    load_delay: Mutex<Option<Duration>>,
}

impl MockCluster {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn fail_load_on(&self, node: UniqueId) {
        self.failing_loads.lock().insert(node);
    }

    pub fn set_unreachable(&self, node: UniqueId) {
        self.unreachable.lock().insert(node);
    }

    pub fn set_state(&self, node: UniqueId, state: StateCode) {
        self.states.lock().insert(node, state);
    }

    /// Delay applied to every partition load and release.
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock() = Some(delay);
    }

    /// `begin:<op>` / `end:<op>` around every delayed partition call.
    pub fn spans(&self) -> Vec<String> {
        self.spans.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    async fn delayed(&self, op: &str) {
        self.spans.lock().push(format!("begin:{}", op));
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.spans.lock().push(format!("end:{}", op));
    }

    fn reachable(&self, node: UniqueId) -> Result<()> {
        if self.unreachable.lock().contains(&node) {
            return Err(Error::Transport(format!("node {} connection refused", node)));
        }
        Ok(())
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn load_partitions(&self, node: UniqueId, req: LoadPartitionsRequest) -> Result<Status> {
        self.reachable(node)?;
        self.delayed("load_partitions").await;
        self.record(format!("load_partitions:{}:{}", node, req.collection_id));
        if self.failing_loads.lock().contains(&node) {
            return Ok(Status::from(Error::Internal("out of memory".into())));
        }
        Ok(Status::success())
    }

    async fn release_partitions(&self, node: UniqueId, req: ReleasePartitionsRequest) -> Result<Status> {
        self.reachable(node)?;
        self.delayed("release_partitions").await;
        self.record(format!("release_partitions:{}:{}", node, req.collection_id));
        Ok(Status::success())
    }

    async fn load_segments(&self, node: UniqueId, req: LoadSegmentsRequest) -> Result<Status> {
        self.reachable(node)?;
        self.record(format!("load_segments:{}:{}", node, req.collection_id));
        Ok(Status::success())
    }

    async fn release_segments(&self, node: UniqueId, req: ReleaseSegmentsRequest) -> Result<Status> {
        self.reachable(node)?;
        self.record(format!("release_segments:{}:{}", node, req.collection_id));
        Ok(Status::success())
    }

    async fn get_component_states(&self, node: UniqueId) -> Result<ComponentStates> {
        self.reachable(node)?;
        let state = self
            .states
            .lock()
            .get(&node)
            .copied()
            .unwrap_or(StateCode::Healthy);
        Ok(ComponentStates {
            node_id: node,
            state,
            status: Status::success(),
        })
    }
}

/// Records plans instead of moving segments.
#[derive(Default)]
pub struct RecordingBalancer {
    plans: Mutex<Vec<BalancePlan>>,
}

impl RecordingBalancer {
    pub fn plans(&self) -> Vec<BalancePlan> {
        self.plans.lock().clone()
    }
}

#[async_trait]
impl BalanceExecutor for RecordingBalancer {
    async fn balance_segments(&self, plan: BalancePlan) -> Result<()> {
        self.plans.lock().push(plan);
        Ok(())
    }
}

pub struct Harness {
    pub coord: Arc<QueryCoord>,
    pub stores: Stores,
    pub broker: Arc<MockBroker>,
    pub cluster: Arc<MockCluster>,
    pub observer: Arc<BrokerTargetObserver>,
    pub balancer: Arc<RecordingBalancer>,
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        job_workers: 4,
        health_check_parallelism: 2,
        release_poll_interval: Duration::from_millis(5),
        observer_interval: Duration::from_millis(20),
        heartbeat_available_interval: Duration::from_secs(10),
        ..Default::default()
    }
}

impl Harness {
    /// A started coordinator with no query nodes.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        let stores = Stores::new(&config);
        let broker = Arc::new(MockBroker::default());
        let cluster = Arc::new(MockCluster::default());
        let balancer = Arc::new(RecordingBalancer::default());
        let observer = Arc::new(BrokerTargetObserver::new(
            stores.meta.clone(),
            stores.targets.clone(),
            stores.dist.clone(),
            broker.clone(),
        ));
        let coord = Arc::new(QueryCoord::new(
            config,
            stores.clone(),
            Collaborators {
                broker: broker.clone(),
                cluster: cluster.clone(),
                target_observer: observer.clone(),
                checker: Arc::new(NotifyChecker::new()),
                balancer: balancer.clone(),
            },
        ));
        coord.start();
        Self {
            coord,
            stores,
            broker,
            cluster,
            observer,
            balancer,
        }
    }

    pub fn with_nodes(nodes: &[UniqueId]) -> Self {
        let harness = Self::new();
        for node in nodes {
            harness.add_node(*node);
        }
        harness
    }

    pub fn add_node(&self, node: UniqueId) {
        let status = self.coord.handle_node_up(NodeUpRequest {
            node_id: node,
            address: format!("10.0.0.{}:21123", node),
            hostname: format!("querynode-{}", node),
        });
        assert!(status.is_success());
    }

    /// Load a collection of LoadCollection type and drive it to fully
    /// loaded with a current target.
    pub async fn load_collection(
        &self,
        collection: UniqueId,
        partitions: &[UniqueId],
        replica_number: u32,
        resource_groups: &[&str],
    ) {
        self.broker.set_partitions(collection, partitions.to_vec());
        if !self.broker.has_recovery(collection) {
            self.broker.set_recovery(collection, &[CHANNEL_0], &[]);
        }
        let status = self
            .coord
            .load_collection(LoadCollectionRequest {
                collection_id: collection,
                replica_number,
                resource_groups: resource_groups.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
            .await;
        assert!(status.is_success(), "load failed: {:?}", status);
        self.mark_loaded(collection);
    }

    pub fn mark_loaded(&self, collection: UniqueId) {
        for partition in self.stores.meta.collections.get_partition_ids(collection) {
            self.stores
                .meta
                .collections
                .update_load_percentage(partition, 100)
                .unwrap();
        }
        self.stores.targets.promote(collection);
    }

    /// Replace what `node` reports: its leader views and sealed segments.
    pub fn heartbeat(&self, node: UniqueId, leader_views: Vec<LeaderView>, segments: Vec<Segment>) {
        let status = self.coord.handle_heartbeat(HeartbeatRequest {
            node_id: node,
            segments,
            leader_views,
        });
        assert!(status.is_success(), "heartbeat failed: {:?}", status);
    }
}

pub fn leader_view(node: UniqueId, collection: UniqueId, channel: &str, segments: &[UniqueId], version: i64) -> LeaderView {
    LeaderView {
        node_id: node,
        collection_id: collection,
        channel: channel.to_string(),
        segments: segments
            .iter()
            .map(|id| (*id, SegmentDist { node_id: node, version: 1 }))
            .collect(),
        version,
    }
}

pub fn segment(id: UniqueId, collection: UniqueId, partition: UniqueId, node: UniqueId, channel: &str) -> Segment {
    Segment {
        id,
        collection_id: collection,
        partition_id: partition,
        node_id: node,
        channel: channel.to_string(),
        version: 1,
        num_rows: 100,
    }
}
