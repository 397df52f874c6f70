//! Request handlers of the query coordinator
//!
//! Every handler first gates on the coordinator state, then either answers
//! from the in-memory stores or submits a job and waits for it. Failures are
//! wrapped with the stage that failed, logged, and returned as a [`Status`].

use crate::cluster::{Cluster, NodeInfo, NodeManager, StateCode};
use crate::common::{CoordinatorConfig, Error, Result, ResultExt, Status, UniqueId};
use crate::coordinator::balance::{BalanceExecutor, LoadBalanceAdmission};
use crate::coordinator::broker::Broker;
use crate::coordinator::health::check_node_health;
use crate::coordinator::leader::ShardLeaderResolver;
use crate::coordinator::observer::{CheckerController, TargetObserver};
use crate::coordinator::types::*;
use crate::job::{
    Job, JobContext, LoadCollectionJob, LoadPartitionJob, ReleaseCollectionJob,
    ReleasePartitionJob, Scheduler, SyncNewCreatedPartitionJob,
};
use crate::meta::{
    DistributionManager, LeaderViewFilter, LoadStatus, LoadType, Meta, Replica, SegmentFilter,
    TargetManager, TargetScope,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// In-memory state shared by handlers, jobs and observers.
#[derive(Clone)]
pub struct Stores {
    pub meta: Arc<Meta>,
    pub targets: Arc<TargetManager>,
    pub dist: Arc<DistributionManager>,
    pub nodes: Arc<NodeManager>,
}

impl Stores {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            meta: Arc::new(Meta::new(
                config.failed_load_cache_ttl,
                config.failed_load_cache_capacity,
            )),
            targets: Arc::new(TargetManager::new()),
            dist: Arc::new(DistributionManager::new()),
            nodes: Arc::new(NodeManager::new()),
        }
    }
}

/// External services the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub broker: Arc<dyn Broker>,
    pub cluster: Arc<dyn Cluster>,
    pub target_observer: Arc<dyn TargetObserver>,
    pub checker: Arc<dyn CheckerController>,
    pub balancer: Arc<dyn BalanceExecutor>,
}

pub struct QueryCoord {
    config: CoordinatorConfig,
    stores: Stores,
    collaborators: Collaborators,
    job_ctx: Arc<JobContext>,
    scheduler: Scheduler,
    state: RwLock<StateCode>,
    started_at: DateTime<Utc>,
}

impl QueryCoord {
    pub fn new(config: CoordinatorConfig, stores: Stores, collaborators: Collaborators) -> Self {
        let job_ctx = Arc::new(JobContext {
            meta: stores.meta.clone(),
            targets: stores.targets.clone(),
            dist: stores.dist.clone(),
            nodes: stores.nodes.clone(),
            broker: collaborators.broker.clone(),
            cluster: collaborators.cluster.clone(),
            target_observer: collaborators.target_observer.clone(),
            checker: collaborators.checker.clone(),
            release_poll_interval: config.release_poll_interval,
            release_timeout: config.release_timeout,
        });
        let scheduler = Scheduler::new(config.job_workers);
        Self {
            config,
            stores,
            collaborators,
            job_ctx,
            scheduler,
            state: RwLock::new(StateCode::Initializing),
            started_at: Utc::now(),
        }
    }

    /// Start the job scheduler and accept requests.
    pub fn start(&self) {
        self.scheduler.start();
        self.set_state(StateCode::Healthy);
        tracing::info!(node_id = self.config.node_id, "query coordinator is healthy");
    }

    pub fn stop(&self) {
        self.set_state(StateCode::Stopping);
        self.scheduler.stop();
        tracing::info!(node_id = self.config.node_id, "query coordinator stopped");
    }

    pub fn set_state(&self, state: StateCode) {
        *self.state.write() = state;
    }

    pub fn state(&self) -> StateCode {
        *self.state.read()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn check_healthy(&self) -> Result<()> {
        match self.state() {
            StateCode::Healthy => Ok(()),
            state => Err(Error::NotHealthy(state.to_string())),
        }
    }

    /// Give idle usable nodes to the replicas of their resource group.
    fn recover_replicas(&self) {
        let nodes = &self.stores.nodes;
        self.stores
            .meta
            .recover_all_collections(|node| nodes.is_usable(node));
    }

    async fn run_job(&self, job: Arc<dyn Job>) -> Result<()> {
        self.scheduler.add(job).wait().await
    }

    // === Collections and partitions ===

    pub fn show_collections(&self, req: ShowCollectionsRequest) -> ShowCollectionsResponse {
        tracing::debug!(collections = ?req.collection_ids, "show collections request received");
        self.try_show_collections(&req).unwrap_or_else(|e| ShowCollectionsResponse {
            status: failed("failed to show collections", e),
            ..Default::default()
        })
    }

    fn try_show_collections(&self, req: &ShowCollectionsRequest) -> Result<ShowCollectionsResponse> {
        self.check_healthy()?;
        let meta = &self.stores.meta;
        meta.failed_loads.try_expire();

        let list_all = req.collection_ids.is_empty();
        let ids: Vec<UniqueId> = if list_all {
            meta.collections
                .get_all_collections()
                .into_iter()
                .map(|c| c.collection_id)
                .collect()
        } else {
            req.collection_ids.clone()
        };

        let mut resp = ShowCollectionsResponse::default();
        for collection in ids {
            let percentage = meta.collections.calculate_load_percentage(collection);
            if percentage < 0 {
                if list_all {
                    // released while listing
                    continue;
                }
                return Err(meta
                    .failed_loads
                    .get(collection)
                    .unwrap_or_else(|| Error::CollectionNotLoaded(collection, String::new())));
            }
            resp.collection_ids.push(collection);
            resp.in_memory_percentages.push(percentage as i64);
            resp.query_service_available
                .push(self.query_service_available(collection));
            resp.refresh_progress
                .push(refresh_progress(meta.collections.is_refreshed(collection)));
        }
        Ok(resp)
    }

    /// Some replica has all its nodes registered and heartbeating.
    fn query_service_available(&self, collection: UniqueId) -> bool {
        let interval = self.config.heartbeat_available_interval;
        self.stores
            .meta
            .replicas
            .get_by_collection(collection)
            .iter()
            .any(|replica| {
                !replica.nodes.is_empty()
                    && replica.nodes.iter().all(|node| {
                        self.stores
                            .nodes
                            .get(*node)
                            .map(|info| info.is_reachable(interval))
                            .unwrap_or(false)
                    })
            })
    }

    pub fn show_partitions(&self, req: ShowPartitionsRequest) -> ShowPartitionsResponse {
        tracing::debug!(
            collection_id = req.collection_id,
            partitions = ?req.partition_ids,
            "show partitions request received"
        );
        self.try_show_partitions(&req).unwrap_or_else(|e| ShowPartitionsResponse {
            status: failed("failed to show partitions", e),
            ..Default::default()
        })
    }

    fn try_show_partitions(&self, req: &ShowPartitionsRequest) -> Result<ShowPartitionsResponse> {
        self.check_healthy()?;
        let meta = &self.stores.meta;
        let collection = req.collection_id;
        meta.failed_loads.try_expire();

        let Some(coll) = meta.collections.get_collection(collection) else {
            let not_loaded = match req.partition_ids.first() {
                Some(partition) => Error::PartitionNotLoaded(vec![*partition]),
                None => Error::CollectionNotLoaded(collection, String::new()),
            };
            return Err(meta.failed_loads.get(collection).unwrap_or(not_loaded));
        };

        let partitions = if req.partition_ids.is_empty() {
            meta.collections.get_partition_ids(collection)
        } else {
            req.partition_ids.clone()
        };
        let refreshed = refresh_progress(meta.collections.is_refreshed(collection));

        let mut resp = ShowPartitionsResponse::default();
        for partition in partitions {
            let percentage = match coll.load_type {
                LoadType::LoadCollection => {
                    let known = meta.collections.get_partition(partition).is_some();
                    if known && !coll.released_partitions.contains(&partition) {
                        meta.collections.calculate_load_percentage(collection)
                    } else {
                        -1
                    }
                }
                LoadType::LoadPartition => meta.collections.get_partition_load_percentage(partition),
            };
            if percentage < 0 {
                return Err(meta
                    .failed_loads
                    .get(collection)
                    .unwrap_or_else(|| Error::PartitionNotLoaded(vec![partition])));
            }
            resp.partition_ids.push(partition);
            resp.in_memory_percentages.push(percentage as i64);
            resp.refresh_progress.push(refreshed);
        }
        Ok(resp)
    }

    pub async fn load_collection(&self, req: LoadCollectionRequest) -> Status {
        let collection = req.collection_id;
        tracing::info!(
            collection_id = collection,
            replica_number = req.replica_number,
            resource_groups = ?req.resource_groups,
            refresh = req.refresh,
            "load collection request received"
        );
        let result = self.try_load_collection(req).await;
        match result {
            Ok(()) => {
                tracing::info!(collection_id = collection, "load collection done");
                Status::success()
            }
            Err(e) => failed("failed to load collection", e),
        }
    }

    async fn try_load_collection(&self, req: LoadCollectionRequest) -> Result<()> {
        self.check_healthy()?;
        if req.refresh {
            return self.refresh_collection(req.collection_id).await;
        }
        self.stores
            .meta
            .check_resource_groups(req.collection_id, &req.resource_groups)?;
        let job = LoadCollectionJob::new(self.job_ctx.clone(), req);
        self.run_job(Arc::new(job)).await
    }

    pub async fn release_collection(&self, req: ReleaseCollectionRequest) -> Status {
        let collection = req.collection_id;
        tracing::info!(collection_id = collection, "release collection request received");
        let result = async {
            self.check_healthy()?;
            let job = ReleaseCollectionJob::new(self.job_ctx.clone(), req);
            self.run_job(Arc::new(job)).await
        }
        .await;
        match result {
            Ok(()) => {
                tracing::info!(collection_id = collection, "release collection done");
                Status::success()
            }
            Err(e) => failed("failed to release collection", e),
        }
    }

    pub async fn load_partitions(&self, req: LoadPartitionsRequest) -> Status {
        let collection = req.collection_id;
        tracing::info!(
            collection_id = collection,
            partitions = ?req.partition_ids,
            replica_number = req.replica_number,
            resource_groups = ?req.resource_groups,
            refresh = req.refresh,
            "load partitions request received"
        );
        let result = async {
            self.check_healthy()?;
            if req.refresh {
                return self.refresh_collection(collection).await;
            }
            self.stores
                .meta
                .check_resource_groups(collection, &req.resource_groups)?;
            let job = LoadPartitionJob::new(self.job_ctx.clone(), req);
            self.run_job(Arc::new(job)).await
        }
        .await;
        match result {
            Ok(()) => {
                tracing::info!(collection_id = collection, "load partitions done");
                Status::success()
            }
            Err(e) => failed("failed to load partitions", e),
        }
    }

    pub async fn release_partitions(&self, req: ReleasePartitionsRequest) -> Status {
        let collection = req.collection_id;
        tracing::info!(
            collection_id = collection,
            partitions = ?req.partition_ids,
            "release partitions request received"
        );
        let result = async {
            self.check_healthy()?;
            let job = ReleasePartitionJob::new(self.job_ctx.clone(), req);
            self.run_job(Arc::new(job)).await
        }
        .await;
        match result {
            Ok(()) => {
                tracing::info!(collection_id = collection, "release partitions done");
                Status::success()
            }
            Err(e) => failed("failed to release partitions", e),
        }
    }

    /// Re-pull the target of a fully loaded collection; completion is
    /// reported through the refresh progress of show requests.
    async fn refresh_collection(&self, collection: UniqueId) -> Result<()> {
        let Some(coll) = self.stores.meta.collections.get_collection(collection) else {
            return Err(Error::CollectionNotLoaded(collection, String::new()));
        };
        if coll.status != LoadStatus::Loaded {
            return Err(Error::CollectionNotLoaded(
                collection,
                "collection not fully loaded".into(),
            ));
        }
        let notifier = self
            .collaborators
            .target_observer
            .update_next_target(collection)
            .await
            .wrap_err("failed to update next target")?;
        self.stores
            .meta
            .collections
            .set_refresh_notifier(collection, notifier);
        tracing::info!(collection_id = collection, "collection refresh triggered");
        Ok(())
    }

    pub fn get_partition_states(&self, req: GetPartitionStatesRequest) -> GetPartitionStatesResponse {
        tracing::debug!(
            collection_id = req.collection_id,
            partitions = ?req.partition_ids,
            "get partition states request received"
        );
        self.try_get_partition_states(&req)
            .unwrap_or_else(|e| GetPartitionStatesResponse {
                status: failed("failed to get partition states", e),
                ..Default::default()
            })
    }

    fn try_get_partition_states(&self, req: &GetPartitionStatesRequest) -> Result<GetPartitionStatesResponse> {
        self.check_healthy()?;
        let collections = &self.stores.meta.collections;
        let collection = req.collection_id;
        let not_loaded = || Error::PartitionNotLoaded(req.partition_ids.clone());

        let coll = collections.get_collection(collection).ok_or_else(not_loaded)?;
        let mut states = Vec::with_capacity(req.partition_ids.len());
        match coll.load_type {
            LoadType::LoadCollection => {
                if req
                    .partition_ids
                    .iter()
                    .any(|p| coll.released_partitions.contains(p))
                {
                    return Err(not_loaded());
                }
                let state = if collections.calculate_load_percentage(collection) >= 100 {
                    PartitionState::InMemory
                } else {
                    PartitionState::PartialInMemory
                };
                for partition in &req.partition_ids {
                    states.push(PartitionStates {
                        partition_id: *partition,
                        state,
                    });
                }
            }
            LoadType::LoadPartition => {
                for partition in &req.partition_ids {
                    let percentage = collections.get_partition_load_percentage(*partition);
                    if percentage < 0 {
                        return Err(Error::PartitionNotLoaded(vec![*partition]));
                    }
                    let state = if percentage >= 100 {
                        PartitionState::InMemory
                    } else {
                        PartitionState::PartialInMemory
                    };
                    states.push(PartitionStates {
                        partition_id: *partition,
                        state,
                    });
                }
            }
        }
        Ok(GetPartitionStatesResponse {
            status: Status::success(),
            partition_states: states,
        })
    }

    pub fn get_segment_info(&self, req: GetSegmentInfoRequest) -> GetSegmentInfoResponse {
        tracing::debug!(
            collection_id = req.collection_id,
            segments = ?req.segment_ids,
            "get segment info request received"
        );
        self.try_get_segment_info(&req).unwrap_or_else(|e| GetSegmentInfoResponse {
            status: failed("failed to get segment info", e),
            ..Default::default()
        })
    }

    fn try_get_segment_info(&self, req: &GetSegmentInfoRequest) -> Result<GetSegmentInfoResponse> {
        self.check_healthy()?;
        let segments = self
            .stores
            .dist
            .get_segments(&SegmentFilter::default().collection(req.collection_id));

        // one info per segment, with every node serving it
        let mut merged: BTreeMap<UniqueId, SegmentInfo> = BTreeMap::new();
        for segment in segments {
            let info = merged.entry(segment.id).or_insert_with(|| SegmentInfo {
                segment_id: segment.id,
                collection_id: segment.collection_id,
                partition_id: segment.partition_id,
                channel: segment.channel.clone(),
                num_rows: segment.num_rows,
                node_ids: Vec::new(),
            });
            info.node_ids.push(segment.node_id);
        }

        let infos = if req.segment_ids.is_empty() {
            merged.into_values().collect()
        } else {
            let mut infos = Vec::with_capacity(req.segment_ids.len());
            for id in &req.segment_ids {
                let info = merged.get(id).cloned().ok_or_else(|| {
                    Error::SegmentNotLoaded(*id).wrap(format!("segment {} not found in any node", id))
                })?;
                infos.push(info);
            }
            infos
        };
        Ok(GetSegmentInfoResponse {
            status: Status::success(),
            infos,
        })
    }

    pub async fn sync_new_created_partition(&self, req: SyncNewCreatedPartitionRequest) -> Status {
        let collection = req.collection_id;
        let partition = req.partition_id;
        tracing::info!(
            collection_id = collection,
            partition_id = partition,
            "sync new created partition request received"
        );
        let result = async {
            self.check_healthy()?;
            let job = SyncNewCreatedPartitionJob::new(self.job_ctx.clone(), req);
            self.run_job(Arc::new(job)).await
        }
        .await;
        match result {
            Ok(()) => Status::success(),
            Err(e) => failed("failed to sync new created partition", e),
        }
    }

    // === Balance ===

    pub async fn load_balance(&self, req: LoadBalanceRequest) -> Status {
        tracing::info!(
            collection_id = req.collection_id,
            source = ?req.source_node_ids,
            dst = ?req.dst_node_ids,
            segments = ?req.sealed_segment_ids,
            "load balance request received"
        );
        let result = async {
            self.check_healthy()?;
            let plan = LoadBalanceAdmission {
                meta: &self.stores.meta,
                targets: &self.stores.targets,
                dist: &self.stores.dist,
                nodes: &self.stores.nodes,
            }
            .admit(&req)?;
            tracing::info!(
                collection_id = plan.collection_id,
                replica_id = plan.replica_id,
                "balancing {} segments from node {} to nodes {:?}",
                plan.segments.len(),
                plan.source_node,
                plan.dst_nodes
            );
            self.collaborators.balancer.balance_segments(plan).await
        }
        .await;
        match result {
            Ok(()) => Status::success(),
            Err(e) => failed("failed to load balance", e),
        }
    }

    // === Introspection ===

    pub fn show_configurations(&self, req: ShowConfigurationsRequest) -> ShowConfigurationsResponse {
        if let Err(e) = self.check_healthy() {
            return ShowConfigurationsResponse {
                status: failed("failed to show configurations", e),
                ..Default::default()
            };
        }
        let pattern = req.pattern.to_lowercase();
        let configurations = self
            .config
            .to_key_values()
            .into_iter()
            .filter(|(key, _)| key.to_lowercase().contains(&pattern))
            .map(|(key, value)| KeyValuePair { key, value })
            .collect();
        ShowConfigurationsResponse {
            status: Status::success(),
            configurations,
        }
    }

    pub fn get_metrics(&self, req: GetMetricsRequest) -> GetMetricsResponse {
        let component_name = format!("querycoord-{}", self.config.node_id);
        match self.try_get_metrics(&req) {
            Ok(response) => GetMetricsResponse {
                status: Status::success(),
                component_name,
                response,
            },
            Err(e) => GetMetricsResponse {
                status: failed("failed to get metrics", e),
                component_name,
                response: String::new(),
            },
        }
    }

    fn try_get_metrics(&self, req: &GetMetricsRequest) -> Result<String> {
        let state = self.state();
        if !matches!(state, StateCode::Healthy | StateCode::StandBy) {
            return Err(Error::ServiceNotReady {
                role: "querycoord".into(),
                node_id: self.config.node_id,
                state: state.to_string(),
            });
        }

        let request: serde_json::Value = serde_json::from_str(&req.request).map_err(|e| {
            Error::parameter_invalid("json request", &req.request, e.to_string())
                .wrap("failed to parse metric type")
        })?;
        let metric_type = request
            .get("metric_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if metric_type != "system_info" {
            return Err(Error::parameter_invalid(
                "system_info",
                metric_type,
                "metric type not implemented",
            )
            .wrap("invalid metric type"));
        }

        let nodes: Vec<serde_json::Value> = self
            .stores
            .nodes
            .get_all()
            .into_iter()
            .map(|n| {
                serde_json::json!({
                    "node_id": n.id,
                    "address": n.addr,
                    "hostname": n.hostname,
                    "stopping": n.stopping,
                    "reachable": n.is_reachable(self.config.heartbeat_available_interval),
                    "segments": self.stores.dist.segment_count(n.id),
                })
            })
            .collect();
        let info = serde_json::json!({
            "component": "querycoord",
            "node_id": self.config.node_id,
            "state": state.to_string(),
            "version": crate::VERSION,
            "started_at": self.started_at.to_rfc3339(),
            "uptime_secs": (Utc::now() - self.started_at).num_seconds(),
            "collections": self.stores.meta.collections.get_all_collections().len(),
            "resource_groups": self.stores.meta.resources.list_resource_groups(),
            "busy_collections": self.scheduler.busy_collections(),
            "query_nodes": nodes,
        });
        serde_json::to_string(&info).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn get_replicas(&self, req: GetReplicasRequest) -> GetReplicasResponse {
        tracing::debug!(collection_id = req.collection_id, "get replicas request received");
        if let Err(e) = self.check_healthy() {
            return GetReplicasResponse {
                status: failed("failed to get replicas", e),
                ..Default::default()
            };
        }
        let replicas = self
            .stores
            .meta
            .replicas
            .get_by_collection(req.collection_id)
            .iter()
            .map(|replica| self.fill_replica_info(replica, req.with_shard_nodes))
            .collect();
        GetReplicasResponse {
            status: Status::success(),
            replicas,
        }
    }

    fn fill_replica_info(&self, replica: &Replica, with_shard_nodes: bool) -> ReplicaInfo {
        let collection = replica.collection_id;
        let channels = self
            .stores
            .targets
            .get_dm_channels_by_collection(collection, TargetScope::Current);

        let mut shard_replicas = Vec::with_capacity(channels.len());
        for channel in channels {
            let leader = self
                .stores
                .dist
                .get_leader_views(
                    &LeaderViewFilter::default()
                        .collection(collection)
                        .channel(channel.channel_name.as_str()),
                )
                .into_iter()
                .filter(|view| replica.contains(view.node_id))
                .max_by_key(|view| (view.version, -view.node_id));
            let Some(leader) = leader else {
                tracing::warn!(
                    replica_id = replica.id,
                    channel = %channel.channel_name,
                    "no leader of channel in replica"
                );
                continue;
            };
            let leader_addr = self
                .stores
                .nodes
                .get(leader.node_id)
                .map(|n| n.addr)
                .unwrap_or_default();

            let mut node_ids = BTreeSet::from([leader.node_id]);
            if with_shard_nodes {
                let segments = self.stores.dist.get_segments(
                    &SegmentFilter::default()
                        .collection(collection)
                        .channel(channel.channel_name.as_str()),
                );
                node_ids.extend(
                    segments
                        .iter()
                        .map(|s| s.node_id)
                        .filter(|node| replica.contains(*node)),
                );
            }
            shard_replicas.push(ShardReplica {
                leader_id: leader.node_id,
                leader_addr,
                dm_channel_name: channel.channel_name,
                node_ids: node_ids.into_iter().collect(),
            });
        }

        ReplicaInfo {
            replica_id: replica.id,
            collection_id: collection,
            node_ids: replica.node_ids(),
            resource_group_name: replica.resource_group.clone(),
            num_outbound_node: self.stores.meta.get_outgoing_node_num_by_replica(replica),
            shard_replicas,
        }
    }

    pub fn get_shard_leaders(&self, req: GetShardLeadersRequest) -> GetShardLeadersResponse {
        tracing::debug!(collection_id = req.collection_id, "get shard leaders request received");
        let result = self.check_healthy().and_then(|_| {
            ShardLeaderResolver {
                meta: &self.stores.meta,
                targets: &self.stores.targets,
                dist: &self.stores.dist,
                nodes: &self.stores.nodes,
                heartbeat_interval: self.config.heartbeat_available_interval,
            }
            .resolve(req.collection_id)
        });
        match result {
            Ok(shards) => GetShardLeadersResponse {
                status: Status::success(),
                shards,
            },
            Err(e) => GetShardLeadersResponse {
                status: failed("failed to get shard leaders", e),
                ..Default::default()
            },
        }
    }

    /// Probe every registered query node. An unreachable node is a hard
    /// error; unhealthy ones are listed in `reasons`.
    pub async fn check_health(&self) -> Result<CheckHealthResponse> {
        if let Err(e) = self.check_healthy() {
            return Ok(CheckHealthResponse {
                status: Status::from(&e),
                is_healthy: false,
                reasons: vec![e.to_string()],
            });
        }
        let nodes: Vec<UniqueId> = self.stores.nodes.get_all().iter().map(|n| n.id).collect();
        let reasons = check_node_health(
            self.collaborators.cluster.clone(),
            nodes,
            self.config.health_check_parallelism,
        )
        .await
        .wrap_err("failed to check health")?;
        if !reasons.is_empty() {
            tracing::warn!("unhealthy query nodes: {}", reasons.join("; "));
        }
        Ok(CheckHealthResponse {
            status: Status::success(),
            is_healthy: reasons.is_empty(),
            reasons,
        })
    }

    // === Resource groups ===

    pub fn create_resource_group(&self, req: CreateResourceGroupRequest) -> Status {
        tracing::info!(resource_group = %req.resource_group, "create resource group request received");
        let result = self.check_healthy().and_then(|_| {
            self.stores
                .meta
                .resources
                .add_resource_group(&req.resource_group, req.config.unwrap_or_default())
        });
        match result {
            Ok(()) => Status::success(),
            Err(e) => failed("failed to create resource group", e),
        }
    }

    pub fn update_resource_groups(&self, req: UpdateResourceGroupsRequest) -> Status {
        tracing::info!(
            resource_groups = ?req.resource_groups.keys().collect::<Vec<_>>(),
            "update resource groups request received"
        );
        let result = self.check_healthy().and_then(|_| {
            self.stores
                .meta
                .resources
                .update_resource_groups(&req.resource_groups)
        });
        match result {
            Ok(()) => {
                self.collaborators.checker.check();
                Status::success()
            }
            Err(e) => failed("failed to update resource groups", e),
        }
    }

    pub fn drop_resource_group(&self, req: DropResourceGroupRequest) -> Status {
        tracing::info!(resource_group = %req.resource_group, "drop resource group request received");
        let result = self.check_healthy().and_then(|_| {
            let name = req.resource_group.as_str();
            if !self.stores.meta.replicas.get_by_resource_group(name).is_empty() {
                return Err(Error::parameter_invalid(
                    "empty resource group",
                    name,
                    "resource group has loaded replicas",
                )
                .wrap(format!(
                    "some replicas still loaded in resource group[{}], release it first",
                    name
                )));
            }
            self.stores.meta.resources.remove_resource_group(name)
        });
        match result {
            Ok(()) => Status::success(),
            Err(e) => failed("failed to drop resource group", e),
        }
    }

    pub fn transfer_node(&self, req: TransferNodeRequest) -> Status {
        tracing::info!(
            source = %req.source_resource_group,
            target = %req.target_resource_group,
            num_node = req.num_node,
            "transfer node request received"
        );
        let dist = &self.stores.dist;
        let result = self.check_healthy().and_then(|_| {
            self.stores.meta.resources.transfer_node(
                &req.source_resource_group,
                &req.target_resource_group,
                req.num_node,
                |node| dist.segment_count(node),
            )
        });
        match result {
            Ok(moved) => {
                tracing::info!(nodes = ?moved, "nodes transferred");
                self.recover_replicas();
                self.collaborators.checker.check();
                Status::success()
            }
            Err(e) => failed("failed to transfer node", e),
        }
    }

    pub fn transfer_replica(&self, req: TransferReplicaRequest) -> Status {
        tracing::info!(
            source = %req.source_resource_group,
            target = %req.target_resource_group,
            collection_id = req.collection_id,
            num_replica = req.num_replica,
            "transfer replica request received"
        );
        let result = self.check_healthy().and_then(|_| {
            self.stores.meta.transfer_replica(
                req.collection_id,
                &req.source_resource_group,
                &req.target_resource_group,
                req.num_replica,
            )
        });
        match result {
            Ok(moved) => {
                tracing::info!(replicas = ?moved, "replicas transferred");
                self.collaborators.checker.check();
                Status::success()
            }
            Err(e) => failed("failed to transfer replica", e),
        }
    }

    pub fn list_resource_groups(&self) -> ListResourceGroupsResponse {
        match self.check_healthy() {
            Ok(()) => ListResourceGroupsResponse {
                status: Status::success(),
                resource_groups: self.stores.meta.resources.list_resource_groups(),
            },
            Err(e) => ListResourceGroupsResponse {
                status: failed("failed to list resource groups", e),
                ..Default::default()
            },
        }
    }

    pub fn describe_resource_group(&self, req: DescribeResourceGroupRequest) -> DescribeResourceGroupResponse {
        tracing::debug!(resource_group = %req.resource_group, "describe resource group request received");
        let result = self
            .check_healthy()
            .and_then(|_| self.resource_group_info(&req.resource_group));
        match result {
            Ok(info) => DescribeResourceGroupResponse {
                status: Status::success(),
                resource_group: Some(info),
            },
            Err(e) => DescribeResourceGroupResponse {
                status: failed("failed to describe resource group", e),
                ..Default::default()
            },
        }
    }

    fn resource_group_info(&self, name: &str) -> Result<ResourceGroupInfo> {
        let meta = &self.stores.meta;
        let rg = meta
            .resources
            .get_resource_group(name)
            .ok_or_else(|| Error::ResourceGroupNotFound(name.to_string()))?;

        let mut num_loaded_replica: HashMap<UniqueId, usize> = HashMap::new();
        let mut num_outgoing_node: HashMap<UniqueId, usize> = HashMap::new();
        for replica in meta.replicas.get_by_resource_group(name) {
            *num_loaded_replica.entry(replica.collection_id).or_insert(0) += 1;
            let outgoing = replica
                .nodes
                .iter()
                .filter(|node| !rg.contains_node(**node))
                .count();
            if outgoing > 0 {
                *num_outgoing_node.entry(replica.collection_id).or_insert(0) += outgoing;
            }
        }

        let mut num_incoming_node: HashMap<UniqueId, usize> = HashMap::new();
        for collection in meta.replicas.get_collections() {
            for replica in meta.replicas.get_by_collection(collection) {
                if replica.resource_group == name {
                    continue;
                }
                let incoming = replica
                    .nodes
                    .iter()
                    .filter(|node| rg.contains_node(**node))
                    .count();
                if incoming > 0 {
                    *num_incoming_node.entry(collection).or_insert(0) += incoming;
                }
            }
        }

        let nodes: Vec<NodeSummary> = rg
            .nodes()
            .into_iter()
            .filter_map(|id| self.stores.nodes.get(id))
            .filter(|info| !info.stopping)
            .map(|info| NodeSummary {
                node_id: info.id,
                address: info.addr,
                hostname: info.hostname,
            })
            .collect();

        Ok(ResourceGroupInfo {
            name: rg.name.clone(),
            capacity: rg.capacity(),
            num_available_node: nodes.len(),
            num_loaded_replica,
            num_outgoing_node,
            num_incoming_node,
            config: rg.config.clone(),
            nodes,
        })
    }

    // === Fleet ===

    /// A query node joined: register it, place it in a resource group and
    /// let replicas pick it up.
    pub fn handle_node_up(&self, req: NodeUpRequest) -> Status {
        let node = req.node_id;
        self.stores
            .nodes
            .add(NodeInfo::new(node, req.address, req.hostname));
        let rg = self.stores.meta.resources.handle_node_up(node);
        tracing::info!(node_id = node, resource_group = %rg, "query node up");
        self.recover_replicas();
        self.collaborators.checker.check();
        Status::success()
    }

    pub fn handle_node_down(&self, req: NodeRequest) -> Status {
        let node = req.node_id;
        if self.stores.nodes.remove(node).is_none() {
            return failed("failed to handle node down", Error::NodeNotFound(node, String::new()));
        }
        self.stores.dist.remove_node(node);
        self.stores.meta.handle_node_down(node);
        tracing::info!(node_id = node, "query node down");
        self.collaborators.checker.check();
        Status::success()
    }

    pub fn mark_node_stopping(&self, req: NodeRequest) -> Status {
        let node = req.node_id;
        if !self.stores.nodes.stopping(node) {
            return failed("failed to mark node stopping", Error::NodeNotFound(node, String::new()));
        }
        tracing::info!(node_id = node, "query node stopping");
        self.collaborators.checker.check();
        Status::success()
    }

    /// Replace the reported distribution of a node.
    pub fn handle_heartbeat(&self, req: HeartbeatRequest) -> Status {
        let node = req.node_id;
        if !self.stores.nodes.heartbeat(node) {
            return failed("failed to handle heartbeat", Error::NodeNotFound(node, String::new()));
        }
        self.stores.dist.update_segments(node, req.segments);
        self.stores.dist.update_leader_views(node, req.leader_views);
        Status::success()
    }
}

fn failed(stage: &str, err: Error) -> Status {
    let err = err.wrap(stage);
    tracing::warn!("{}", err);
    Status::from(&err)
}

fn refresh_progress(refreshed: bool) -> i64 {
    if refreshed {
        100
    } else {
        0
    }
}
