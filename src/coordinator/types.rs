//! Request and response messages of the coordinator API
//!
//! Every response carries a [`Status`]; payload fields are left empty when
//! the status is not a success.

use crate::common::{Status, UniqueId};
use crate::meta::{LeaderView, ResourceGroupConfig, Segment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// === Collections and partitions ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowCollectionsRequest {
    pub collection_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowCollectionsResponse {
    pub status: Status,
    pub collection_ids: Vec<UniqueId>,
    pub in_memory_percentages: Vec<i64>,
    pub query_service_available: Vec<bool>,
    pub refresh_progress: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowPartitionsRequest {
    pub collection_id: UniqueId,
    pub partition_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowPartitionsResponse {
    pub status: Status,
    pub partition_ids: Vec<UniqueId>,
    pub in_memory_percentages: Vec<i64>,
    pub refresh_progress: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadCollectionRequest {
    pub collection_id: UniqueId,
    /// 0 means 1
    pub replica_number: u32,
    pub resource_groups: Vec<String>,
    pub field_index_id: HashMap<i64, i64>,
    /// Only re-pull the target of an already loaded collection
    pub refresh: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseCollectionRequest {
    pub collection_id: UniqueId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPartitionsRequest {
    pub collection_id: UniqueId,
    pub partition_ids: Vec<UniqueId>,
    pub replica_number: u32,
    pub resource_groups: Vec<String>,
    pub field_index_id: HashMap<i64, i64>,
    pub refresh: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleasePartitionsRequest {
    pub collection_id: UniqueId,
    pub partition_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    NotPresent,
    PartialInMemory,
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStates {
    pub partition_id: UniqueId,
    pub state: PartitionState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetPartitionStatesRequest {
    pub collection_id: UniqueId,
    pub partition_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetPartitionStatesResponse {
    pub status: Status,
    pub partition_states: Vec<PartitionStates>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetSegmentInfoRequest {
    pub collection_id: UniqueId,
    pub segment_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment_id: UniqueId,
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub channel: String,
    pub num_rows: i64,
    pub node_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetSegmentInfoResponse {
    pub status: Status,
    pub infos: Vec<SegmentInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncNewCreatedPartitionRequest {
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
}

// === Balance ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalanceRequest {
    pub collection_id: UniqueId,
    pub source_node_ids: Vec<UniqueId>,
    pub dst_node_ids: Vec<UniqueId>,
    pub sealed_segment_ids: Vec<UniqueId>,
}

// === Introspection ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowConfigurationsRequest {
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowConfigurationsResponse {
    pub status: Status,
    pub configurations: Vec<KeyValuePair>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetMetricsRequest {
    /// JSON such as `{"metric_type": "system_info"}`
    pub request: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetMetricsResponse {
    pub status: Status,
    pub component_name: String,
    pub response: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetReplicasRequest {
    pub collection_id: UniqueId,
    pub with_shard_nodes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReplica {
    pub leader_id: UniqueId,
    pub leader_addr: String,
    pub dm_channel_name: String,
    pub node_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub replica_id: UniqueId,
    pub collection_id: UniqueId,
    pub node_ids: Vec<UniqueId>,
    pub resource_group_name: String,
    pub num_outbound_node: HashMap<String, usize>,
    pub shard_replicas: Vec<ShardReplica>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetReplicasResponse {
    pub status: Status,
    pub replicas: Vec<ReplicaInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetShardLeadersRequest {
    pub collection_id: UniqueId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLeadersList {
    pub channel_name: String,
    pub node_ids: Vec<UniqueId>,
    pub node_addrs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetShardLeadersResponse {
    pub status: Status,
    pub shards: Vec<ShardLeadersList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckHealthResponse {
    pub status: Status,
    pub is_healthy: bool,
    pub reasons: Vec<String>,
}

// === Resource groups ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateResourceGroupRequest {
    pub resource_group: String,
    pub config: Option<ResourceGroupConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateResourceGroupsRequest {
    pub resource_groups: HashMap<String, ResourceGroupConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DropResourceGroupRequest {
    pub resource_group: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferNodeRequest {
    pub source_resource_group: String,
    pub target_resource_group: String,
    pub num_node: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferReplicaRequest {
    pub source_resource_group: String,
    pub target_resource_group: String,
    pub collection_id: UniqueId,
    pub num_replica: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListResourceGroupsResponse {
    pub status: Status,
    pub resource_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeResourceGroupRequest {
    pub resource_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: UniqueId,
    pub address: String,
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupInfo {
    pub name: String,
    pub capacity: u32,
    pub num_available_node: usize,
    /// collection -> replicas in this group
    pub num_loaded_replica: HashMap<UniqueId, usize>,
    /// collection -> replica nodes no longer members of this group
    pub num_outgoing_node: HashMap<UniqueId, usize>,
    /// collection -> members of this group serving replicas elsewhere
    pub num_incoming_node: HashMap<UniqueId, usize>,
    pub config: ResourceGroupConfig,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeResourceGroupResponse {
    pub status: Status,
    pub resource_group: Option<ResourceGroupInfo>,
}

// === Fleet ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUpRequest {
    pub node_id: UniqueId,
    pub address: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRequest {
    pub node_id: UniqueId,
}

/// Full state report of a query node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatRequest {
    pub node_id: UniqueId,
    pub segments: Vec<Segment>,
    pub leader_views: Vec<LeaderView>,
}
