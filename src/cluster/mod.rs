//! Query node fleet: registry and per-node RPC dispatch
//!
//! `Err` from a [`Cluster`] call is a transport fault; `Ok(Status)` is the
//! node's own verdict.

pub mod client;
pub mod node;

pub use client::HttpCluster;
pub use node::{NodeInfo, NodeManager};

use crate::common::{Result, Status, UniqueId};
use crate::meta::TargetSegment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCode {
    Initializing,
    Healthy,
    Abnormal,
    StandBy,
    Stopping,
}

impl std::fmt::Display for StateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateCode::Initializing => "Initializing",
            StateCode::Healthy => "Healthy",
            StateCode::Abnormal => "Abnormal",
            StateCode::StandBy => "StandBy",
            StateCode::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStates {
    pub node_id: UniqueId,
    pub state: StateCode,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadPartitionsRequest {
    pub collection_id: UniqueId,
    pub replica_id: UniqueId,
    pub partition_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePartitionsRequest {
    pub collection_id: UniqueId,
    pub partition_ids: Vec<UniqueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSegmentsRequest {
    pub collection_id: UniqueId,
    pub replica_id: UniqueId,
    pub channel: String,
    pub segments: Vec<TargetSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSegmentsRequest {
    pub collection_id: UniqueId,
    pub channel: String,
    pub segment_ids: Vec<UniqueId>,
}

#[async_trait]
pub trait Cluster: Send + Sync {
    async fn load_partitions(&self, node: UniqueId, req: LoadPartitionsRequest) -> Result<Status>;

    async fn release_partitions(&self, node: UniqueId, req: ReleasePartitionsRequest) -> Result<Status>;

    async fn load_segments(&self, node: UniqueId, req: LoadSegmentsRequest) -> Result<Status>;

    async fn release_segments(&self, node: UniqueId, req: ReleaseSegmentsRequest) -> Result<Status>;

    async fn get_component_states(&self, node: UniqueId) -> Result<ComponentStates>;
}
