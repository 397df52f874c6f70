//! Mutating jobs and their per-collection scheduler
//!
//! Every load, release and sync request becomes a [`Job`]. The
//! [`Scheduler`] runs at most one job per collection at a time, in
//! submission order.

pub mod load;
pub mod release;
pub mod scheduler;
pub mod sync;
pub mod utils;

pub use load::{LoadCollectionJob, LoadPartitionJob};
pub use release::{ReleaseCollectionJob, ReleasePartitionJob};
pub use scheduler::{JobHandle, Scheduler};
pub use sync::SyncNewCreatedPartitionJob;

use crate::cluster::{Cluster, NodeManager};
use crate::common::{Result, UniqueId};
use crate::coordinator::broker::Broker;
use crate::coordinator::observer::{CheckerController, TargetObserver};
use crate::meta::{DistributionManager, Meta, TargetManager};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    LoadCollection,
    LoadPartitions,
    ReleaseCollection,
    ReleasePartitions,
    SyncNewCreatedPartition,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::LoadCollection => "LoadCollection",
            JobKind::LoadPartitions => "LoadPartitions",
            JobKind::ReleaseCollection => "ReleaseCollection",
            JobKind::ReleasePartitions => "ReleasePartitions",
            JobKind::SyncNewCreatedPartition => "SyncNewCreatedPartition",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn collection_id(&self) -> UniqueId;

    fn kind(&self) -> JobKind;

    /// Validate the job. Must not mutate anything.
    fn pre_execute(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self) -> Result<()>;

    /// Runs after `execute` with its outcome.
    fn post_execute(&self, _result: &Result<()>) {}
}

/// Everything a job may read or call.
pub struct JobContext {
    pub meta: Arc<Meta>,
    pub targets: Arc<TargetManager>,
    pub dist: Arc<DistributionManager>,
    pub nodes: Arc<NodeManager>,
    pub broker: Arc<dyn Broker>,
    pub cluster: Arc<dyn Cluster>,
    pub target_observer: Arc<dyn TargetObserver>,
    pub checker: Arc<dyn CheckerController>,
    pub release_poll_interval: Duration,
    pub release_timeout: Duration,
}

impl JobContext {
    pub fn is_node_usable(&self, node: UniqueId) -> bool {
        self.nodes.is_usable(node)
    }
}
