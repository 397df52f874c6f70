//! Release jobs

use super::utils::{ensure_partitions_named, release_collection, release_partitions, wait_released};
use super::{Job, JobContext, JobKind};
use crate::common::{Result, ResultExt, UniqueId};
use crate::coordinator::types::{ReleaseCollectionRequest, ReleasePartitionsRequest};
use crate::meta::LoadType;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ReleaseCollectionJob {
    ctx: Arc<JobContext>,
    req: ReleaseCollectionRequest,
}

impl ReleaseCollectionJob {
    pub fn new(ctx: Arc<JobContext>, req: ReleaseCollectionRequest) -> Self {
        Self { ctx, req }
    }
}

#[async_trait]
impl Job for ReleaseCollectionJob {
    fn collection_id(&self) -> UniqueId {
        self.req.collection_id
    }

    fn kind(&self) -> JobKind {
        JobKind::ReleaseCollection
    }

    async fn execute(&self) -> Result<()> {
        let collection = self.req.collection_id;
        if !self.ctx.meta.collections.exist(collection) {
            tracing::info!(collection_id = collection, "collection not loaded, skip releasing");
            return Ok(());
        }

        let partitions = self.ctx.meta.collections.get_partition_ids(collection);
        release_partitions(&self.ctx, collection, &partitions).await;
        release_collection(&self.ctx, collection).await
    }

    fn post_execute(&self, result: &Result<()>) {
        if result.is_ok() {
            self.ctx.meta.failed_loads.remove(self.req.collection_id);
        }
    }
}

pub struct ReleasePartitionJob {
    ctx: Arc<JobContext>,
    req: ReleasePartitionsRequest,
}

impl ReleasePartitionJob {
    pub fn new(ctx: Arc<JobContext>, req: ReleasePartitionsRequest) -> Self {
        Self { ctx, req }
    }
}

#[async_trait]
impl Job for ReleasePartitionJob {
    fn collection_id(&self) -> UniqueId {
        self.req.collection_id
    }

    fn kind(&self) -> JobKind {
        JobKind::ReleasePartitions
    }

    fn pre_execute(&self) -> Result<()> {
        ensure_partitions_named(&self.req.partition_ids)
    }

    async fn execute(&self) -> Result<()> {
        let collection = self.req.collection_id;
        let Some(coll) = self.ctx.meta.collections.get_collection(collection) else {
            tracing::info!(collection_id = collection, "collection not loaded, skip releasing partitions");
            return Ok(());
        };

        let loaded = self.ctx.meta.collections.get_partition_ids(collection);
        let to_release: Vec<UniqueId> = loaded
            .iter()
            .copied()
            .filter(|p| self.req.partition_ids.contains(p))
            .collect();
        if to_release.is_empty() {
            tracing::info!(collection_id = collection, "partitions not loaded, skip releasing");
            return Ok(());
        }

        release_partitions(&self.ctx, collection, &to_release).await;

        if coll.load_type == LoadType::LoadPartition && to_release.len() == loaded.len() {
            return release_collection(&self.ctx, collection).await;
        }

        self.ctx.meta.collections.remove_partitions(collection, &to_release);
        self.ctx.targets.remove_partitions(collection, &to_release);
        let dist = &self.ctx.dist;
        wait_released(&self.ctx, || dist.has_partitions(collection, &to_release))
            .await
            .wrap_err(format!("failed to release partitions {:?}", to_release))?;
        tracing::info!(
            collection_id = collection,
            partitions = ?to_release,
            "partitions released"
        );
        Ok(())
    }

    fn post_execute(&self, result: &Result<()>) {
        if result.is_ok() && !self.ctx.meta.collections.exist(self.req.collection_id) {
            self.ctx.meta.failed_loads.remove(self.req.collection_id);
        }
    }
}
