//! Pick up partitions created after their collection was loaded

use super::utils::load_partitions;
use super::{Job, JobContext, JobKind};
use crate::common::{Result, ResultExt, UniqueId};
use crate::coordinator::types::SyncNewCreatedPartitionRequest;
use crate::meta::{LoadType, Partition};
use async_trait::async_trait;
use std::sync::Arc;

pub struct SyncNewCreatedPartitionJob {
    ctx: Arc<JobContext>,
    req: SyncNewCreatedPartitionRequest,
}

impl SyncNewCreatedPartitionJob {
    pub fn new(ctx: Arc<JobContext>, req: SyncNewCreatedPartitionRequest) -> Self {
        Self { ctx, req }
    }
}

#[async_trait]
impl Job for SyncNewCreatedPartitionJob {
    fn collection_id(&self) -> UniqueId {
        self.req.collection_id
    }

    fn kind(&self) -> JobKind {
        JobKind::SyncNewCreatedPartition
    }

    async fn execute(&self) -> Result<()> {
        let collection = self.req.collection_id;
        let partition = self.req.partition_id;

        // only loaded collections of LoadCollection type follow new partitions
        match self.ctx.meta.collections.get_load_type(collection) {
            Some(LoadType::LoadCollection) => {}
            _ => {
                tracing::info!(
                    collection_id = collection,
                    partition_id = partition,
                    "collection not loaded as a whole, skip syncing new partition"
                );
                return Ok(());
            }
        }
        if self.ctx.meta.collections.get_partition(partition).is_some() {
            return Ok(());
        }

        load_partitions(&self.ctx, collection, &[partition])
            .await
            .wrap_err("failed to load new created partition")?;

        let replica_number = self
            .ctx
            .meta
            .collections
            .get_collection(collection)
            .map(|c| c.replica_number)
            .unwrap_or(1);
        self.ctx
            .meta
            .collections
            .put_partitions(vec![Partition::new(collection, partition, replica_number).loaded()])?;
        tracing::info!(collection_id = collection, partition_id = partition, "new partition synced");
        Ok(())
    }
}
