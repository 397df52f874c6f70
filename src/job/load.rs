//! Load jobs

use super::utils::{ensure_partitions_named, load_partitions, normalize_resource_groups, used_resource_groups};
use super::{Job, JobContext, JobKind};
use crate::common::{Error, Result, ResultExt, UniqueId};
use crate::coordinator::types::{LoadCollectionRequest, LoadPartitionsRequest};
use crate::meta::{Collection, LoadType, Partition};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Checks shared by both load jobs against an already loaded collection.
fn check_existing(
    ctx: &JobContext,
    collection: UniqueId,
    replica_number: u32,
    field_index_id: &HashMap<i64, i64>,
    resource_groups: &[String],
) -> Result<()> {
    let Some(existing) = ctx.meta.collections.get_collection(collection) else {
        return Ok(());
    };

    if existing.replica_number != replica_number {
        return Err(Error::parameter_invalid(
            existing.replica_number,
            replica_number,
            "can't change the replica number for loaded collection",
        ));
    }
    if !field_index_id.is_empty() && &existing.field_index_id != field_index_id {
        return Err(Error::parameter_invalid(
            format!("{:?}", existing.field_index_id),
            format!("{:?}", field_index_id),
            "can't change the index for loaded collection",
        ));
    }

    let used: BTreeSet<String> = used_resource_groups(ctx, collection).into_iter().collect();
    let requested: BTreeSet<String> = resource_groups.iter().cloned().collect();
    if !used.is_empty() && used != requested {
        return Err(Error::parameter_invalid(
            format!("{:?}", used),
            format!("{:?}", requested),
            "can't change the resource groups for loaded collection",
        ));
    }
    Ok(())
}

/// Fill the field to index map from the broker when the request left it empty.
///
/// Requested fields must exist in the collection schema.
async fn resolve_field_index(
    ctx: &JobContext,
    collection: UniqueId,
    requested: &HashMap<i64, i64>,
) -> Result<HashMap<i64, i64>> {
    let schema = ctx
        .broker
        .describe_collection(collection)
        .await
        .wrap_err("failed to describe collection")?;
    if !requested.is_empty() {
        let known: BTreeSet<i64> = schema.fields.iter().map(|f| f.field_id).collect();
        let mut fields: Vec<i64> = requested.keys().copied().collect();
        fields.sort_unstable();
        if let Some(missing) = fields.iter().find(|f| !known.contains(f)) {
            return Err(Error::parameter_invalid(
                format!("field of collection {}", schema.name),
                missing,
                "field not found in collection schema",
            ));
        }
        return Ok(requested.clone());
    }
    let indexes = ctx
        .broker
        .describe_index(collection)
        .await
        .wrap_err("failed to describe index")?;
    Ok(indexes.into_iter().map(|i| (i.field_id, i.index_id)).collect())
}

/// Shared body of both load jobs once the partitions to load are known.
async fn load(
    ctx: &JobContext,
    collection: UniqueId,
    load_type: LoadType,
    replica_number: u32,
    resource_groups: &[String],
    field_index_id: &HashMap<i64, i64>,
    lacking: Vec<UniqueId>,
) -> Result<()> {
    if lacking.is_empty() {
        tracing::info!(collection_id = collection, "no partition to load, skip");
        return Ok(());
    }

    let field_index = if ctx.meta.collections.exist(collection) {
        None
    } else {
        Some(resolve_field_index(ctx, collection, field_index_id).await?)
    };

    if ctx.meta.replicas.get_by_collection(collection).is_empty() {
        ctx.meta
            .spawn_replicas_with_rg(collection, resource_groups, replica_number, |node| {
                ctx.is_node_usable(node)
            })
            .wrap_err("failed to spawn replica for collection")?;
    }

    load_partitions(ctx, collection, &lacking).await?;

    let partitions: Vec<Partition> = lacking
        .iter()
        .map(|p| Partition::new(collection, *p, replica_number))
        .collect();
    match field_index {
        Some(field_index) => ctx.meta.collections.put_collection(
            Collection::new(collection, replica_number, load_type, field_index),
            partitions,
        ),
        None => {
            if load_type == LoadType::LoadCollection {
                ctx.meta.collections.set_load_type(collection, load_type);
            }
            ctx.meta.collections.put_partitions(partitions)?;
        }
    }
    tracing::info!(
        collection_id = collection,
        partitions = ?lacking,
        "partitions put into meta"
    );

    if let Err(e) = ctx.target_observer.update_next_target(collection).await {
        tracing::warn!(
            collection_id = collection,
            "failed to update next target, the observer will retry: {}",
            e
        );
    }
    Ok(())
}

/// Record the failure; drop replicas spawned for a collection that never got a record.
fn on_load_failed(ctx: &JobContext, collection: UniqueId, err: &Error) {
    ctx.meta.failed_loads.put(collection, err);
    if !ctx.meta.collections.exist(collection) {
        let removed = ctx.meta.replicas.remove_collection(collection);
        if removed > 0 {
            tracing::info!(collection_id = collection, "removed {} replicas of failed load", removed);
        }
    }
}

pub struct LoadCollectionJob {
    ctx: Arc<JobContext>,
    req: LoadCollectionRequest,
}

impl LoadCollectionJob {
    pub fn new(ctx: Arc<JobContext>, mut req: LoadCollectionRequest) -> Self {
        if req.replica_number == 0 {
            req.replica_number = 1;
        }
        req.resource_groups = normalize_resource_groups(&req.resource_groups);
        Self { ctx, req }
    }
}

#[async_trait]
impl Job for LoadCollectionJob {
    fn collection_id(&self) -> UniqueId {
        self.req.collection_id
    }

    fn kind(&self) -> JobKind {
        JobKind::LoadCollection
    }

    fn pre_execute(&self) -> Result<()> {
        check_existing(
            &self.ctx,
            self.req.collection_id,
            self.req.replica_number,
            &self.req.field_index_id,
            &self.req.resource_groups,
        )
    }

    async fn execute(&self) -> Result<()> {
        let collection = self.req.collection_id;
        let partitions = self
            .ctx
            .broker
            .get_partitions(collection)
            .await
            .wrap_err("failed to get partitions from broker")?;
        let loaded: BTreeSet<UniqueId> = self.ctx.meta.collections.get_partition_ids(collection).into_iter().collect();
        let lacking: Vec<UniqueId> = partitions.into_iter().filter(|p| !loaded.contains(p)).collect();

        load(
            &self.ctx,
            collection,
            LoadType::LoadCollection,
            self.req.replica_number,
            &self.req.resource_groups,
            &self.req.field_index_id,
            lacking,
        )
        .await
    }

    fn post_execute(&self, result: &Result<()>) {
        if let Err(e) = result {
            on_load_failed(&self.ctx, self.req.collection_id, e);
        }
    }
}

pub struct LoadPartitionJob {
    ctx: Arc<JobContext>,
    req: LoadPartitionsRequest,
}

impl LoadPartitionJob {
    pub fn new(ctx: Arc<JobContext>, mut req: LoadPartitionsRequest) -> Self {
        if req.replica_number == 0 {
            req.replica_number = 1;
        }
        req.resource_groups = normalize_resource_groups(&req.resource_groups);
        Self { ctx, req }
    }
}

#[async_trait]
impl Job for LoadPartitionJob {
    fn collection_id(&self) -> UniqueId {
        self.req.collection_id
    }

    fn kind(&self) -> JobKind {
        JobKind::LoadPartitions
    }

    fn pre_execute(&self) -> Result<()> {
        ensure_partitions_named(&self.req.partition_ids)?;
        check_existing(
            &self.ctx,
            self.req.collection_id,
            self.req.replica_number,
            &self.req.field_index_id,
            &self.req.resource_groups,
        )
    }

    async fn execute(&self) -> Result<()> {
        let collection = self.req.collection_id;
        let loaded: BTreeSet<UniqueId> = self.ctx.meta.collections.get_partition_ids(collection).into_iter().collect();
        let lacking: Vec<UniqueId> = self
            .req
            .partition_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|p| !loaded.contains(p))
            .collect();

        load(
            &self.ctx,
            collection,
            LoadType::LoadPartition,
            self.req.replica_number,
            &self.req.resource_groups,
            &self.req.field_index_id,
            lacking,
        )
        .await
    }

    fn post_execute(&self, result: &Result<()>) {
        if let Err(e) = result {
            on_load_failed(&self.ctx, self.req.collection_id, e);
        }
    }
}
