//! Node fan-out shared by jobs

use super::JobContext;
use crate::cluster::{LoadPartitionsRequest, ReleasePartitionsRequest};
use crate::common::{format_duration, Error, Result, ResultExt, UniqueId};
use crate::meta::DEFAULT_RESOURCE_GROUP_NAME;

/// Ask every replica node of the collection to load the partitions.
///
/// Stops at the first failure; nodes already told to load keep loading.
pub async fn load_partitions(ctx: &JobContext, collection: UniqueId, partitions: &[UniqueId]) -> Result<()> {
    for replica in ctx.meta.replicas.get_by_collection(collection) {
        for node in replica.node_ids() {
            let req = LoadPartitionsRequest {
                collection_id: collection,
                replica_id: replica.id,
                partition_ids: partitions.to_vec(),
            };
            ctx.cluster
                .load_partitions(node, req)
                .await
                .and_then(|status| status.into_result())
                .wrap_err(format!("failed to load partitions on node {}", node))?;
        }
    }
    Ok(())
}

/// Ask every replica node of the collection to release the partitions.
/// Failures are logged; reconciliation cleans up stragglers.
pub async fn release_partitions(ctx: &JobContext, collection: UniqueId, partitions: &[UniqueId]) {
    for replica in ctx.meta.replicas.get_by_collection(collection) {
        for node in replica.node_ids() {
            let req = ReleasePartitionsRequest {
                collection_id: collection,
                partition_ids: partitions.to_vec(),
            };
            let result = ctx
                .cluster
                .release_partitions(node, req)
                .await
                .and_then(|status| status.into_result());
            if let Err(e) = result {
                tracing::warn!(
                    collection_id = collection,
                    node_id = node,
                    "failed to release partitions: {}",
                    e
                );
            }
        }
    }
}

/// Drop every record of the collection and wait for the fleet to let go of it.
pub async fn release_collection(ctx: &JobContext, collection: UniqueId) -> Result<()> {
    ctx.meta.collections.remove_collection(collection);
    ctx.meta.replicas.remove_collection(collection);
    ctx.target_observer.release_collection(collection);
    ctx.targets.remove_collection(collection);
    wait_released(ctx, || ctx.dist.has_collection(collection))
        .await
        .wrap_err(format!("failed to release collection {}", collection))?;
    tracing::info!(collection_id = collection, "collection released");
    Ok(())
}

/// Poll until `still_served` is false, nudging the checkers on every round.
///
/// Fails once `release_timeout` elapses; the records are already gone, so
/// the checkers keep cleaning up after the job returns.
pub async fn wait_released(ctx: &JobContext, still_served: impl Fn() -> bool) -> Result<()> {
    let poll = async {
        while still_served() {
            ctx.checker.check();
            tokio::time::sleep(ctx.release_poll_interval).await;
        }
    };
    tokio::time::timeout(ctx.release_timeout, poll)
        .await
        .map_err(|_| {
            Error::Internal(format!(
                "segments still served after {}",
                format_duration(ctx.release_timeout)
            ))
        })
}

/// Resource groups an existing collection's replicas live in, in the same
/// shape a load request names them.
pub fn used_resource_groups(ctx: &JobContext, collection: UniqueId) -> Vec<String> {
    ctx.meta
        .replicas
        .resource_groups_of(collection)
        .into_iter()
        .collect()
}

/// A request with no groups means the default group.
pub fn normalize_resource_groups(groups: &[String]) -> Vec<String> {
    if groups.is_empty() {
        vec![DEFAULT_RESOURCE_GROUP_NAME.to_string()]
    } else {
        groups.to_vec()
    }
}

pub fn ensure_partitions_named(partitions: &[UniqueId]) -> Result<()> {
    if partitions.is_empty() {
        return Err(Error::parameter_invalid(
            "any partition",
            "empty partition list",
            "",
        ));
    }
    Ok(())
}
