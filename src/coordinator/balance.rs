//! Manual load balance: admission and execution
//!
//! Admission validates a request against placement state and packages a
//! [`BalancePlan`]. Moving the data is left to a [`BalanceExecutor`].

use crate::cluster::{Cluster, LoadSegmentsRequest, NodeManager, ReleaseSegmentsRequest};
use crate::common::{Error, Result, ResultExt, UniqueId};
use crate::coordinator::types::LoadBalanceRequest;
use crate::meta::{DistributionManager, Meta, Segment, SegmentFilter, TargetManager, TargetScope, TargetSegment};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancePlan {
    pub collection_id: UniqueId,
    pub replica_id: UniqueId,
    pub source_node: UniqueId,
    pub dst_nodes: Vec<UniqueId>,
    pub segments: Vec<Segment>,
}

#[async_trait]
pub trait BalanceExecutor: Send + Sync {
    async fn balance_segments(&self, plan: BalancePlan) -> Result<()>;
}

pub struct LoadBalanceAdmission<'a> {
    pub meta: &'a Meta,
    pub targets: &'a TargetManager,
    pub dist: &'a DistributionManager,
    pub nodes: &'a NodeManager,
}

impl LoadBalanceAdmission<'_> {
    pub fn admit(&self, req: &LoadBalanceRequest) -> Result<BalancePlan> {
        let collection = req.collection_id;
        let &[source] = req.source_node_ids.as_slice() else {
            return Err(Error::parameter_invalid(
                "only 1 source node",
                format!("{} source nodes", req.source_node_ids.len()),
                "",
            ));
        };

        if self.meta.collections.calculate_load_percentage(collection) < 100 {
            return Err(Error::CollectionNotFullyLoaded(collection));
        }

        let replica = self
            .meta
            .replicas
            .get_by_collection_and_node(collection, source)
            .ok_or_else(|| Error::NodeNotFound(source, "source node not found in any replica".into()))?;
        self.ensure_not_stopping(source)?;

        let dst_nodes: Vec<UniqueId> = if req.dst_node_ids.is_empty() {
            replica.nodes.iter().copied().filter(|n| *n != source).collect()
        } else {
            let requested: BTreeSet<UniqueId> = req.dst_node_ids.iter().copied().collect();
            for node in &requested {
                if !replica.contains(*node) {
                    return Err(Error::NodeNotFound(
                        *node,
                        "destination node not found in the same replica".into(),
                    ));
                }
            }
            requested.into_iter().collect()
        };
        for node in &dst_nodes {
            self.ensure_not_stopping(*node)?;
        }
        if dst_nodes.is_empty() {
            return Err(Error::parameter_invalid(
                "at least 1 destination node",
                0,
                "no other node in the replica of the source node",
            ));
        }

        let on_source = self
            .dist
            .get_segments(&SegmentFilter::default().collection(collection).node(source));
        let on_source_ids: BTreeSet<UniqueId> = on_source.iter().map(|s| s.id).collect();
        for id in &req.sealed_segment_ids {
            if !on_source_ids.contains(id) {
                return Err(Error::SegmentNotFound(*id, format!("segment not found in source node {}", source)));
            }
        }

        let wanted: BTreeSet<UniqueId> = req.sealed_segment_ids.iter().copied().collect();
        let segments: Vec<Segment> = on_source
            .into_iter()
            .filter(|s| wanted.is_empty() || wanted.contains(&s.id))
            .filter(|s| {
                let in_target = self
                    .targets
                    .get_sealed_segment(collection, s.id, TargetScope::Current)
                    .is_some();
                if !in_target {
                    tracing::info!(
                        collection_id = collection,
                        segment_id = s.id,
                        "segment not in current target, skip balancing it"
                    );
                }
                in_target
            })
            .collect();

        Ok(BalancePlan {
            collection_id: collection,
            replica_id: replica.id,
            source_node: source,
            dst_nodes,
            segments,
        })
    }

    fn ensure_not_stopping(&self, node: UniqueId) -> Result<()> {
        match self.nodes.get(node) {
            None => Err(Error::NodeNotFound(node, String::new())),
            Some(info) if info.stopping => Err(Error::NodeStopping(node)),
            Some(_) => Ok(()),
        }
    }
}

/// Moves each segment to the least loaded destination: load there, then
/// release from the source.
pub struct ClusterBalanceExecutor {
    cluster: Arc<dyn Cluster>,
    dist: Arc<DistributionManager>,
}

impl ClusterBalanceExecutor {
    pub fn new(cluster: Arc<dyn Cluster>, dist: Arc<DistributionManager>) -> Self {
        Self { cluster, dist }
    }
}

#[async_trait]
impl BalanceExecutor for ClusterBalanceExecutor {
    async fn balance_segments(&self, plan: BalancePlan) -> Result<()> {
        let mut load: HashMap<UniqueId, usize> = plan
            .dst_nodes
            .iter()
            .map(|n| (*n, self.dist.segment_count(*n)))
            .collect();

        for segment in &plan.segments {
            let Some(dst) = plan
                .dst_nodes
                .iter()
                .copied()
                .min_by_key(|n| (load.get(n).copied().unwrap_or(0), *n))
            else {
                break;
            };

            let req = LoadSegmentsRequest {
                collection_id: plan.collection_id,
                replica_id: plan.replica_id,
                channel: segment.channel.clone(),
                segments: vec![TargetSegment {
                    id: segment.id,
                    collection_id: segment.collection_id,
                    partition_id: segment.partition_id,
                    channel: segment.channel.clone(),
                    num_rows: segment.num_rows,
                }],
            };
            self.cluster
                .load_segments(dst, req)
                .await
                .and_then(|status| status.into_result())
                .wrap_err(format!("failed to load segment {} on node {}", segment.id, dst))?;
            *load.entry(dst).or_insert(0) += 1;

            let req = ReleaseSegmentsRequest {
                collection_id: plan.collection_id,
                channel: segment.channel.clone(),
                segment_ids: vec![segment.id],
            };
            self.cluster
                .release_segments(plan.source_node, req)
                .await
                .and_then(|status| status.into_result())
                .wrap_err(format!(
                    "failed to release segment {} from node {}",
                    segment.id, plan.source_node
                ))?;
            tracing::info!(
                collection_id = plan.collection_id,
                segment_id = segment.id,
                "segment moved from node {} to node {}",
                plan.source_node,
                dst
            );
        }
        Ok(())
    }
}
