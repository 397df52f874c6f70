//! Placement metadata
//!
//! Each store guards itself with its own lock. Operations here span the
//! replica and resource group stores without a shared lock, so a concurrent
//! resource group change can interleave with them; replica node sets are
//! healed afterwards by [`Meta::recover_all_collections`].

pub mod collection;
pub mod dist;
pub mod failed_load;
pub mod replica;
pub mod resource;
pub mod target;

pub use collection::{Collection, CollectionManager, LoadStatus, LoadType, Partition};
pub use dist::{DistributionManager, LeaderView, LeaderViewFilter, Segment, SegmentDist, SegmentFilter};
pub use failed_load::FailedLoadCache;
pub use replica::{Replica, ReplicaManager};
pub use resource::{
    ResourceGroup, ResourceGroupConfig, ResourceManager, TransferPolicy,
    DEFAULT_RESOURCE_GROUP_CAPACITY, DEFAULT_RESOURCE_GROUP_NAME,
};
pub use target::{CollectionTarget, DmChannel, TargetManager, TargetScope, TargetSegment};

use crate::common::{Error, Result, UniqueId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

pub struct Meta {
    pub collections: CollectionManager,
    pub replicas: ReplicaManager,
    pub resources: ResourceManager,
    pub failed_loads: FailedLoadCache,
}

impl Meta {
    pub fn new(failed_load_ttl: Duration, failed_load_capacity: usize) -> Self {
        Self {
            collections: CollectionManager::new(),
            replicas: ReplicaManager::new(),
            resources: ResourceManager::new(),
            failed_loads: FailedLoadCache::new(failed_load_ttl, failed_load_capacity),
        }
    }

    /// Validate the resource groups named by a load request.
    ///
    /// The default group cannot be mixed with others, and a collection that
    /// already has replicas can only name groups it already uses.
    pub fn check_resource_groups(&self, collection: UniqueId, groups: &[String]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let used = self.replicas.resource_groups_of(collection);
        for rg in groups {
            if !used.is_empty() && !used.contains(rg) {
                return Err(Error::parameter_invalid(
                    "created resource group(s)",
                    rg,
                    "given resource group not found",
                ));
            }
            if groups.len() > 1 && rg == DEFAULT_RESOURCE_GROUP_NAME {
                return Err(Error::parameter_invalid(
                    "no default resource group mixed with the other resource group(s)",
                    rg,
                    "",
                ));
            }
        }
        Ok(())
    }

    /// Create `replica_number` replicas of a collection over the given groups.
    ///
    /// No groups puts every replica in the default group, one group takes all
    /// of them, otherwise each group hosts exactly one replica. The usable
    /// nodes of a group are dealt round-robin in ascending id order.
    pub fn spawn_replicas_with_rg(
        &self,
        collection: UniqueId,
        groups: &[String],
        replica_number: u32,
        usable: impl Fn(UniqueId) -> bool,
    ) -> Result<Vec<Replica>> {
        if replica_number == 0 {
            return Err(Error::parameter_invalid(
                "replica number > 0",
                replica_number,
                "",
            ));
        }

        let assignment: Vec<(String, u32)> = match groups {
            [] => vec![(DEFAULT_RESOURCE_GROUP_NAME.to_string(), replica_number)],
            [rg] => vec![(rg.clone(), replica_number)],
            _ if groups.len() as u32 == replica_number => {
                groups.iter().map(|rg| (rg.clone(), 1)).collect()
            }
            _ => {
                return Err(Error::parameter_invalid(
                    "resource group num can only be 0, 1 or same as replica number",
                    groups.len(),
                    format!("replica number is {}", replica_number),
                ))
            }
        };

        let mut plan = Vec::new();
        for (rg, count) in assignment {
            let nodes: Vec<UniqueId> = self
                .resources
                .get_nodes(&rg)?
                .into_iter()
                .filter(|n| usable(*n))
                .collect();
            if (nodes.len() as u32) < count {
                return Err(Error::parameter_invalid(
                    format!("at least {} nodes in resource group {}", count, rg),
                    nodes.len(),
                    "nodes not enough",
                ));
            }
            let mut node_sets = vec![BTreeSet::new(); count as usize];
            for (i, node) in nodes.into_iter().enumerate() {
                node_sets[i % count as usize].insert(node);
            }
            plan.extend(node_sets.into_iter().map(|set| (rg.clone(), set)));
        }

        let replicas = self.replicas.spawn(collection, plan);
        for replica in &replicas {
            tracing::info!(
                collection_id = collection,
                replica_id = replica.id,
                resource_group = %replica.resource_group,
                nodes = ?replica.nodes,
                "replica spawned"
            );
        }
        Ok(replicas)
    }

    /// Move `num_replica` replicas of a collection from one group to another.
    ///
    /// Only the group association changes; node sets converge later.
    pub fn transfer_replica(
        &self,
        collection: UniqueId,
        source: &str,
        target: &str,
        num_replica: usize,
    ) -> Result<Vec<UniqueId>> {
        for rg in [source, target] {
            if !self.resources.contains_resource_group(rg) {
                return Err(Error::ResourceGroupNotFound(rg.to_string()));
            }
        }
        if num_replica == 0 {
            return Err(Error::parameter_invalid(
                "NumReplica > 0",
                num_replica,
                "invalid number of replicas to transfer",
            ));
        }

        let replicas = self.replicas.get_by_collection_and_rg(collection, source);
        if replicas.len() < num_replica {
            return Err(Error::parameter_invalid(
                format!("at least {} replicas of collection {} in {}", num_replica, collection, source),
                replicas.len(),
                "replicas not enough",
            ));
        }

        let moved: Vec<UniqueId> = replicas.iter().take(num_replica).map(|r| r.id).collect();
        for id in &moved {
            self.replicas.set_resource_group(*id, target);
        }
        tracing::info!(
            collection_id = collection,
            source = %source,
            target = %target,
            replicas = ?moved,
            "replicas transferred between resource groups"
        );
        Ok(moved)
    }

    /// Hand idle nodes of each group to the collection replicas living there.
    ///
    /// A usable node not yet serving any replica of a collection joins the
    /// replica with the fewest nodes among that collection's replicas in the
    /// group.
    pub fn recover_all_collections(&self, usable: impl Fn(UniqueId) -> bool) {
        for collection in self.replicas.get_collections() {
            self.recover_collection(collection, &usable);
        }
    }

    fn recover_collection(&self, collection: UniqueId, usable: &impl Fn(UniqueId) -> bool) {
        let replicas = self.replicas.get_by_collection(collection);
        let mut used: BTreeSet<UniqueId> = replicas.iter().flat_map(|r| r.nodes.iter().copied()).collect();

        let mut by_rg: BTreeMap<&str, Vec<&Replica>> = BTreeMap::new();
        for replica in &replicas {
            by_rg
                .entry(replica.resource_group.as_str())
                .or_default()
                .push(replica);
        }

        for (rg, rg_replicas) in by_rg {
            let Ok(nodes) = self.resources.get_nodes(rg) else {
                continue;
            };
            let mut sizes: Vec<(usize, UniqueId)> =
                rg_replicas.iter().map(|r| (r.nodes.len(), r.id)).collect();
            for node in nodes {
                if used.contains(&node) || !usable(node) {
                    continue;
                }
                if let Some(slot) = sizes.iter_mut().min() {
                    self.replicas.add_node(slot.1, node);
                    slot.0 += 1;
                    used.insert(node);
                    tracing::info!(
                        collection_id = collection,
                        replica_id = slot.1,
                        node_id = node,
                        "node added to replica"
                    );
                }
            }
        }
    }

    /// For each foreign group, how many nodes of the replica belong to it.
    pub fn get_outgoing_node_num_by_replica(&self, replica: &Replica) -> HashMap<String, usize> {
        let mut outgoing = HashMap::new();
        for node in &replica.nodes {
            if let Some(rg) = self.resources.node_resource_group(*node) {
                if rg != replica.resource_group {
                    *outgoing.entry(rg).or_insert(0) += 1;
                }
            }
        }
        outgoing
    }

    /// A node left the fleet: drop it from its group and every replica.
    pub fn handle_node_down(&self, node: UniqueId) {
        self.resources.handle_node_down(node);
        let affected = self.replicas.remove_node(node);
        if !affected.is_empty() {
            tracing::info!(node_id = node, replicas = ?affected, "node removed from replicas");
        }
    }
}
