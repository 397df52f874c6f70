//! Collection replicas and their node sets

use crate::common::UniqueId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: UniqueId,
    pub collection_id: UniqueId,
    pub resource_group: String,
    pub nodes: BTreeSet<UniqueId>,
}

impl Replica {
    pub fn contains(&self, node: UniqueId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn node_ids(&self) -> Vec<UniqueId> {
        self.nodes.iter().copied().collect()
    }
}

/// ReplicaManager maps collections to replicas.
pub struct ReplicaManager {
    replicas: RwLock<HashMap<UniqueId, Replica>>,
    next_id: AtomicI64,
}

impl Default for ReplicaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaManager {
    pub fn new() -> Self {
        Self {
            replicas: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> UniqueId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create one replica per entry of `groups`, with its initial nodes.
    pub fn spawn(
        &self,
        collection: UniqueId,
        groups: Vec<(String, BTreeSet<UniqueId>)>,
    ) -> Vec<Replica> {
        let created: Vec<Replica> = groups
            .into_iter()
            .map(|(resource_group, nodes)| Replica {
                id: self.allocate_id(),
                collection_id: collection,
                resource_group,
                nodes,
            })
            .collect();

        let mut replicas = self.replicas.write();
        for replica in &created {
            replicas.insert(replica.id, replica.clone());
        }
        created
    }

    pub fn get(&self, id: UniqueId) -> Option<Replica> {
        self.replicas.read().get(&id).cloned()
    }

    /// Replicas of a collection, ordered by id.
    pub fn get_by_collection(&self, collection: UniqueId) -> Vec<Replica> {
        let mut replicas: Vec<Replica> = self
            .replicas
            .read()
            .values()
            .filter(|r| r.collection_id == collection)
            .cloned()
            .collect();
        replicas.sort_by_key(|r| r.id);
        replicas
    }

    pub fn get_by_collection_and_node(&self, collection: UniqueId, node: UniqueId) -> Option<Replica> {
        self.replicas
            .read()
            .values()
            .find(|r| r.collection_id == collection && r.contains(node))
            .cloned()
    }

    pub fn get_by_collection_and_rg(&self, collection: UniqueId, rg: &str) -> Vec<Replica> {
        self.get_by_collection(collection)
            .into_iter()
            .filter(|r| r.resource_group == rg)
            .collect()
    }

    pub fn get_by_resource_group(&self, rg: &str) -> Vec<Replica> {
        let mut replicas: Vec<Replica> = self
            .replicas
            .read()
            .values()
            .filter(|r| r.resource_group == rg)
            .cloned()
            .collect();
        replicas.sort_by_key(|r| r.id);
        replicas
    }

    /// Replicas whose node set contains `node`, across collections.
    pub fn get_by_node(&self, node: UniqueId) -> Vec<Replica> {
        let mut replicas: Vec<Replica> = self
            .replicas
            .read()
            .values()
            .filter(|r| r.contains(node))
            .cloned()
            .collect();
        replicas.sort_by_key(|r| r.id);
        replicas
    }

    /// Collections with at least one replica, ordered by id.
    pub fn get_collections(&self) -> Vec<UniqueId> {
        let set: BTreeSet<UniqueId> = self
            .replicas
            .read()
            .values()
            .map(|r| r.collection_id)
            .collect();
        set.into_iter().collect()
    }

    pub fn resource_groups_of(&self, collection: UniqueId) -> BTreeSet<String> {
        self.replicas
            .read()
            .values()
            .filter(|r| r.collection_id == collection)
            .map(|r| r.resource_group.clone())
            .collect()
    }

    pub fn set_resource_group(&self, replica: UniqueId, rg: &str) -> bool {
        match self.replicas.write().get_mut(&replica) {
            Some(r) => {
                r.resource_group = rg.to_string();
                true
            }
            None => false,
        }
    }

    pub fn add_node(&self, replica: UniqueId, node: UniqueId) -> bool {
        self.replicas
            .write()
            .get_mut(&replica)
            .map(|r| r.nodes.insert(node))
            .unwrap_or(false)
    }

    /// Remove a node from every replica holding it. Returns the affected replica ids.
    pub fn remove_node(&self, node: UniqueId) -> Vec<UniqueId> {
        let mut affected = Vec::new();
        for replica in self.replicas.write().values_mut() {
            if replica.nodes.remove(&node) {
                affected.push(replica.id);
            }
        }
        affected.sort_unstable();
        affected
    }

    pub fn remove_collection(&self, collection: UniqueId) -> usize {
        let mut replicas = self.replicas.write();
        let before = replicas.len();
        replicas.retain(|_, r| r.collection_id != collection);
        before - replicas.len()
    }
}
