//! Query node registry

use crate::common::UniqueId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: UniqueId,
    pub addr: String,
    pub hostname: String,
    pub stopping: bool,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeInfo {
    pub fn new(id: UniqueId, addr: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            hostname: hostname.into(),
            stopping: false,
            last_heartbeat: Utc::now(),
        }
    }

    /// Whether the last heartbeat is within `interval`.
    pub fn is_reachable(&self, interval: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_heartbeat);
        elapsed.to_std().map(|e| e <= interval).unwrap_or(true)
    }
}

pub struct NodeManager {
    nodes: RwLock<HashMap<UniqueId, NodeInfo>>,
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeManager {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a node.
    pub fn add(&self, node: NodeInfo) {
        tracing::info!("query node {} registered at {}", node.id, node.addr);
        self.nodes.write().insert(node.id, node);
    }

    pub fn remove(&self, id: UniqueId) -> Option<NodeInfo> {
        self.nodes.write().remove(&id)
    }

    pub fn get(&self, id: UniqueId) -> Option<NodeInfo> {
        self.nodes.read().get(&id).cloned()
    }

    /// All nodes, ordered by id.
    pub fn get_all(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.read().values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub fn stopping(&self, id: UniqueId) -> bool {
        self.nodes.write().get_mut(&id).map(|n| n.stopping = true).is_some()
    }

    /// Registered and not stopping: may take new placements.
    pub fn is_usable(&self, id: UniqueId) -> bool {
        self.nodes
            .read()
            .get(&id)
            .map(|n| !n.stopping)
            .unwrap_or(false)
    }

    /// Record a heartbeat. Returns false for unknown nodes.
    pub fn heartbeat(&self, id: UniqueId) -> bool {
        match self.nodes.write().get_mut(&id) {
            Some(n) => {
                n.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Test hook for backdating a heartbeat.
    pub fn set_last_heartbeat(&self, id: UniqueId, at: DateTime<Utc>) {
        if let Some(n) = self.nodes.write().get_mut(&id) {
            n.last_heartbeat = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_stop() {
        let manager = NodeManager::new();
        manager.add(NodeInfo::new(2, "http://n2", "host-2"));
        manager.add(NodeInfo::new(1, "http://n1", "host-1"));

        let ids: Vec<UniqueId> = manager.get_all().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);

        assert!(manager.is_usable(1));
        assert!(manager.stopping(1));
        assert!(!manager.is_usable(1));
        assert!(manager.is_usable(2));
        assert!(!manager.stopping(9));
        assert!(!manager.is_usable(9));
    }

    #[test]
    fn test_reachability() {
        let manager = NodeManager::new();
        manager.add(NodeInfo::new(1, "http://n1", "host-1"));
        let interval = Duration::from_secs(10);
        assert!(manager.get(1).unwrap().is_reachable(interval));

        manager.set_last_heartbeat(1, Utc::now() - chrono::Duration::seconds(60));
        assert!(!manager.get(1).unwrap().is_reachable(interval));
        assert!(manager.heartbeat(1));
        assert!(manager.get(1).unwrap().is_reachable(interval));
    }
}
