//! Resource groups: named pools of query nodes
//!
//! A node belongs to exactly one group at a time. The default group always
//! exists and absorbs nodes that no other group asks for.

use crate::common::{Error, Result, UniqueId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_RESOURCE_GROUP_NAME: &str = "__default_resource_group";
pub const DEFAULT_RESOURCE_GROUP_CAPACITY: u32 = 1_000_000;

const MAX_RESOURCE_GROUP_NAME_LEN: usize = 255;

/// How nodes are picked when a group gives some away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPolicy {
    /// Fewest loaded segments first, ties broken by node id
    #[default]
    LeastLoaded,
    /// Lowest node id first
    LowestId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupConfig {
    /// Node count the group asks for (its capacity)
    pub requests: u32,
    /// Upper bound of the node count
    pub limits: u32,
    pub transfer_policy: TransferPolicy,
}

impl Default for ResourceGroupConfig {
    fn default() -> Self {
        Self {
            requests: 0,
            limits: DEFAULT_RESOURCE_GROUP_CAPACITY,
            transfer_policy: TransferPolicy::default(),
        }
    }
}

impl ResourceGroupConfig {
    pub fn with_nodes(requests: u32) -> Self {
        Self {
            requests,
            limits: requests.max(DEFAULT_RESOURCE_GROUP_CAPACITY),
            ..Default::default()
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.requests > self.limits {
            return Err(Error::parameter_invalid(
                format!("requests <= limits ({})", self.limits),
                self.requests,
                format!("invalid config of resource group {}", name),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub name: String,
    pub nodes: BTreeSet<UniqueId>,
    pub config: ResourceGroupConfig,
}

impl ResourceGroup {
    fn new(name: &str, config: ResourceGroupConfig) -> Self {
        Self {
            name: name.to_string(),
            nodes: BTreeSet::new(),
            config,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.config.requests
    }

    pub fn contains_node(&self, node: UniqueId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn nodes(&self) -> Vec<UniqueId> {
        self.nodes.iter().copied().collect()
    }

    /// Capacity not yet covered by member nodes.
    fn missing_nodes(&self) -> u32 {
        self.config.requests.saturating_sub(self.nodes.len() as u32)
    }
}

pub fn validate_resource_group_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::parameter_invalid(
            "valid resource group name",
            name,
            reason.to_string(),
        ))
    };
    if name.is_empty() {
        return invalid("resource group name couldn't be empty");
    }
    if name.len() > MAX_RESOURCE_GROUP_NAME_LEN {
        return invalid("resource group name is too long");
    }
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !(first == '_' || first.is_ascii_alphabetic()) {
            return invalid("the first character of resource group name must be an underscore or letter");
        }
    }
    if !chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) {
        return invalid("resource group name can only contain numbers, letters and underscores");
    }
    Ok(())
}

/// ResourceManager owns resource group membership.
pub struct ResourceManager {
    groups: RwLock<HashMap<String, ResourceGroup>>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert(
            DEFAULT_RESOURCE_GROUP_NAME.to_string(),
            ResourceGroup::new(
                DEFAULT_RESOURCE_GROUP_NAME,
                ResourceGroupConfig::with_nodes(DEFAULT_RESOURCE_GROUP_CAPACITY),
            ),
        );
        Self {
            groups: RwLock::new(groups),
        }
    }

    pub fn add_resource_group(&self, name: &str, config: ResourceGroupConfig) -> Result<()> {
        validate_resource_group_name(name)?;
        config.validate(name)?;

        let mut groups = self.groups.write();
        if groups.contains_key(name) {
            return Err(Error::ResourceGroupAlreadyExist(name.to_string()));
        }
        groups.insert(name.to_string(), ResourceGroup::new(name, config));
        tracing::info!(resource_group = %name, "resource group created");
        Ok(())
    }

    /// Drop a group, returning its nodes to the default group.
    ///
    /// Replica references are checked by the caller.
    pub fn remove_resource_group(&self, name: &str) -> Result<()> {
        if name == DEFAULT_RESOURCE_GROUP_NAME {
            return Err(Error::parameter_invalid(
                "not default resource group",
                name,
                "default resource group can't be dropped",
            ));
        }

        let mut groups = self.groups.write();
        let Some(removed) = groups.remove(name) else {
            tracing::info!(resource_group = %name, "resource group not found, skip dropping");
            return Ok(());
        };
        if let Some(default) = groups.get_mut(DEFAULT_RESOURCE_GROUP_NAME) {
            default.nodes.extend(removed.nodes.iter().copied());
        }
        tracing::info!(
            resource_group = %name,
            nodes = ?removed.nodes,
            "resource group dropped, nodes returned to default resource group"
        );
        Ok(())
    }

    /// Replace the config of several groups at once; nothing changes on error.
    pub fn update_resource_groups(&self, configs: &HashMap<String, ResourceGroupConfig>) -> Result<()> {
        let mut groups = self.groups.write();
        for (name, config) in configs {
            if !groups.contains_key(name) {
                return Err(Error::ResourceGroupNotFound(name.clone()));
            }
            config.validate(name)?;
        }
        for (name, config) in configs {
            if let Some(rg) = groups.get_mut(name) {
                rg.config = config.clone();
            }
        }
        Ok(())
    }

    /// Move `num_node` nodes from `source` to `target`.
    ///
    /// `load` reports the load of a node for the `LeastLoaded` policy.
    pub fn transfer_node(
        &self,
        source: &str,
        target: &str,
        num_node: usize,
        load: impl Fn(UniqueId) -> usize,
    ) -> Result<Vec<UniqueId>> {
        if source == target {
            return Err(Error::parameter_invalid(
                "different source and target resource group",
                source,
                "source and target resource group should not be the same",
            ));
        }
        if num_node == 0 {
            return Err(Error::parameter_invalid(
                "NumNode > 0",
                num_node,
                "invalid number of nodes to transfer",
            ));
        }

        let mut groups = self.groups.write();
        let src = groups
            .get(source)
            .ok_or_else(|| Error::ResourceGroupNotFound(source.to_string()))?;
        if !groups.contains_key(target) {
            return Err(Error::ResourceGroupNotFound(target.to_string()));
        }
        if src.nodes.len() < num_node {
            return Err(Error::parameter_invalid(
                format!("at least {} nodes in {}", num_node, source),
                src.nodes.len(),
                "nodes not enough",
            ));
        }

        let mut candidates = src.nodes();
        match src.config.transfer_policy {
            TransferPolicy::LeastLoaded => candidates.sort_by_key(|node| (load(*node), *node)),
            TransferPolicy::LowestId => candidates.sort_unstable(),
        }
        candidates.truncate(num_node);

        if let Some(src) = groups.get_mut(source) {
            for node in &candidates {
                src.nodes.remove(node);
            }
            src.config.requests = src.config.requests.saturating_sub(num_node as u32);
        }
        if let Some(dst) = groups.get_mut(target) {
            dst.nodes.extend(candidates.iter().copied());
            dst.config.requests = dst.config.requests.saturating_add(num_node as u32);
            dst.config.limits = dst.config.limits.max(dst.config.requests);
        }

        tracing::info!(
            source = %source,
            target = %target,
            nodes = ?candidates,
            "nodes transferred between resource groups"
        );
        Ok(candidates)
    }

    pub fn contains_resource_group(&self, name: &str) -> bool {
        self.groups.read().contains_key(name)
    }

    pub fn contains_node(&self, name: &str, node: UniqueId) -> bool {
        self.groups
            .read()
            .get(name)
            .map(|rg| rg.contains_node(node))
            .unwrap_or(false)
    }

    pub fn get_resource_group(&self, name: &str) -> Option<ResourceGroup> {
        self.groups.read().get(name).cloned()
    }

    pub fn get_nodes(&self, name: &str) -> Result<Vec<UniqueId>> {
        self.groups
            .read()
            .get(name)
            .map(ResourceGroup::nodes)
            .ok_or_else(|| Error::ResourceGroupNotFound(name.to_string()))
    }

    /// Sorted group names.
    pub fn list_resource_groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn node_resource_group(&self, node: UniqueId) -> Option<String> {
        self.groups
            .read()
            .values()
            .find(|rg| rg.contains_node(node))
            .map(|rg| rg.name.clone())
    }

    /// Assign a newly joined node, preferring the group missing the most nodes.
    pub fn handle_node_up(&self, node: UniqueId) -> String {
        let mut groups = self.groups.write();
        if let Some(rg) = groups.values().find(|rg| rg.contains_node(node)) {
            return rg.name.clone();
        }

        let target = groups
            .values()
            .filter(|rg| rg.name != DEFAULT_RESOURCE_GROUP_NAME && rg.missing_nodes() > 0)
            .max_by(|a, b| {
                a.missing_nodes()
                    .cmp(&b.missing_nodes())
                    .then_with(|| b.name.cmp(&a.name))
            })
            .map(|rg| rg.name.clone())
            .unwrap_or_else(|| DEFAULT_RESOURCE_GROUP_NAME.to_string());

        if let Some(rg) = groups.get_mut(&target) {
            rg.nodes.insert(node);
        }
        tracing::info!(node_id = node, resource_group = %target, "node assigned to resource group");
        target
    }

    /// Forget a node that left the fleet. Returns the group it belonged to.
    pub fn handle_node_down(&self, node: UniqueId) -> Option<String> {
        let mut groups = self.groups.write();
        let rg = groups.values_mut().find(|rg| rg.contains_node(node))?;
        rg.nodes.remove(&node);
        Some(rg.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;

    fn manager_with_nodes(nodes: &[UniqueId]) -> ResourceManager {
        let manager = ResourceManager::new();
        for node in nodes {
            manager.handle_node_up(*node);
        }
        manager
    }

    #[test]
    fn test_default_group_always_exists() {
        let manager = ResourceManager::new();
        assert!(manager.contains_resource_group(DEFAULT_RESOURCE_GROUP_NAME));
        let err = manager
            .remove_resource_group(DEFAULT_RESOURCE_GROUP_NAME)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParameterInvalid);
    }

    #[test]
    fn test_add_duplicate_and_invalid_names() {
        let manager = ResourceManager::new();
        manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap();
        let err = manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceGroupAlreadyExist);

        for name in ["", "1rg", "rg-a", "rg a"] {
            let err = manager
                .add_resource_group(name, ResourceGroupConfig::default())
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::ParameterInvalid, "name {:?}", name);
        }
        assert!(manager
            .add_resource_group("_rg_2", ResourceGroupConfig::default())
            .is_ok());
    }

    #[test]
    fn test_node_membership_is_exclusive() {
        let manager = manager_with_nodes(&[1, 2, 3]);
        manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap();
        manager
            .transfer_node(DEFAULT_RESOURCE_GROUP_NAME, "rg1", 2, |_| 0)
            .unwrap();

        for node in [1, 2, 3] {
            let owners = manager
                .list_resource_groups()
                .into_iter()
                .filter(|rg| manager.contains_node(rg, node))
                .count();
            assert_eq!(owners, 1, "node {} owned by {} groups", node, owners);
        }
        // re-announcing a node keeps its membership
        let rg = manager.node_resource_group(1).unwrap();
        assert_eq!(manager.handle_node_up(1), rg);
    }

    #[test]
    fn test_transfer_node_least_loaded_first() {
        let manager = manager_with_nodes(&[1, 2, 3, 4]);
        manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap();

        let load = |node: UniqueId| match node {
            1 => 10,
            2 => 0,
            3 => 5,
            _ => 0,
        };
        let moved = manager
            .transfer_node(DEFAULT_RESOURCE_GROUP_NAME, "rg1", 2, load)
            .unwrap();
        assert_eq!(moved, vec![2, 4]);

        let rg1 = manager.get_resource_group("rg1").unwrap();
        assert_eq!(rg1.nodes(), vec![2, 4]);
        assert_eq!(rg1.capacity(), 2);
    }

    #[test]
    fn test_transfer_node_errors() {
        let manager = manager_with_nodes(&[1]);
        manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap();

        let err = manager
            .transfer_node(DEFAULT_RESOURCE_GROUP_NAME, "rg1", 2, |_| 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParameterInvalid);

        let err = manager
            .transfer_node(DEFAULT_RESOURCE_GROUP_NAME, "missing", 1, |_| 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceGroupNotFound);

        let err = manager.transfer_node("rg1", "rg1", 1, |_| 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParameterInvalid);
    }

    #[test]
    fn test_remove_returns_nodes_to_default() {
        let manager = manager_with_nodes(&[1, 2]);
        manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap();
        manager
            .transfer_node(DEFAULT_RESOURCE_GROUP_NAME, "rg1", 1, |_| 0)
            .unwrap();

        manager.remove_resource_group("rg1").unwrap();
        assert!(!manager.contains_resource_group("rg1"));
        assert_eq!(
            manager.get_nodes(DEFAULT_RESOURCE_GROUP_NAME).unwrap(),
            vec![1, 2]
        );
        // dropping again is a no-op
        assert!(manager.remove_resource_group("rg1").is_ok());
    }

    #[test]
    fn test_node_up_fills_missing_capacity() {
        let manager = ResourceManager::new();
        manager
            .add_resource_group("rg1", ResourceGroupConfig::with_nodes(1))
            .unwrap();

        assert_eq!(manager.handle_node_up(1), "rg1");
        assert_eq!(manager.handle_node_up(2), DEFAULT_RESOURCE_GROUP_NAME);
        assert_eq!(manager.handle_node_down(1).as_deref(), Some("rg1"));
        assert!(manager.handle_node_down(1).is_none());
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let manager = ResourceManager::new();
        manager
            .add_resource_group("rg1", ResourceGroupConfig::default())
            .unwrap();

        let mut configs = HashMap::new();
        configs.insert("rg1".to_string(), ResourceGroupConfig::with_nodes(3));
        configs.insert("missing".to_string(), ResourceGroupConfig::default());
        let err = manager.update_resource_groups(&configs).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceGroupNotFound);
        assert_eq!(manager.get_resource_group("rg1").unwrap().capacity(), 0);

        configs.remove("missing");
        manager.update_resource_groups(&configs).unwrap();
        assert_eq!(manager.get_resource_group("rg1").unwrap().capacity(), 3);
    }
}
