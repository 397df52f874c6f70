//! Current and next targets
//!
//! A target is the desired set of channels and sealed segments of a
//! collection. The next target is pulled from the broker; the target observer
//! promotes it to current once the fleet serves it.

use crate::common::UniqueId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetScope {
    Current,
    Next,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmChannel {
    pub collection_id: UniqueId,
    pub channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSegment {
    pub id: UniqueId,
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub channel: String,
    pub num_rows: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionTarget {
    pub channels: BTreeMap<String, DmChannel>,
    pub segments: HashMap<UniqueId, TargetSegment>,
    pub version: i64,
}

impl CollectionTarget {
    pub fn new(channels: Vec<DmChannel>, segments: Vec<TargetSegment>, version: i64) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|c| (c.channel_name.clone(), c))
                .collect(),
            segments: segments.into_iter().map(|s| (s.id, s)).collect(),
            version,
        }
    }

    fn retain_partitions(&mut self, keep: impl Fn(UniqueId) -> bool) {
        self.segments.retain(|_, s| keep(s.partition_id));
    }
}

#[derive(Default)]
struct Targets {
    current: HashMap<UniqueId, CollectionTarget>,
    next: HashMap<UniqueId, CollectionTarget>,
}

impl Targets {
    fn scope(&self, scope: TargetScope) -> &HashMap<UniqueId, CollectionTarget> {
        match scope {
            TargetScope::Current => &self.current,
            TargetScope::Next => &self.next,
        }
    }
}

/// TargetManager holds both target scopes of every collection.
pub struct TargetManager {
    targets: RwLock<Targets>,
}

impl Default for TargetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetManager {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(Targets::default()),
        }
    }

    pub fn update_next_target(&self, collection: UniqueId, target: CollectionTarget) {
        tracing::debug!(
            collection_id = collection,
            channels = target.channels.len(),
            segments = target.segments.len(),
            "next target updated"
        );
        self.targets.write().next.insert(collection, target);
    }

    pub fn get_target(&self, collection: UniqueId, scope: TargetScope) -> Option<CollectionTarget> {
        self.targets.read().scope(scope).get(&collection).cloned()
    }

    /// Make the next target current. Returns false when there is no next target.
    pub fn promote(&self, collection: UniqueId) -> bool {
        let mut targets = self.targets.write();
        match targets.next.remove(&collection) {
            Some(next) => {
                targets.current.insert(collection, next);
                tracing::info!(collection_id = collection, "next target promoted to current");
                true
            }
            None => false,
        }
    }

    /// Channels of a collection, ordered by name.
    pub fn get_dm_channels_by_collection(&self, collection: UniqueId, scope: TargetScope) -> Vec<DmChannel> {
        self.targets
            .read()
            .scope(scope)
            .get(&collection)
            .map(|t| t.channels.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_sealed_segments_by_collection(&self, collection: UniqueId, scope: TargetScope) -> Vec<TargetSegment> {
        let mut segments: Vec<TargetSegment> = self
            .targets
            .read()
            .scope(scope)
            .get(&collection)
            .map(|t| t.segments.values().cloned().collect())
            .unwrap_or_default();
        segments.sort_by_key(|s| s.id);
        segments
    }

    pub fn get_sealed_segments_by_channel(
        &self,
        collection: UniqueId,
        channel: &str,
        scope: TargetScope,
    ) -> Vec<TargetSegment> {
        self.get_sealed_segments_by_collection(collection, scope)
            .into_iter()
            .filter(|s| s.channel == channel)
            .collect()
    }

    pub fn get_sealed_segment(
        &self,
        collection: UniqueId,
        segment: UniqueId,
        scope: TargetScope,
    ) -> Option<TargetSegment> {
        self.targets
            .read()
            .scope(scope)
            .get(&collection)
            .and_then(|t| t.segments.get(&segment).cloned())
    }

    pub fn remove_collection(&self, collection: UniqueId) {
        let mut targets = self.targets.write();
        targets.current.remove(&collection);
        targets.next.remove(&collection);
    }

    /// Drop the segments of some partitions from both scopes.
    pub fn remove_partitions(&self, collection: UniqueId, partitions: &[UniqueId]) {
        let mut targets = self.targets.write();
        let Targets { current, next } = &mut *targets;
        for scope in [current, next] {
            if let Some(target) = scope.get_mut(&collection) {
                target.retain_partitions(|p| !partitions.contains(&p));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: UniqueId, partition: UniqueId, channel: &str) -> TargetSegment {
        TargetSegment {
            id,
            collection_id: 100,
            partition_id: partition,
            channel: channel.to_string(),
            num_rows: 10,
        }
    }

    fn target() -> CollectionTarget {
        CollectionTarget::new(
            vec![
                DmChannel {
                    collection_id: 100,
                    channel_name: "dml_1".into(),
                },
                DmChannel {
                    collection_id: 100,
                    channel_name: "dml_0".into(),
                },
            ],
            vec![segment(1, 10, "dml_0"), segment(2, 11, "dml_1"), segment(3, 10, "dml_1")],
            1,
        )
    }

    #[test]
    fn test_promote_next_to_current() {
        let manager = TargetManager::new();
        manager.update_next_target(100, target());
        assert!(manager
            .get_dm_channels_by_collection(100, TargetScope::Current)
            .is_empty());

        assert!(manager.promote(100));
        assert!(!manager.promote(100));
        let channels: Vec<String> = manager
            .get_dm_channels_by_collection(100, TargetScope::Current)
            .into_iter()
            .map(|c| c.channel_name)
            .collect();
        assert_eq!(channels, vec!["dml_0", "dml_1"]);
    }

    #[test]
    fn test_segments_by_channel() {
        let manager = TargetManager::new();
        manager.update_next_target(100, target());
        manager.promote(100);

        let ids: Vec<UniqueId> = manager
            .get_sealed_segments_by_channel(100, "dml_1", TargetScope::Current)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(manager
            .get_sealed_segment(100, 1, TargetScope::Current)
            .is_some());
        assert!(manager.get_sealed_segment(100, 1, TargetScope::Next).is_none());
    }

    #[test]
    fn test_remove_partitions() {
        let manager = TargetManager::new();
        manager.update_next_target(100, target());
        manager.promote(100);
        manager.remove_partitions(100, &[10]);

        let ids: Vec<UniqueId> = manager
            .get_sealed_segments_by_collection(100, TargetScope::Current)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![2]);

        manager.remove_collection(100);
        assert!(manager.get_target(100, TargetScope::Current).is_none());
    }
}
