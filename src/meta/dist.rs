//! Physical distribution: segments and leader views reported by query nodes
//!
//! Each node reports its full state on heartbeat, so updates replace the
//! node's previous entries wholesale.

use crate::common::UniqueId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: UniqueId,
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub node_id: UniqueId,
    pub channel: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub num_rows: i64,
}

/// Where a leader sees one of its segments served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDist {
    pub node_id: UniqueId,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderView {
    pub node_id: UniqueId,
    pub collection_id: UniqueId,
    pub channel: String,
    #[serde(default)]
    pub segments: HashMap<UniqueId, SegmentDist>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentFilter {
    collection: Option<UniqueId>,
    node: Option<UniqueId>,
    channel: Option<String>,
}

impl SegmentFilter {
    pub fn collection(mut self, collection: UniqueId) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn node(mut self, node: UniqueId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    fn matches(&self, s: &Segment) -> bool {
        self.collection.map_or(true, |c| s.collection_id == c)
            && self.node.map_or(true, |n| s.node_id == n)
            && self.channel.as_deref().map_or(true, |ch| s.channel == ch)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeaderViewFilter {
    collection: Option<UniqueId>,
    node: Option<UniqueId>,
    channel: Option<String>,
}

impl LeaderViewFilter {
    pub fn collection(mut self, collection: UniqueId) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn node(mut self, node: UniqueId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    fn matches(&self, v: &LeaderView) -> bool {
        self.collection.map_or(true, |c| v.collection_id == c)
            && self.node.map_or(true, |n| v.node_id == n)
            && self.channel.as_deref().map_or(true, |ch| v.channel == ch)
    }
}

/// DistributionManager is the read model of what every node actually serves.
pub struct DistributionManager {
    segments: RwLock<HashMap<UniqueId, Vec<Segment>>>,
    leader_views: RwLock<HashMap<UniqueId, Vec<LeaderView>>>,
}

impl Default for DistributionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionManager {
    pub fn new() -> Self {
        Self {
            segments: RwLock::new(HashMap::new()),
            leader_views: RwLock::new(HashMap::new()),
        }
    }

    pub fn update_segments(&self, node: UniqueId, segments: Vec<Segment>) {
        self.segments.write().insert(node, segments);
    }

    pub fn update_leader_views(&self, node: UniqueId, views: Vec<LeaderView>) {
        self.leader_views.write().insert(node, views);
    }

    /// Forget everything a node reported.
    pub fn remove_node(&self, node: UniqueId) {
        self.segments.write().remove(&node);
        self.leader_views.write().remove(&node);
    }

    /// Segments matching the filter, ordered by (segment id, node id).
    pub fn get_segments(&self, filter: &SegmentFilter) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .segments
            .read()
            .values()
            .flatten()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        segments.sort_by_key(|s| (s.id, s.node_id));
        segments
    }

    /// Leader views matching the filter, ordered by node id.
    pub fn get_leader_views(&self, filter: &LeaderViewFilter) -> Vec<LeaderView> {
        let mut views: Vec<LeaderView> = self
            .leader_views
            .read()
            .values()
            .flatten()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        views.sort_by(|a, b| a.node_id.cmp(&b.node_id).then_with(|| a.channel.cmp(&b.channel)));
        views
    }

    /// Number of segments a node serves, across collections.
    pub fn segment_count(&self, node: UniqueId) -> usize {
        self.segments
            .read()
            .get(&node)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether any segment or leader view of the collection is still reported.
    pub fn has_collection(&self, collection: UniqueId) -> bool {
        self.segments
            .read()
            .values()
            .flatten()
            .any(|s| s.collection_id == collection)
            || self
                .leader_views
                .read()
                .values()
                .flatten()
                .any(|v| v.collection_id == collection)
    }

    pub fn has_partitions(&self, collection: UniqueId, partitions: &[UniqueId]) -> bool {
        self.segments
            .read()
            .values()
            .flatten()
            .any(|s| s.collection_id == collection && partitions.contains(&s.partition_id))
    }
}
