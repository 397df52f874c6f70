//! Shard leader resolution
//!
//! Leader views are self-reported and may be stale. A view only qualifies
//! when its node is registered, heartbeating and not stopping, and it serves
//! every current-target segment of its channel. Qualified views are then
//! reduced to one per replica.

use crate::cluster::NodeManager;
use crate::common::{Error, Result, UniqueId};
use crate::coordinator::types::ShardLeadersList;
use crate::meta::{
    DistributionManager, LeaderView, LeaderViewFilter, LoadStatus, Meta, TargetManager,
    TargetScope, TargetSegment,
};
use std::collections::HashMap;
use std::time::Duration;

pub struct ShardLeaderResolver<'a> {
    pub meta: &'a Meta,
    pub targets: &'a TargetManager,
    pub dist: &'a DistributionManager,
    pub nodes: &'a NodeManager,
    pub heartbeat_interval: Duration,
}

impl ShardLeaderResolver<'_> {
    pub fn resolve(&self, collection: UniqueId) -> Result<Vec<ShardLeadersList>> {
        let mut percentage = self.meta.collections.calculate_load_percentage(collection);
        if percentage < 0 {
            return Err(Error::CollectionNotLoaded(collection, String::new()));
        }
        if self.meta.collections.calculate_load_status(collection) == LoadStatus::Loaded {
            percentage = 100;
        }
        if percentage < 100 {
            return Err(Error::CollectionNotFullyLoaded(collection));
        }

        let channels = self
            .targets
            .get_dm_channels_by_collection(collection, TargetScope::Current);
        if channels.is_empty() {
            return Err(Error::CollectionRecovering(
                collection,
                "loaded collection do not found any channel in target, may be in recovery".into(),
            ));
        }

        let mut shards = Vec::with_capacity(channels.len());
        for channel in channels {
            shards.push(self.resolve_channel(collection, &channel.channel_name)?);
        }
        Ok(shards)
    }

    fn resolve_channel(&self, collection: UniqueId, channel: &str) -> Result<ShardLeadersList> {
        let views = self.dist.get_leader_views(
            &LeaderViewFilter::default()
                .collection(collection)
                .channel(channel),
        );
        if views.is_empty() {
            return Err(Error::ChannelLack(
                channel.to_string(),
                "channel not subscribed".into(),
            )
            .wrap("failed to get shard leaders"));
        }

        let required = self
            .targets
            .get_sealed_segments_by_channel(collection, channel, TargetScope::Current);
        let mut reasons = Vec::new();
        let available: Vec<LeaderView> = views
            .into_iter()
            .filter(|view| match self.check_leader(view, &required) {
                Ok(()) => true,
                Err(e) => {
                    reasons.push(e.to_string());
                    false
                }
            })
            .collect();
        if available.is_empty() {
            tracing::warn!(channel = %channel, "no available leader: {}", reasons.join("; "));
            return Err(Error::ChannelNotAvailable(channel.to_string()).wrap(reasons.join("; ")));
        }

        let mut node_ids = Vec::new();
        let mut node_addrs = Vec::new();
        let mut leaders: Vec<LeaderView> = self.dedup(collection, available).into_values().collect();
        leaders.sort_by_key(|v| v.node_id);
        for leader in leaders {
            if let Some(info) = self.nodes.get(leader.node_id) {
                node_ids.push(info.id);
                node_addrs.push(info.addr);
            }
        }
        if node_ids.is_empty() {
            return Err(Error::ChannelNotAvailable(channel.to_string())
                .wrap("no leader address resolved"));
        }

        Ok(ShardLeadersList {
            channel_name: channel.to_string(),
            node_ids,
            node_addrs,
        })
    }

    fn check_leader(&self, view: &LeaderView, required: &[TargetSegment]) -> Result<()> {
        let node = self
            .nodes
            .get(view.node_id)
            .ok_or_else(|| Error::NodeNotFound(view.node_id, String::new()))?;
        if !node.is_reachable(self.heartbeat_interval) {
            return Err(Error::NodeOffline(view.node_id));
        }
        if node.stopping {
            return Err(Error::NodeStopping(view.node_id));
        }
        if let Some(lack) = required.iter().find(|s| !view.segments.contains_key(&s.id)) {
            return Err(Error::SegmentLack(lack.id));
        }
        Ok(())
    }

    /// One leader per replica: highest version, then lowest node id. Views
    /// from nodes outside every replica of the collection are dropped.
    fn dedup(&self, collection: UniqueId, views: Vec<LeaderView>) -> HashMap<UniqueId, LeaderView> {
        let mut leaders: HashMap<UniqueId, LeaderView> = HashMap::new();
        for view in views {
            let Some(replica) = self
                .meta
                .replicas
                .get_by_collection_and_node(collection, view.node_id)
            else {
                tracing::debug!(node_id = view.node_id, "leader view of node outside replicas dropped");
                continue;
            };
            match leaders.get(&replica.id) {
                Some(kept)
                    if (kept.version, -kept.node_id) >= (view.version, -view.node_id) => {}
                _ => {
                    leaders.insert(replica.id, view);
                }
            }
        }
        leaders
    }
}
