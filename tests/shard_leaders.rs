//! Shard leader resolution through the coordinator

mod common;

use chrono::Utc;
use common::*;
use querycoord::common::ErrorCode;
use querycoord::coordinator::types::{
    CreateResourceGroupRequest, GetShardLeadersRequest, LoadCollectionRequest, NodeRequest,
};
use querycoord::meta::ResourceGroupConfig;

const COLLECTION: i64 = 100;
const PARTITION: i64 = 10;

async fn loaded(nodes: &[i64], replicas: u32) -> Harness {
    let h = Harness::with_nodes(nodes);
    h.broker
        .set_recovery(COLLECTION, &[CHANNEL_0], &[(1, PARTITION, CHANNEL_0)]);
    h.load_collection(COLLECTION, &[PARTITION], replicas, &[]).await;
    h
}

fn leaders(h: &Harness) -> querycoord::coordinator::types::GetShardLeadersResponse {
    h.coord.get_shard_leaders(GetShardLeadersRequest {
        collection_id: COLLECTION,
    })
}

#[tokio::test]
async fn test_single_leader() {
    let h = loaded(&[1, 2], 1).await;
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);

    let resp = leaders(&h);
    assert!(resp.status.is_success(), "{:?}", resp.status);
    assert_eq!(resp.shards.len(), 1);
    assert_eq!(resp.shards[0].channel_name, CHANNEL_0);
    assert_eq!(resp.shards[0].node_ids, vec![1]);
    assert_eq!(resp.shards[0].node_addrs, vec!["10.0.0.1:21123".to_string()]);
}

#[tokio::test]
async fn test_collection_not_loaded() {
    let h = Harness::with_nodes(&[1]);
    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::CollectionNotLoaded);
    assert!(resp.shards.is_empty());
}

#[tokio::test]
async fn test_collection_not_fully_loaded() {
    let h = Harness::with_nodes(&[1]);
    h.broker.set_partitions(COLLECTION, vec![PARTITION]);
    let status = h
        .coord
        .load_collection(LoadCollectionRequest {
            collection_id: COLLECTION,
            replica_number: 1,
            ..Default::default()
        })
        .await;
    assert!(status.is_success());

    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::CollectionNotFullyLoaded);
}

#[tokio::test]
async fn test_loaded_without_channels_is_recovering() {
    let h = Harness::with_nodes(&[1]);
    h.broker.set_recovery(COLLECTION, &[], &[]);
    h.load_collection(COLLECTION, &[PARTITION], 1, &[]).await;

    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::CollectionRecovering);
}

#[tokio::test]
async fn test_channel_not_subscribed() {
    let h = loaded(&[1], 1).await;

    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::ChannelLack);
    assert!(resp.status.reason.contains("channel not subscribed"));
}

#[tokio::test]
async fn test_offline_leader_filtered() {
    let h = loaded(&[1], 1).await;
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    h.stores
        .nodes
        .set_last_heartbeat(1, Utc::now() - chrono::Duration::seconds(60));

    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::ChannelNotAvailable);
    assert!(resp.status.reason.contains("node offline"), "{}", resp.status.reason);
}

#[tokio::test]
async fn test_stopping_leader_filtered() {
    let h = loaded(&[1, 2], 1).await;
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    h.heartbeat(2, vec![leader_view(2, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    assert!(h.coord.mark_node_stopping(NodeRequest { node_id: 1 }).is_success());

    let resp = leaders(&h);
    assert!(resp.status.is_success());
    assert_eq!(resp.shards[0].node_ids, vec![2]);
}

#[tokio::test]
async fn test_leader_lacking_segment_filtered() {
    let h = loaded(&[1], 1).await;
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[], 1)], vec![]);

    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::ChannelNotAvailable);
    assert!(resp.status.reason.contains("segment lacks"), "{}", resp.status.reason);
}

#[tokio::test]
async fn test_one_leader_per_replica() {
    let h = loaded(&[1, 2], 1).await;
    // same replica: the newer view wins
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    h.heartbeat(2, vec![leader_view(2, COLLECTION, CHANNEL_0, &[1], 2)], vec![]);

    let resp = leaders(&h);
    assert!(resp.status.is_success());
    assert_eq!(resp.shards[0].node_ids, vec![2]);
}

#[tokio::test]
async fn test_equal_versions_prefer_lowest_node() {
    let h = loaded(&[1, 2], 1).await;
    h.heartbeat(2, vec![leader_view(2, COLLECTION, CHANNEL_0, &[1], 3)], vec![]);
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 3)], vec![]);

    let resp = leaders(&h);
    assert_eq!(resp.shards[0].node_ids, vec![1]);
}

#[tokio::test]
async fn test_leaders_of_every_replica() {
    let h = loaded(&[1, 2], 2).await;
    h.heartbeat(2, vec![leader_view(2, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);

    let resp = leaders(&h);
    assert!(resp.status.is_success());
    assert_eq!(resp.shards[0].node_ids, vec![1, 2]);
    assert_eq!(
        resp.shards[0].node_addrs,
        vec!["10.0.0.1:21123".to_string(), "10.0.0.2:21123".to_string()]
    );
}

#[tokio::test]
async fn test_view_outside_replicas_dropped() {
    let h = loaded(&[1], 1).await;
    let status = h.coord.create_resource_group(CreateResourceGroupRequest {
        resource_group: "rg1".into(),
        config: Some(ResourceGroupConfig::with_nodes(1)),
    });
    assert!(status.is_success());
    // joins rg1, which the collection does not use
    h.add_node(3);
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    h.heartbeat(3, vec![leader_view(3, COLLECTION, CHANNEL_0, &[1], 9)], vec![]);

    let resp = leaders(&h);
    assert!(resp.status.is_success());
    assert_eq!(resp.shards[0].node_ids, vec![1]);
}

#[tokio::test]
async fn test_every_channel_resolved() {
    let h = Harness::with_nodes(&[1]);
    h.broker.set_recovery(
        COLLECTION,
        &[CHANNEL_0, CHANNEL_1],
        &[(1, PARTITION, CHANNEL_0), (2, PARTITION, CHANNEL_1)],
    );
    h.load_collection(COLLECTION, &[PARTITION], 1, &[]).await;
    h.heartbeat(
        1,
        vec![
            leader_view(1, COLLECTION, CHANNEL_0, &[1], 1),
            leader_view(1, COLLECTION, CHANNEL_1, &[2], 1),
        ],
        vec![],
    );

    let resp = leaders(&h);
    assert!(resp.status.is_success());
    let channels: Vec<&str> = resp.shards.iter().map(|s| s.channel_name.as_str()).collect();
    assert_eq!(channels, vec![CHANNEL_0, CHANNEL_1]);
}

#[tokio::test]
async fn test_all_leaders_stopping_then_recovered() {
    let h = loaded(&[1, 2, 3], 1).await;
    h.heartbeat(1, vec![leader_view(1, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    h.heartbeat(2, vec![leader_view(2, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    assert!(h.coord.mark_node_stopping(NodeRequest { node_id: 1 }).is_success());
    assert!(h.coord.mark_node_stopping(NodeRequest { node_id: 2 }).is_success());

    let resp = leaders(&h);
    assert_eq!(resp.status.code, ErrorCode::ChannelNotAvailable);
    assert!(resp.status.reason.contains("node is stopping: node=1"), "{}", resp.status.reason);
    assert!(resp.status.reason.contains("node is stopping: node=2"), "{}", resp.status.reason);

    h.heartbeat(3, vec![leader_view(3, COLLECTION, CHANNEL_0, &[1], 1)], vec![]);
    let resp = leaders(&h);
    assert!(resp.status.is_success(), "{:?}", resp.status);
    assert_eq!(resp.shards[0].node_ids, vec![3]);
}
