//! Manual load balance admission

mod common;

use common::*;
use querycoord::common::ErrorCode;
use querycoord::coordinator::types::{LoadBalanceRequest, LoadCollectionRequest, NodeRequest};

const COLLECTION: i64 = 100;
const PARTITION: i64 = 10;

/// One replica over nodes 1..=3; node 1 serves segments 1 and 2 of the
/// target plus segment 3, which the target no longer has.
async fn setup() -> Harness {
    let h = Harness::with_nodes(&[1, 2, 3]);
    h.broker.set_recovery(
        COLLECTION,
        &[CHANNEL_0],
        &[(1, PARTITION, CHANNEL_0), (2, PARTITION, CHANNEL_0)],
    );
    h.load_collection(COLLECTION, &[PARTITION], 1, &[]).await;
    h.heartbeat(
        1,
        vec![leader_view(1, COLLECTION, CHANNEL_0, &[1, 2, 3], 1)],
        vec![
            segment(1, COLLECTION, PARTITION, 1, CHANNEL_0),
            segment(2, COLLECTION, PARTITION, 1, CHANNEL_0),
            segment(3, COLLECTION, PARTITION, 1, CHANNEL_0),
        ],
    );
    h
}

fn request(source: &[i64], dst: &[i64], segments: &[i64]) -> LoadBalanceRequest {
    LoadBalanceRequest {
        collection_id: COLLECTION,
        source_node_ids: source.to_vec(),
        dst_node_ids: dst.to_vec(),
        sealed_segment_ids: segments.to_vec(),
    }
}

#[tokio::test]
async fn test_default_destinations_and_target_filter() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[1], &[], &[])).await;
    assert!(status.is_success(), "{:?}", status);

    let plans = h.balancer.plans();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.source_node, 1);
    assert_eq!(plan.dst_nodes, vec![2, 3]);
    let ids: Vec<i64> = plan.segments.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_explicit_segments_and_destination() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[1], &[3], &[2])).await;
    assert!(status.is_success(), "{:?}", status);

    let plan = &h.balancer.plans()[0];
    assert_eq!(plan.dst_nodes, vec![3]);
    let ids: Vec<i64> = plan.segments.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn test_explicit_segment_outside_target_skipped() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[1], &[], &[3])).await;
    assert!(status.is_success());
    assert!(h.balancer.plans()[0].segments.is_empty());
}

#[tokio::test]
async fn test_exactly_one_source() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[1, 2], &[], &[])).await;
    assert_eq!(status.code, ErrorCode::ParameterInvalid);
    let status = h.coord.load_balance(request(&[], &[], &[])).await;
    assert_eq!(status.code, ErrorCode::ParameterInvalid);
    assert!(h.balancer.plans().is_empty());
}

#[tokio::test]
async fn test_collection_must_be_fully_loaded() {
    let h = Harness::with_nodes(&[1, 2]);
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

    let status = h.coord.load_balance(request(&[1], &[], &[])).await;
    assert_eq!(status.code, ErrorCode::CollectionNotFullyLoaded);
}

#[tokio::test]
async fn test_source_outside_replicas() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[9], &[], &[])).await;
    assert_eq!(status.code, ErrorCode::NodeNotFound);
}

#[tokio::test]
async fn test_stopping_nodes_rejected() {
    let h = setup().await;
    assert!(h.coord.mark_node_stopping(NodeRequest { node_id: 3 }).is_success());

    let status = h.coord.load_balance(request(&[1], &[3], &[])).await;
    assert_eq!(status.code, ErrorCode::NodeStopping);

    // default destinations include the stopping node too
    let status = h.coord.load_balance(request(&[1], &[], &[])).await;
    assert_eq!(status.code, ErrorCode::NodeStopping);

    assert!(h.coord.mark_node_stopping(NodeRequest { node_id: 1 }).is_success());
    let status = h.coord.load_balance(request(&[1], &[2], &[])).await;
    assert_eq!(status.code, ErrorCode::NodeStopping);
}

#[tokio::test]
async fn test_destination_outside_replica() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[1], &[2, 7], &[])).await;
    assert_eq!(status.code, ErrorCode::NodeNotFound);
}

#[tokio::test]
async fn test_segment_not_on_source() {
    let h = setup().await;

    let status = h.coord.load_balance(request(&[1], &[], &[42])).await;
    assert_eq!(status.code, ErrorCode::SegmentNotFound);
}

#[tokio::test]
async fn test_no_other_node_in_replica() {
    let h = Harness::with_nodes(&[1]);
    h.load_collection(COLLECTION, &[PARTITION], 1, &[]).await;

    let status = h.coord.load_balance(request(&[1], &[], &[])).await;
    assert_eq!(status.code, ErrorCode::ParameterInvalid);
}
