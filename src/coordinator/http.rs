//! HTTP API of the query coordinator
//!
//! Each RPC is a `POST /v1/<operation>` taking and returning JSON. Failures
//! travel in the response `status`, so these routes answer `200 OK` unless
//! the body cannot be parsed. Query nodes report through `/internal/*`.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::coordinator::services::QueryCoord;
use crate::coordinator::types::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub type CoordState = Arc<QueryCoord>;

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Collections and partitions
        .route("/v1/show_collections", post(show_collections))
        .route("/v1/show_partitions", post(show_partitions))
        .route("/v1/load_collection", post(load_collection))
        .route("/v1/release_collection", post(release_collection))
        .route("/v1/load_partitions", post(load_partitions))
        .route("/v1/release_partitions", post(release_partitions))
        .route("/v1/get_partition_states", post(get_partition_states))
        .route("/v1/get_segment_info", post(get_segment_info))
        .route("/v1/sync_new_created_partition", post(sync_new_created_partition))
        .route("/v1/load_balance", post(load_balance))
        // Introspection
        .route("/v1/show_configurations", post(show_configurations))
        .route("/v1/get_metrics", post(get_metrics))
        .route("/v1/get_replicas", post(get_replicas))
        .route("/v1/get_shard_leaders", post(get_shard_leaders))
        .route("/v1/check_health", get(check_health))
        // Resource groups
        .route("/v1/create_resource_group", post(create_resource_group))
        .route("/v1/update_resource_groups", post(update_resource_groups))
        .route("/v1/drop_resource_group", post(drop_resource_group))
        .route("/v1/transfer_node", post(transfer_node))
        .route("/v1/transfer_replica", post(transfer_replica))
        .route("/v1/list_resource_groups", post(list_resource_groups))
        .route("/v1/describe_resource_group", post(describe_resource_group))
        // Query node reports
        .route("/internal/node_up", post(node_up))
        .route("/internal/node_down", post(node_down))
        .route("/internal/node_stopping", post(node_stopping))
        .route("/internal/heartbeat", post(heartbeat))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn show_collections(
    State(coord): State<CoordState>,
    Json(req): Json<ShowCollectionsRequest>,
) -> Json<ShowCollectionsResponse> {
    Json(coord.show_collections(req))
}

async fn show_partitions(
    State(coord): State<CoordState>,
    Json(req): Json<ShowPartitionsRequest>,
) -> Json<ShowPartitionsResponse> {
    Json(coord.show_partitions(req))
}

async fn load_collection(
    State(coord): State<CoordState>,
    Json(req): Json<LoadCollectionRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.load_collection(req).await }))
}

async fn release_collection(
    State(coord): State<CoordState>,
    Json(req): Json<ReleaseCollectionRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.release_collection(req).await }))
}

async fn load_partitions(
    State(coord): State<CoordState>,
    Json(req): Json<LoadPartitionsRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.load_partitions(req).await }))
}

async fn release_partitions(
    State(coord): State<CoordState>,
    Json(req): Json<ReleasePartitionsRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.release_partitions(req).await }))
}

async fn get_partition_states(
    State(coord): State<CoordState>,
    Json(req): Json<GetPartitionStatesRequest>,
) -> Json<GetPartitionStatesResponse> {
    Json(coord.get_partition_states(req))
}

async fn get_segment_info(
    State(coord): State<CoordState>,
    Json(req): Json<GetSegmentInfoRequest>,
) -> Json<GetSegmentInfoResponse> {
    Json(coord.get_segment_info(req))
}

async fn sync_new_created_partition(
    State(coord): State<CoordState>,
    Json(req): Json<SyncNewCreatedPartitionRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.sync_new_created_partition(req).await }))
}

async fn load_balance(
    State(coord): State<CoordState>,
    Json(req): Json<LoadBalanceRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.load_balance(req).await }))
}

async fn show_configurations(
    State(coord): State<CoordState>,
    Json(req): Json<ShowConfigurationsRequest>,
) -> Json<ShowConfigurationsResponse> {
    Json(coord.show_configurations(req))
}

async fn get_metrics(
    State(coord): State<CoordState>,
    Json(req): Json<GetMetricsRequest>,
) -> Json<GetMetricsResponse> {
    Json(coord.get_metrics(req))
}

async fn get_replicas(
    State(coord): State<CoordState>,
    Json(req): Json<GetReplicasRequest>,
) -> Json<GetReplicasResponse> {
    Json(coord.get_replicas(req))
}

async fn get_shard_leaders(
    State(coord): State<CoordState>,
    Json(req): Json<GetShardLeadersRequest>,
) -> Json<GetShardLeadersResponse> {
    Json(coord.get_shard_leaders(req))
}

/// The only route mapping an error to an HTTP status: a node that cannot be
/// probed fails the whole check.
async fn check_health(State(coord): State<CoordState>) -> Response {
    match coord.check_health().await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => (
            e.to_http_status(),
            Json(json!({ "error": e.to_string(), "code": e.code() })),
        )
            .into_response(),
    }
}

async fn create_resource_group(
    State(coord): State<CoordState>,
    Json(req): Json<CreateResourceGroupRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.create_resource_group(req) }))
}

async fn update_resource_groups(
    State(coord): State<CoordState>,
    Json(req): Json<UpdateResourceGroupsRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.update_resource_groups(req) }))
}

async fn drop_resource_group(
    State(coord): State<CoordState>,
    Json(req): Json<DropResourceGroupRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.drop_resource_group(req) }))
}

async fn transfer_node(
    State(coord): State<CoordState>,
    Json(req): Json<TransferNodeRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.transfer_node(req) }))
}

async fn transfer_replica(
    State(coord): State<CoordState>,
    Json(req): Json<TransferReplicaRequest>,
) -> impl IntoResponse {
    Json(json!({ "status": coord.transfer_replica(req) }))
}

async fn list_resource_groups(State(coord): State<CoordState>) -> Json<ListResourceGroupsResponse> {
    Json(coord.list_resource_groups())
}

async fn describe_resource_group(
    State(coord): State<CoordState>,
    Json(req): Json<DescribeResourceGroupRequest>,
) -> Json<DescribeResourceGroupResponse> {
    Json(coord.describe_resource_group(req))
}

async fn node_up(State(coord): State<CoordState>, Json(req): Json<NodeUpRequest>) -> impl IntoResponse {
    Json(json!({ "status": coord.handle_node_up(req) }))
}

async fn node_down(State(coord): State<CoordState>, Json(req): Json<NodeRequest>) -> impl IntoResponse {
    Json(json!({ "status": coord.handle_node_down(req) }))
}

async fn node_stopping(State(coord): State<CoordState>, Json(req): Json<NodeRequest>) -> impl IntoResponse {
    Json(json!({ "status": coord.mark_node_stopping(req) }))
}

async fn heartbeat(State(coord): State<CoordState>, Json(req): Json<HeartbeatRequest>) -> impl IntoResponse {
    Json(json!({ "status": coord.handle_heartbeat(req) }))
}

async fn health_live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "version": crate::VERSION,
            "timestamp": chrono::Utc::now().timestamp(),
        })),
    )
}

async fn health_ready(State(coord): State<CoordState>) -> impl IntoResponse {
    let state = coord.state();
    let ready = state == crate::cluster::StateCode::Healthy;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "ready": ready,
            "state": state.to_string(),
            "query_nodes": coord.stores().nodes.get_all().len(),
        })),
    )
}
