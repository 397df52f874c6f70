//! HTTP routing, request ids and status mapping

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use querycoord::cluster::StateCode;
use querycoord::common::tracing_middleware::REQUEST_ID_HEADER;
use querycoord::coordinator::http::create_router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(h: &Harness, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = create_router(h.coord.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let request_id = resp
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body, request_id)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_liveness_and_readiness() {
    let h = Harness::new();

    let (status, body, _) = send(&h, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alive"], true);

    let (status, body, _) = send(&h, get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    h.coord.set_state(StateCode::StandBy);
    let (status, body, _) = send(&h, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["state"], "StandBy");
}

#[tokio::test]
async fn test_request_id_minted_or_echoed() {
    let h = Harness::new();

    let (_, _, minted) = send(&h, get("/health/live")).await;
    assert!(minted.is_some_and(|id| !id.is_empty()));

    let req = Request::builder()
        .uri("/health/live")
        .header(REQUEST_ID_HEADER, "req-42")
        .body(Body::empty())
        .unwrap();
    let (_, _, echoed) = send(&h, req).await;
    assert_eq!(echoed.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn test_load_then_show_over_http() {
    let h = Harness::with_nodes(&[1]);
    h.broker.set_partitions(100, vec![10]);
    h.broker.set_recovery(100, &[CHANNEL_0], &[]);

    let (status, body, _) = send(
        &h,
        post("/v1/load_collection", json!({"collection_id": 100, "replica_number": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["code"], "success");

    let (status, body, _) = send(&h, post("/v1/show_collections", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["code"], "success");
    assert_eq!(body["collection_ids"], json!([100]));
    assert_eq!(body["in_memory_percentages"], json!([0]));
}

#[tokio::test]
async fn test_failures_travel_in_status() {
    let h = Harness::new();

    let (status, body, _) = send(
        &h,
        post("/v1/describe_resource_group", json!({"resource_group": "missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["code"], "resource_group_not_found");

    let req = Request::builder()
        .method("POST")
        .uri("/v1/show_collections")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, _) = send(&h, req).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_check_health_unreachable_node() {
    let h = Harness::with_nodes(&[1, 2]);

    let (status, body, _) = send(&h, get("/v1/check_health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_healthy"], true);

    h.cluster.set_unreachable(2);
    let (status, body, _) = send(&h, get("/v1/check_health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "transport");
    assert!(body["error"].as_str().unwrap().contains("QueryNode=2"));
}

#[tokio::test]
async fn test_node_reports() {
    let h = Harness::new();

    let (_, body, _) = send(
        &h,
        post(
            "/internal/node_up",
            json!({"node_id": 5, "address": "10.0.0.5:21123", "hostname": "querynode-5"}),
        ),
    )
    .await;
    assert_eq!(body["status"]["code"], "success");
    assert!(h.stores.nodes.get(5).is_some());

    let (_, body, _) = send(&h, post("/internal/node_down", json!({"node_id": 9}))).await;
    assert_eq!(body["status"]["code"], "node_not_found");

    let (_, body, _) = send(&h, post("/internal/node_down", json!({"node_id": 5}))).await;
    assert_eq!(body["status"]["code"], "success");
    assert!(h.stores.nodes.get(5).is_none());
}
