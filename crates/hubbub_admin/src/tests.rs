use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use tower::ServiceExt;

use hubbub_broker::engine::{Broker, SharedBroker};
use hubbub_broker::message::EventMessage;
use hubbub_config::{BackpressurePolicy, BrokerSettings};

use super::router;

fn test_broker() -> SharedBroker {
    Arc::new(Mutex::new(Broker::new(BrokerSettings {
        max_queue_size: 1000,
        ring_buffer_size: 100,
        backpressure_policy: BackpressurePolicy::DropOldest,
    })))
}

async fn body_json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_service_info_and_health() {
    let broker = test_broker();
    broker.lock().unwrap().create_topic("orders").unwrap();

    let resp = router(broker.clone(), false).oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let info = body_json(resp).await;
    assert_eq!(info["service"], "hubbub");
    assert!(info["uptime_sec"].is_u64());

    let resp = router(broker, false).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health = body_json(resp).await;
    assert_eq!(health["topics"], 1);
    assert_eq!(health["subscribers"], 0);
}

#[tokio::test]
async fn test_create_topic_success_conflict_and_bad_request() {
    let broker = test_broker();

    let resp = router(broker.clone(), false)
        .oneshot(post_json("/topics", json!({"name": "orders"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "created");
    assert_eq!(body["topic"], "orders");

    let resp = router(broker.clone(), false)
        .oneshot(post_json("/topics", json!({"name": "orders"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = router(broker.clone(), false)
        .oneshot(post_json("/topics", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = router(broker, false)
        .oneshot(post_json("/topics", json!({"name": "   "})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_topics_is_name_sorted() {
    let broker = test_broker();
    {
        let mut broker = broker.lock().unwrap();
        broker.create_topic("orders").unwrap();
        broker.create_topic("alerts").unwrap();
    }

    let resp = router(broker, false).oneshot(get("/topics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(
        body["topics"],
        json!([
            {"name": "alerts", "subscribers": 0},
            {"name": "orders", "subscribers": 0},
        ])
    );
}

#[tokio::test]
async fn test_stats_reports_message_counts() {
    let broker = test_broker();
    {
        let mut broker = broker.lock().unwrap();
        broker.create_topic("orders").unwrap();
        broker
            .publish(
                "orders",
                EventMessage {
                    id: "7c9e6679-7425-40de-944b-e07fc1f90ae7".to_string(),
                    payload: json!({"o": 1}),
                },
            )
            .unwrap();
    }

    let resp = router(broker, false).oneshot(get("/stats")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["topics"]["orders"]["messages"], 1);
    assert_eq!(body["topics"]["orders"]["subscribers"], 0);
}

#[tokio::test]
async fn test_delete_topic_success_and_not_found() {
    let broker = test_broker();
    broker.lock().unwrap().create_topic("orders").unwrap();

    let resp = router(broker.clone(), false)
        .oneshot(delete("/topics/orders"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "deleted");
    assert_eq!(body["topic"], "orders");

    let resp = router(broker, false)
        .oneshot(delete("/topics/orders"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_path_is_mapped_404() {
    let broker = test_broker();
    let resp = router(broker, false)
        .oneshot(get("/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "Endpoint not found");
}
