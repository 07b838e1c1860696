//! Integration tests for the HTTP API.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{device, harness, settle, test_app};
use wagate::client::ClientEvent;
use wagate::store::Caller;

fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[tokio::test]
async fn test_livez() {
    let h = harness();
    let app = test_app(&h);

    let response = app
        .oneshot(Request::get("/livez").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn test_readyz_reports_session_count() {
    let h = harness();
    let app = test_app(&h);

    let response = app
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_sessions"], 0);
}

#[tokio::test]
async fn test_version() {
    let h = harness();
    let app = test_app(&h);

    let response = app
        .oneshot(Request::get("/version").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["name"], "wagate");
    assert!(json["version"].is_string());
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let h = harness();
    let app = test_app(&h);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/send",
            None,
            serde_json::json!({"recipient": "628123", "message": "hi"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_tokens_are_unauthorized() {
    let h = harness();
    let app = test_app(&h);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/send",
            Some("nope"),
            serde_json::json!({"recipient": "628123", "message": "hi"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn foreign_devices_read_as_not_found() {
    let h = harness();
    h.store.insert_device(device("d1", "u1"));
    h.store.insert_token(
        "key-other",
        Caller::Account {
            user_id: "u2".to_string(),
        },
    );
    let app = test_app(&h);

    let response = app
        .oneshot(
            Request::get("/api/v1/devices/d1/status")
                .header("authorization", "Bearer key-other")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Device Lifecycle
// ============================================================================

#[tokio::test]
async fn connect_status_qr_disconnect_round_trip() {
    let h = harness();
    h.store.insert_device(device("d1", "u1"));
    h.store.insert_token(
        "key-u1",
        Caller::Account {
            user_id: "u1".to_string(),
        },
    );
    let app = test_app(&h);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/devices/d1/connect",
            Some("key-u1"),
            serde_json::json!({"name": "Phone A"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["device_id"], "d1");
    assert_eq!(json["status"], "initializing");

    // Drive the fake through a pairing challenge.
    let driver = h.factory.driver("d1").await.unwrap();
    driver
        .emit(ClientEvent::Qr {
            challenge: "challenge-1".to_string(),
        })
        .await;
    settle().await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/v1/devices/d1/status")
                .header("authorization", "Bearer key-u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(json_body(response).await["status"], "scanning");

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/v1/devices/d1/qr")
                .header("authorization", "Bearer key-u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(json_body(response).await["qr"], "challenge-1");

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/v1/devices/d1/disconnect")
                .header("authorization", "Bearer key-u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "disconnected");
}

#[tokio::test]
async fn connect_unknown_device_is_not_found() {
    let h = harness();
    h.store.insert_token(
        "key-u1",
        Caller::Account {
            user_id: "u1".to_string(),
        },
    );
    let app = test_app(&h);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/devices/ghost/connect",
            Some("key-u1"),
            serde_json::json!({"name": "Ghost"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Send Endpoint
// ============================================================================

#[tokio::test]
async fn send_through_connected_device() {
    let h = harness();
    h.store.insert_device(device("d1", "u1"));
    h.store.insert_token(
        "device-token",
        Caller::Device {
            device_id: "d1".to_string(),
            user_id: "u1".to_string(),
        },
    );
    h.manager.connect("d1", "Phone A", None).await.unwrap();
    let driver = h.factory.driver("d1").await.unwrap();
    driver.emit(ClientEvent::Ready { phone: None }).await;
    settle().await;

    let app = test_app(&h);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/send",
            Some("device-token"),
            serde_json::json!({"recipient": "628123", "message": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["device_id"], "d1");
    assert_eq!(json["recipient"], "628123");
    assert_eq!(json["status"], "sent");
    assert!(json["message_id"].is_string());
}

#[tokio::test]
async fn send_without_connected_device_conflicts() {
    let h = harness();
    h.store.insert_device(device("d1", "u1"));
    h.store.insert_token(
        "key-u1",
        Caller::Account {
            user_id: "u1".to_string(),
        },
    );
    let app = test_app(&h);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/send",
            Some("key-u1"),
            serde_json::json!({"recipient": "628123", "message": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn empty_message_is_a_bad_request() {
    let h = harness();
    h.store.insert_device(device("d1", "u1"));
    h.store.insert_token(
        "device-token",
        Caller::Device {
            device_id: "d1".to_string(),
            user_id: "u1".to_string(),
        },
    );
    let app = test_app(&h);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/send",
            Some("device-token"),
            serde_json::json!({"recipient": "628123", "message": "  "}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
