//! Mock HTTP tests for RpcClient.
//!
//! These tests cover:
//! - Request formatting (method name and params in the body)
//! - Envelope decoding, success and failure
//! - Image payload verification (length and digest)
//! - Transport failures

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use depthgate::rpc::{ClientError, RpcClient, RPC_PATH};
use depthgate::session::ErrorKind;

fn image_payload(bytes: &[u8], digest: &str) -> serde_json::Value {
    json!({
        "format": "PNG",
        "width": 2,
        "height": 1,
        "channels": 3,
        "dtype": "uint8",
        "byte_length": bytes.len(),
        "sha256": digest,
        "data": STANDARD.encode(bytes),
        "sequence": 7
    })
}

async fn client_for(server: &MockServer) -> RpcClient {
    RpcClient::with_base_url(server.uri()).unwrap()
}

// === Request formatting ===

#[tokio::test]
async fn test_capture_sends_method_and_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(body_partial_json(json!({
            "method": "get_capture",
            "params": { "timeout_ms": 250 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "captured",
            "payload": {
                "sequence": 3,
                "device_timestamp_usec": 100000,
                "captured_at_ms": 1700000000000u64,
                "color_shape": [720, 1280, 4],
                "depth_shape": [576, 640],
                "ir_shape": [576, 640]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let summary = client_for(&server).await.get_capture(250).await.unwrap();
    assert_eq!(summary.sequence, 3);
    assert_eq!(summary.depth_shape, Some(vec![576, 640]));
}

#[tokio::test]
async fn test_depth_params_serialized() {
    let server = MockServer::start().await;
    let bytes = [1u8, 2, 3, 4, 5, 6];
    let digest = hex::encode(Sha256::digest(bytes));
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "get_depth_image",
            "params": { "format": "COLORMAP", "min_depth": 500, "max_depth": 3000 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "ok",
            "payload": image_payload(&bytes, &digest)
        })))
        .expect(1)
        .mount(&server)
        .await;

    let image = client_for(&server)
        .await
        .get_depth_image("COLORMAP", 500, 3000)
        .await
        .unwrap();
    assert_eq!(image.bytes, bytes);
    assert_eq!(image.sequence, 7);
}

// === Envelope handling ===

#[tokio::test]
async fn test_failed_envelope_becomes_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "device already connected",
            "error": "AlreadyConnected",
            "payload": null
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .device_connect(json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::AlreadyConnected));
    assert_eq!(err.to_string(), "device already connected");
}

#[tokio::test]
async fn test_failed_envelope_without_kind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "no frame yet"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .get_latest_capture()
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote { kind: None, .. }));
}

#[tokio::test]
async fn test_unrecognized_error_kind_stays_remote() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "sensor overheated",
            "error": "ThermalShutdown",
            "payload": null
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.device_start().await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Unknown));
    assert_eq!(err.to_string(), "sensor overheated");
}

#[tokio::test]
async fn test_non_envelope_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_missing_payload_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "pong"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_http_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = client_for(&server).await.device_start().await.unwrap_err();
    assert!(matches!(err, ClientError::Http(_)));
    assert!(err.kind().is_none());
}

// === Payload integrity ===

#[tokio::test]
async fn test_digest_mismatch_rejected() {
    let server = MockServer::start().await;
    let bytes = [9u8, 9, 9, 9, 9, 9];
    let wrong = hex::encode(Sha256::digest(b"something else"));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "ok",
            "payload": image_payload(&bytes, &wrong)
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .get_color_image("PNG", 95)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Payload(_)));
}

#[tokio::test]
async fn test_length_mismatch_rejected() {
    let server = MockServer::start().await;
    let bytes = [1u8, 2, 3];
    let digest = hex::encode(Sha256::digest(bytes));
    let mut payload = image_payload(&bytes, &digest);
    payload["byte_length"] = json!(4);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "ok",
            "payload": payload
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .get_ir_image("RAW")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Payload(_)));
}

// === Transport ===

#[tokio::test]
async fn test_slow_capture_outlasts_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "get_capture" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(800))
                .set_body_json(json!({
                    "success": true,
                    "message": "captured",
                    "payload": {
                        "sequence": 1,
                        "device_timestamp_usec": 0,
                        "captured_at_ms": 0,
                        "color_shape": null,
                        "depth_shape": [576, 640],
                        "ir_shape": null
                    }
                })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "ping" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(800))
                .set_body_json(json!({
                    "success": true,
                    "message": "pong",
                    "payload": { "pong": true, "version": "test" }
                })),
        )
        .mount(&server)
        .await;

    let client = RpcClient::with_timeout(server.uri(), Duration::from_millis(300)).unwrap();
    let summary = client.get_capture(1000).await.unwrap();
    assert_eq!(summary.sequence, 1);

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Http(_)));
}


#[tokio::test]
async fn test_connection_refused_is_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = RpcClient::new("127.0.0.1", port).unwrap();
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Http(_)));
}
