//! Classification of failures into connectivity and application errors

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clinicsync_core::ports::{IRemoteStore, RemoteError};

use crate::common;

async fn create_with_status(status: u16, body: serde_json::Value) -> RemoteError {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;

    store
        .create(&common::table("patients"), &json!({"name": "Ana"}))
        .await
        .expect_err("request should fail")
}

#[tokio::test]
async fn test_constraint_violation_is_application_error() {
    let err = create_with_status(
        409,
        json!({
            "code": "23505",
            "details": "Key (phone)=(555-0101) already exists.",
            "hint": null,
            "message": "duplicate key value violates unique constraint \"patients_phone_key\""
        }),
    )
    .await;

    assert!(!err.is_connectivity());
    match err {
        RemoteError::Application {
            status,
            code,
            message,
        } => {
            assert_eq!(status, Some(409));
            assert_eq!(code.as_deref(), Some("23505"));
            assert!(message.contains("duplicate key"));
            assert!(message.contains("already exists"));
        }
        other => panic!("expected application error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_request_is_application_error() {
    let err = create_with_status(400, json!({"message": "null value in column \"name\""})).await;
    assert!(matches!(
        err,
        RemoteError::Application {
            status: Some(400),
            ..
        }
    ));
}

#[tokio::test]
async fn test_internal_server_error_is_application_error() {
    let err = create_with_status(500, json!({"message": "trigger raised"})).await;
    assert!(!err.is_connectivity());
}

#[tokio::test]
async fn test_gateway_errors_are_connectivity_errors() {
    for status in [502_u16, 503, 504, 408, 429] {
        let err = create_with_status(status, json!({"message": "upstream down"})).await;
        assert!(
            matches!(err, RemoteError::Connectivity(_)),
            "status {status} classified as {err:?}"
        );
    }
}

#[tokio::test]
async fn test_non_json_error_body_is_kept_as_message() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
        .mount(&server)
        .await;

    let err = store
        .create(&common::table("patients"), &json!({}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemoteError::Application {
            status: Some(401),
            code: None,
            message: "Invalid API key".into(),
        }
    );
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let store = common::store_for(&server.uri(), Duration::from_millis(200));
    let err = store.probe().await.unwrap_err();

    assert_eq!(err, RemoteError::Timeout(Duration::from_millis(200)));
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_unreachable_server_is_connectivity_error() {
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let store = common::store_for(&uri, Duration::from_secs(1));
    let err = store.probe().await.unwrap_err();

    assert!(err.is_connectivity(), "got {err:?}");
}
