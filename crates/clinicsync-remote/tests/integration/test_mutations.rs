//! Insert, update and delete requests

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use clinicsync_core::domain::newtypes::RecordId;
use clinicsync_core::ports::IRemoteStore;

use crate::common::{self, API_KEY};

#[tokio::test]
async fn test_create_posts_payload_and_returns_row() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/patients"))
        .and(header("apikey", API_KEY))
        .and(header("authorization", format!("Bearer {API_KEY}").as_str()))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({"name": "Ana", "phone": "555-0101"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            {"id": 41, "name": "Ana", "phone": "555-0101"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let row = store
        .create(
            &common::table("patients"),
            &json!({"name": "Ana", "phone": "555-0101"}),
        )
        .await
        .expect("create failed");

    assert_eq!(row["id"], 41);
    assert_eq!(row["name"], "Ana");
}

#[tokio::test]
async fn test_update_patches_single_row_by_id() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.17"))
        .and(body_json(json!({"id": 17, "status": "confirmed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 17, "status": "confirmed", "patient_id": 41}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let row = store
        .update(
            &common::table("appointments"),
            &RecordId::new("17").unwrap(),
            &json!({"id": 17, "status": "confirmed"}),
        )
        .await
        .expect("update failed");

    assert_eq!(row["status"], "confirmed");
    assert_eq!(row["patient_id"], 41);
}

#[tokio::test]
async fn test_update_matching_no_row_returns_null() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let row = store
        .update(
            &common::table("patients"),
            &RecordId::new("missing").unwrap(),
            &json!({"id": "missing", "name": "Ana"}),
        )
        .await
        .expect("update failed");

    assert!(row.is_null());
}

#[tokio::test]
async fn test_delete_by_id() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/inventory"))
        .and(query_param("id", "eq.sku-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "sku-9", "qty": 0}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let row = store
        .delete(&common::table("inventory"), &RecordId::new("sku-9").unwrap())
        .await
        .expect("delete failed");

    assert_eq!(row["id"], "sku-9");
}

#[tokio::test]
async fn test_delete_with_no_content_response() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let row = store
        .delete(&common::table("inventory"), &RecordId::new("1").unwrap())
        .await
        .expect("delete failed");

    assert!(row.is_null());
}
