mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::{json, Value};

fn volume_body(nota_fiscal_id: &str, numero: i32, total: i32) -> Value {
    json!({
        "nota_fiscal_id": nota_fiscal_id,
        "numero_nf": "9001",
        "volume_numero": numero,
        "total_volumes": total,
        "altura_cm": 50.0,
        "largura_cm": 40.0,
        "comprimento_cm": 35.0
    })
}

#[tokio::test]
async fn health_reports_store_status() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");

    app.store.set_down(true);
    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["store"], "down");
}

#[tokio::test]
async fn create_fetch_and_list_volumes() {
    let app = TestApp::new();

    let (status, body) = app
        .request(Method::POST, "/api/v1/volumes", Some(volume_body("nf-api-1", 1, 2)))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "gerada");
    assert_eq!(body["data"]["cubagem_m3"], 0.07);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let codigo = body["data"]["codigo"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/volumes/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["codigo"], codigo.as_str());

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/volumes/by-code/{codigo}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());

    let (_, body) = app
        .request(Method::GET, "/api/v1/volumes?nota_fiscal_id=nf-api-1", None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_volume_is_a_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .request(Method::POST, "/api/v1/volumes", Some(volume_body("nf-api-2", 3, 2)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");
}

#[tokio::test]
async fn illegal_transition_is_a_conflict_with_details() {
    let app = TestApp::new();
    let (_, body) = app
        .request(Method::POST, "/api/v1/volumes", Some(volume_body("nf-api-3", 1, 1)))
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/volumes/{id}/transitions"),
            Some(json!({ "event": "ship" })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["details"]["current"], "gerada");
    assert_eq!(body["details"]["requested"], "expedida");
}

#[tokio::test]
async fn print_store_and_release_over_http() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/labels/print",
            Some(json!({
                "volume": volume_body("nf-api-4", 1, 2),
                "siblings": [volume_body("nf-api-4", 2, 2)],
                "format": "100x150"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "printed");
    let volumes = body["data"]["updated_volumes"].as_array().unwrap();
    assert_eq!(volumes.len(), 2);
    let id = volumes[0]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/positions",
            Some(json!({ "posicao": "P-01", "area": "04" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/positions/P-01/assign",
            Some(json!({ "volume_id": id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["volume"]["status"], "armazenada");
    assert_eq!(body["data"]["position"]["ocupada"], true);

    let other = volumes[1]["id"].as_str().unwrap().to_string();
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/positions/P-01/assign",
            Some(json!({ "volume_id": other })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["details"]["occupant"], id.as_str());

    let (status, body) = app
        .request(Method::POST, "/api/v1/positions/P-01/release", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ocupada"], false);
}

#[tokio::test]
async fn second_print_asks_for_confirmation() {
    let app = TestApp::new();
    let request = json!({
        "volume": volume_body("nf-api-5", 1, 1),
    });
    let (status, _) = app
        .request(Method::POST, "/api/v1/labels/print", Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(Method::POST, "/api/v1/labels/print", Some(request))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["outcome"], "needs_confirmation");
    assert_eq!(body["data"]["existing_count"], 1);
}

#[tokio::test]
async fn partial_commit_answers_multi_status() {
    let app = TestApp::new();
    let failing = uuid::Uuid::new_v4();
    app.store.fail_writes_for(failing);
    let mut second = volume_body("nf-api-6", 2, 2);
    second["id"] = json!(failing);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/labels/print",
            Some(json!({
                "volume": volume_body("nf-api-6", 1, 2),
                "siblings": [second],
            })),
        )
        .await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["details"]["failed"], json!([failing]));
    assert_eq!(body["details"]["succeeded"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_volume_is_not_found() {
    let app = TestApp::new();
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/volumes/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], Value::Null);
    assert!(body["message"].as_str().unwrap().contains("not found"));
}
