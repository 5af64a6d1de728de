//! # Integration Tests for muni-api
//!
//! Drives the assembled router end to end: partial fine payments, reference
//! number uniqueness under concurrency, audit entries for commands,
//! authentication and authorities, spreadsheet export, and health probes.

use std::collections::HashSet;
use std::str::FromStr;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use muni_api::audit::{AuditAction, AuditOutcome};
use muni_api::auth::Module;
use muni_api::state::{AppConfig, AppState};

const SECRET: &str = "s3cret-token";

/// Helper: build the test app with auth disabled, returning the state too.
fn test_app() -> (AppState, axum::Router) {
    let state = AppState::new();
    (state.clone(), muni_api::app(state))
}

/// Helper: build the test app with auth enabled.
fn test_app_with_auth() -> (AppState, axum::Router) {
    let config = AppConfig {
        auth_token: Some(SECRET.to_string()),
        ..AppConfig::default()
    };
    let state = AppState::with_config(config);
    (state.clone(), muni_api::app(state))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_token(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

/// Helper: read response body as JSON.
async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn dec(v: &Value) -> Decimal {
    match v {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

fn taxpayer_body(tax_id: &str) -> Value {
    json!({
        "tax_id": tax_id,
        "first_name": "Ana",
        "last_name": "Pérez",
        "address": "Calle 1 # 2-3",
        "email": "ana@example.com"
    })
}

fn fine_body(taxpayer_id: &str, amount: &str) -> Value {
    json!({
        "taxpayer_id": taxpayer_id,
        "infraction": "LATE_PAYMENT",
        "description": "Pago fuera de plazo",
        "amount": amount,
        "due_date": "2099-12-31T00:00:00Z"
    })
}

async fn create_taxpayer(app: &axum::Router, tax_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/tributario/contribuyentes",
            taxpayer_body(tax_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["id"].as_str().unwrap().to_string()
}

async fn create_fine(app: &axum::Router, taxpayer_id: &str, amount: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/multas", fine_body(taxpayer_id, amount)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

async fn pay_fine(app: &axum::Router, fine_id: &str, amount: &str) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(json_request(
            "PUT",
            &format!("/multas/{fine_id}/pagar"),
            json!({ "amount": amount }),
        ))
        .await
        .unwrap()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let (_, app) = test_app();
    let response = app.oneshot(get("/health/liveness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe_without_database() {
    let (_, app) = test_app();
    let response = app.oneshot(get("/health/readiness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn test_health_probes_skip_auth() {
    let (_, app) = test_app_with_auth();
    let response = app.oneshot(get("/health/liveness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Fines ----------------------------------------------------------------------

#[tokio::test]
async fn test_fine_partial_payments_settle_then_reject_overpayment() {
    let (_, app) = test_app();
    let taxpayer = create_taxpayer(&app, "J-30000001-1").await;
    let fine = create_fine(&app, &taxpayer, "100.00").await;
    let fine_id = fine["id"].as_str().unwrap().to_string();
    assert_eq!(fine["status"], "PENDING");
    assert!(fine["number"].as_str().unwrap().starts_with("MUL-"));

    let response = pay_fine(&app, &fine_id, "60.00").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "PARTIALLY_PAID");
    assert_eq!(dec(&body["balance"]), Decimal::new(4000, 2));

    let response = pay_fine(&app, &fine_id, "40.00").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "PAID");
    assert_eq!(dec(&body["balance"]), Decimal::ZERO);
    assert!(body["paid_at"].is_string());

    let response = pay_fine(&app, &fine_id, "0.01").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    // The rejected payment left the fine untouched.
    let response = app.oneshot(get(&format!("/multas/{fine_id}"))).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "PAID");
    assert_eq!(dec(&body["amount_paid"]), Decimal::new(10000, 2));
}

#[tokio::test]
async fn test_payment_above_balance_is_rejected() {
    let (_, app) = test_app();
    let taxpayer = create_taxpayer(&app, "J-30000002-2").await;
    let fine = create_fine(&app, &taxpayer, "50.00").await;
    let response = pay_fine(&app, fine["id"].as_str().unwrap(), "50.01").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_fine_for_unknown_taxpayer_is_not_found() {
    let (state, app) = test_app();
    let response = app
        .oneshot(json_request(
            "POST",
            "/multas",
            fine_body("00000000-0000-0000-0000-000000000000", "10.00"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(state.fines.is_empty());
}

#[tokio::test]
async fn test_concurrent_fines_get_distinct_numbers() {
    let (state, app) = test_app();
    let taxpayer = create_taxpayer(&app, "J-30000003-3").await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let app = app.clone();
        let taxpayer = taxpayer.clone();
        handles.push(tokio::spawn(async move {
            let response = app
                .oneshot(json_request("POST", "/multas", fine_body(&taxpayer, "15.00")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
            body_json(response).await["number"]
                .as_str()
                .unwrap()
                .to_string()
        }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
        assert!(numbers.insert(handle.await.unwrap()), "duplicate fine number");
    }
    assert_eq!(numbers.len(), 20);
    assert_eq!(state.fines.len(), 20);
}

// -- Audit Log ------------------------------------------------------------------

#[tokio::test]
async fn test_commands_are_audited_reads_are_not() {
    let (state, app) = test_app();
    let taxpayer = create_taxpayer(&app, "J-30000004-4").await;
    let fine = create_fine(&app, &taxpayer, "20.00").await;
    let fine_id = fine["id"].as_str().unwrap();
    let before = state.audit_log.len();

    let response = app.clone().oneshot(get("/multas")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.audit_log.len(), before, "GET must not be audited");

    let created = state
        .audit_log
        .find(|e| e.module == Module::Fines && e.action == AuditAction::Create)
        .unwrap();
    assert_eq!(created.outcome, AuditOutcome::Success);
    assert_eq!(created.entity_id.map(|id| id.to_string()).as_deref(), Some(fine_id));
    assert_eq!(created.ip_address, "unknown");

    let response = pay_fine(&app, fine_id, "999.00").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let failed = state
        .audit_log
        .find(|e| e.module == Module::Fines && e.outcome == AuditOutcome::Error)
        .unwrap();
    assert_eq!(failed.action, AuditAction::Update);
    assert!(failed.error_message.is_some());
}

#[tokio::test]
async fn test_audit_ip_comes_from_forwarded_header() {
    let (state, app) = test_app();
    let mut request = json_request(
        "POST",
        "/tributario/contribuyentes",
        taxpayer_body("J-30000005-5"),
    );
    request.headers_mut().insert(
        "x-forwarded-for",
        "203.0.113.7, 10.0.0.1".parse().unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let entry = state
        .audit_log
        .find(|e| e.module == Module::Taxpayers)
        .unwrap();
    assert_eq!(entry.ip_address, "203.0.113.7");
}

#[tokio::test]
async fn test_audit_logs_are_listed_newest_first() {
    let (_, app) = test_app();
    create_taxpayer(&app, "J-30000006-6").await;
    create_taxpayer(&app, "J-30000007-7").await;
    let response = app
        .oneshot(get("/auditoria/logs?module=CONTRIBUYENTES"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 2);
    let items = body["items"].as_array().unwrap();
    assert!(items[0]["occurred_at"].as_str() >= items[1]["occurred_at"].as_str());
}

#[tokio::test]
async fn test_chain_verification_requires_database() {
    let (_, app) = test_app();
    let response = app.oneshot(get("/auditoria/verificar")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// -- Authentication and Authorities --------------------------------------------

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (_, app) = test_app_with_auth();
    let response = app.oneshot(get("/multas")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (_, app) = test_app_with_auth();
    let response = app
        .oneshot(with_token(get("/multas"), "not-the-secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_secret_is_accepted() {
    let (_, app) = test_app_with_auth();
    let response = app
        .oneshot(with_token(get("/multas"), SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_user_without_authority_is_forbidden() {
    let (state, app) = test_app_with_auth();

    // A role that may only read fines.
    let response = app
        .clone()
        .oneshot(with_token(
            json_request(
                "POST",
                "/roles",
                json!({ "name": "Consulta multas", "permissions": ["MULTAS_READ"] }),
            ),
            SECRET,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let role_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(with_token(
            json_request(
                "POST",
                "/personal",
                json!({
                    "first_names": "Luis",
                    "last_names": "Gomez",
                    "document_type": "CC",
                    "document": "1020304050",
                    "role_id": role_id
                }),
            ),
            SECRET,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let username = body["credentials"]["username"].as_str().unwrap().to_string();
    assert_eq!(username, "luis.gomez@municipio.local");
    let password = body["credentials"]["password"].as_str().unwrap().to_string();
    let token = format!("{username}:{password}");

    // The shared secret does not stand in for the user's password.
    let response = app
        .clone()
        .oneshot(with_token(get("/multas"), &format!("{username}:{SECRET}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(with_token(get("/multas"), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(with_token(get("/tasas"), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let before = state.audit_log.len();
    let response = app
        .oneshot(with_token(
            json_request(
                "POST",
                "/multas",
                fine_body("00000000-0000-0000-0000-000000000000", "10.00"),
            ),
            &token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let entry = state
        .audit_log
        .find(|e| e.username == username && e.outcome == AuditOutcome::Error)
        .unwrap();
    assert_eq!(entry.personnel_document.as_deref(), Some("1020304050"));
    assert_eq!(state.audit_log.len(), before + 1);
}

// -- Export and OpenAPI ---------------------------------------------------------

#[tokio::test]
async fn test_taxpayer_export_is_a_workbook() {
    let (state, app) = test_app();
    create_taxpayer(&app, "J-30000008-8").await;
    let response = app
        .oneshot(get("/tributario/contribuyentes/export"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        muni_api::export::XLSX_CONTENT_TYPE
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(".xlsx"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    // xlsx files are zip archives.
    assert_eq!(&bytes[..2], b"PK");
    assert!(state
        .audit_log
        .any(|e| e.action == AuditAction::Export && e.outcome == AuditOutcome::Success));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (_, app) = test_app();
    let response = app.oneshot(get("/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/multas/{id}/pagar"].is_object());
}
