use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    body::Body,
    extract::{Extension, Path, Query, State},
    http::{Request, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::TypedHeader;
use chrono::{Duration, NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::handlers::*;
use availability_cell::models::{ConflictCheckRequest, NextSlotQuery, SlotQuery};
use availability_cell::router::availability_routes;
use shared_config::AppConfig;
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn config_for(mock_server: &MockServer) -> Arc<AppConfig> {
    TestConfig::with_supabase_url(&mock_server.uri()).to_arc()
}

fn bookable_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(7)
}

fn create_auth_header(token: &str) -> TypedHeader<Authorization<Bearer>> {
    TypedHeader(Authorization::bearer(token).unwrap())
}

fn template_rows(therapist_id: Uuid) -> Value {
    let rows: Vec<Value> = (0..7)
        .map(|day| {
            json!({
                "therapist_id": therapist_id,
                "day_of_week": day,
                "enabled": true,
                "start_time": "09:00:00",
                "end_time": "12:00:00",
                "session_duration_minutes": 60,
                "buffer_minutes": 0,
                "max_sessions_per_day": 8
            })
        })
        .collect();
    Value::Array(rows)
}

async fn mount_reads(mock_server: &MockServer, templates: Value, sessions: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/therapist_session_settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapist_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(templates))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_overrides"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sessions))
        .mount(mock_server)
        .await;
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_get_slots_lists_open_slots() {
    let mock_server = MockServer::start().await;
    let therapist_id = Uuid::new_v4();
    mount_reads(&mock_server, template_rows(therapist_id), json!([])).await;

    let date = bookable_date();
    let Json(body) = get_slots(
        State(config_for(&mock_server)),
        Path(therapist_id),
        Query(SlotQuery { start: date, end: None, strict: None }),
    )
    .await
    .unwrap();

    assert_eq!(body["therapist_id"], json!(therapist_id));
    assert_eq!(body["total"], 3);
    assert_eq!(body["slots"][0]["start_time"], "09:00:00");
    assert_eq!(body["slots"][2]["end_time"], "12:00:00");
}

#[tokio::test]
async fn test_strict_slots_for_unknown_therapist_is_not_found() {
    let mock_server = MockServer::start().await;
    mount_reads(&mock_server, json!([]), json!([])).await;

    let date = bookable_date();
    let result = get_slots(
        State(config_for(&mock_server)),
        Path(Uuid::new_v4()),
        Query(SlotQuery { start: date, end: Some(date), strict: Some(true) }),
    )
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reversed_range_is_bad_request() {
    let mock_server = MockServer::start().await;
    let date = bookable_date();

    let result = get_slots(
        State(config_for(&mock_server)),
        Path(Uuid::new_v4()),
        Query(SlotQuery { start: date, end: Some(date - Duration::days(1)), strict: None }),
    )
    .await;

    assert_matches!(result, Err(AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_next_slot_returns_the_first_opening() {
    let mock_server = MockServer::start().await;
    let therapist_id = Uuid::new_v4();
    mount_reads(&mock_server, template_rows(therapist_id), json!([])).await;

    let date = bookable_date();
    let Json(body) = get_next_slot(
        State(config_for(&mock_server)),
        Path(therapist_id),
        Query(NextSlotQuery { from: Some(date) }),
    )
    .await
    .unwrap();

    assert_eq!(body["slot"]["date"], json!(date));
    assert_eq!(body["slot"]["start_time"], "09:00:00");
}

#[tokio::test]
async fn test_conflict_check_with_supplied_sessions() {
    let mock_server = MockServer::start().await;
    let therapist_id = Uuid::new_v4();
    let date = bookable_date();

    let request: ConflictCheckRequest = serde_json::from_value(json!({
        "therapist_id": therapist_id,
        "date": date,
        "start_time": "10:30:00",
        "end_time": "11:30:00",
        "sessions": [{
            "id": Uuid::new_v4(),
            "therapist_id": therapist_id,
            "client_id": null,
            "date": date,
            "start_time": "10:00:00",
            "end_time": "11:00:00",
            "status": "scheduled"
        }]
    }))
    .unwrap();

    let Json(body) = check_conflicts(State(config_for(&mock_server)), Json(request)).await.unwrap();

    assert_eq!(body["conflict"], true);
    assert_eq!(body["conflicting_sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_saving_another_therapists_week_is_forbidden() {
    let mock_server = MockServer::start().await;
    let user = TestUser::therapist("someone@example.com");
    let token = JwtTestUtils::create_test_token(&user, &TestConfig::default().jwt_secret, None);

    let payload = serde_json::from_value(json!({
        "availability": { "monday": { "enabled": true, "start": "09:00", "end": "12:00" } }
    }))
    .unwrap();

    let result = save_availability(
        State(config_for(&mock_server)),
        Path(Uuid::new_v4()),
        create_auth_header(&token),
        Extension(user.to_user()),
        Json(payload),
    )
    .await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_protected_routes_require_a_token() {
    let mock_server = MockServer::start().await;
    let app = availability_routes(config_for(&mock_server));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/sessions/{}/cancel", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_slots_route_is_open() {
    let mock_server = MockServer::start().await;
    let therapist_id = Uuid::new_v4();
    mount_reads(&mock_server, template_rows(therapist_id), json!([])).await;
    let app = availability_routes(config_for(&mock_server));

    let request = Request::builder()
        .method("GET")
        .uri(format!("/therapists/{}/slots?start={}", therapist_id, bookable_date()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 3);
}

#[tokio::test]
async fn test_taken_slot_is_409_with_alternatives() {
    let mock_server = MockServer::start().await;
    let therapist_id = Uuid::new_v4();
    let date = bookable_date();
    mount_reads(
        &mock_server,
        template_rows(therapist_id),
        json!([{
            "id": Uuid::new_v4(),
            "therapist_id": therapist_id,
            "client_id": Uuid::new_v4(),
            "date": date,
            "start_time": "10:00:00",
            "end_time": "11:00:00",
            "status": "scheduled"
        }]),
    )
    .await;

    let client = TestUser::patient("client@example.com");
    let token = JwtTestUtils::create_test_token(&client, &TestConfig::default().jwt_secret, None);
    let app = availability_routes(config_for(&mock_server));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/therapists/{}/sessions", therapist_id))
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "date": date, "start_time": "10:00:00", "end_time": "11:00:00" }).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["details"]["retryable"], true);
    let alternatives: Vec<&str> = body["details"]["alternatives"]
        .as_array()
        .unwrap()
        .iter()
        .map(|slot| slot["start_time"].as_str().unwrap())
        .collect();
    assert_eq!(alternatives, vec!["09:00:00", "11:00:00"]);
}

#[tokio::test]
async fn test_client_cannot_book_for_someone_else() {
    let mock_server = MockServer::start().await;
    let therapist_id = Uuid::new_v4();
    mount_reads(&mock_server, template_rows(therapist_id), json!([])).await;

    let client = TestUser::patient("client@example.com");
    let token = JwtTestUtils::create_test_token(&client, &TestConfig::default().jwt_secret, None);
    let app = availability_routes(config_for(&mock_server));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/therapists/{}/sessions", therapist_id))
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "client_id": Uuid::new_v4(),
                "date": bookable_date(),
                "start_time": "09:00:00",
                "end_time": "10:00:00"
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_app_error_body_carries_details() {
    let response = AppError::Conflict("taken".to_string(), Some(json!({ "retryable": true })))
        .into_response();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "taken");
    assert_eq!(body["details"]["retryable"], true);
}
