use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dentist_cell::models::SlotRangeQuery;
use dentist_cell::router::dentist_routes;
use dentist_cell::services::slots::SlotGenerator;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockRows, TestConfig, TestUser};

fn test_config(mock_server: &MockServer) -> TestConfig {
    TestConfig::with_database_url(&mock_server.uri())
}

async fn create_test_app(config: AppConfig) -> Router {
    dentist_routes(Arc::new(config))
}

async fn mount_schedule_mocks(mock_server: &MockServer, dentist_id: &str, appointments: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/working_hours"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::working_hours(dentist_id, 1, "09:00:00", "12:00:00", 30)
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_exceptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(appointments))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn derives_open_slots_for_range() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();
    mount_schedule_mocks(&mock_server, &dentist_id.to_string(), json!([])).await;

    let config = test_config(&mock_server).to_app_config();
    let generator = SlotGenerator::new(&config);

    let query = SlotRangeQuery {
        from: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
        to: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
        after: None,
        limit: None,
        include_taken: None,
    };

    let slots = generator
        .slots_for_range(dentist_id, &query, "test-token")
        .await
        .expect("slot derivation should succeed");

    assert_eq!(slots.len(), 6);
}

#[tokio::test]
async fn booked_appointment_is_subtracted_from_open_slots() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();
    mount_schedule_mocks(
        &mock_server,
        &dentist_id.to_string(),
        json!([
            {
                "starts_at": "2030-01-07T09:00:00Z",
                "ends_at": "2030-01-07T09:30:00Z",
                "status": "confirmed"
            }
        ]),
    )
    .await;

    let config = test_config(&mock_server).to_app_config();
    let generator = SlotGenerator::new(&config);

    let query = SlotRangeQuery {
        from: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
        to: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
        after: None,
        limit: None,
        include_taken: None,
    };

    let slots = generator
        .slots_for_range(dentist_id, &query, "test-token")
        .await
        .expect("slot derivation should succeed");

    assert_eq!(slots.len(), 5);
    assert!(slots.iter().all(|s| s.starts_at.to_rfc3339() != "2030-01-07T09:00:00+00:00"));
}

#[tokio::test]
async fn after_cursor_restarts_the_sequence() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();
    mount_schedule_mocks(&mock_server, &dentist_id.to_string(), json!([])).await;

    let config = test_config(&mock_server).to_app_config();
    let generator = SlotGenerator::new(&config);

    let first_page = generator
        .slots_for_range(
            dentist_id,
            &SlotRangeQuery {
                from: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                to: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                after: None,
                limit: Some(2),
                include_taken: None,
            },
            "test-token",
        )
        .await
        .unwrap();
    assert_eq!(first_page.len(), 2);

    let second_page = generator
        .slots_for_range(
            dentist_id,
            &SlotRangeQuery {
                from: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                to: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                after: Some(first_page[1].starts_at),
                limit: None,
                include_taken: None,
            },
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(second_page.len(), 4);
    assert!(second_page[0].starts_at > first_page[1].starts_at);
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();

    let config = test_config(&mock_server).to_app_config();
    let generator = SlotGenerator::new(&config);

    let result = generator
        .slots_for_range(
            dentist_id,
            &SlotRangeQuery {
                from: NaiveDate::from_ymd_opt(2030, 1, 8).unwrap(),
                to: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                after: None,
                limit: None,
                include_taken: None,
            },
            "test-token",
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn slots_endpoint_requires_authentication() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);
    let app = create_test_app(config.to_app_config()).await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/{}/slots?from=2030-01-07&to=2030-01-07", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn slots_endpoint_returns_open_slots() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();
    mount_schedule_mocks(&mock_server, &dentist_id.to_string(), json!([])).await;

    let config = test_config(&mock_server);
    let token = JwtTestUtils::create_test_token(
        &TestUser::patient("patient@example.com"),
        &config.jwt_secret,
        None,
    );
    let app = create_test_app(config.to_app_config()).await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/{}/slots?from=2030-01-07&to=2030-01-07", dentist_id))
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["slots"].as_array().unwrap().len(), 6);
    assert!(payload["next_after"].is_string());
}

#[tokio::test]
async fn create_working_hours_rejects_patients() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();

    let config = test_config(&mock_server);
    let token = JwtTestUtils::create_test_token(
        &TestUser::patient("patient@example.com"),
        &config.jwt_secret,
        None,
    );
    let app = create_test_app(config.to_app_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/working-hours", dentist_id))
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "day_of_week": 1,
                "start_time": "09:00:00",
                "end_time": "12:00:00",
                "slot_minutes": 30
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_working_hours_validates_window() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();

    let config = test_config(&mock_server);
    let token = JwtTestUtils::create_test_token(
        &TestUser::staff("staff@example.com"),
        &config.jwt_secret,
        None,
    );
    let app = create_test_app(config.to_app_config()).await;

    // Start after end: rejected before any storage call is made.
    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/working-hours", dentist_id))
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "day_of_week": 1,
                "start_time": "12:00:00",
                "end_time": "09:00:00",
                "slot_minutes": 30
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn overlapping_working_hours_are_rejected() {
    let mock_server = MockServer::start().await;
    let dentist_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/working_hours"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::working_hours(&dentist_id.to_string(), 1, "09:00:00", "12:00:00", 30)
        ])))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server);
    let token = JwtTestUtils::create_test_token(
        &TestUser::staff("staff@example.com"),
        &config.jwt_secret,
        None,
    );
    let app = create_test_app(config.to_app_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/working-hours", dentist_id))
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "day_of_week": 1,
                "start_time": "11:00:00",
                "end_time": "13:00:00",
                "slot_minutes": 30
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
