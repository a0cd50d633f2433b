// libs/appointment-cell/tests/availability_test.rs
//
// Availability calculation against a mocked appointment store.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::SchedulingError;
use appointment_cell::services::availability::AvailabilityService;
use shared_config::{AppConfig, SchedulingPolicy};

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

fn test_config(mock_url: &str, horizon_days: i64) -> AppConfig {
    AppConfig {
        supabase_url: mock_url.to_string(),
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_jwt_secret: "test-jwt-secret".to_string(),
        scheduling: SchedulingPolicy {
            work_start_hour: 9,
            work_end_hour: 17,
            slot_minutes: 30,
            horizon_days,
        },
    }
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn appointment_json(doctor_id: Uuid, start_at: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "id": Uuid::new_v4(),
        "patient_id": Uuid::new_v4(),
        "doctor_id": doctor_id,
        "start_at": start_at.to_rfc3339(),
        "end_at": (start_at + chrono::Duration::minutes(30)).to_rfc3339(),
        "status": "confirmed",
        "confirmation_code": "B412",
        "note": null,
        "created_at": start_at.to_rfc3339(),
        "updated_at": start_at.to_rfc3339(),
    })
}

// ==============================================================================
// TESTS
// ==============================================================================

#[tokio::test]
async fn free_day_minus_one_booked_slot_yields_fifteen() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let now = at(2024, 1, 10, 8, 0);

    // One appointment at 09:00, the rest of the day is free.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "neq.canceled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            doctor_id,
            at(2024, 1, 10, 9, 0),
        )]))
        .mount(&mock_server)
        .await;

    let service = AvailabilityService::new(&test_config(&mock_server.uri(), 1));
    let slots = service
        .compute_slots(doctor_id, now, "test_token")
        .await
        .unwrap();

    // 16 half-hour slots in 09:00-17:00 minus the booked 09:00.
    assert_eq!(slots.len(), 15);
    assert!(!slots.iter().any(|s| s.start_at == at(2024, 1, 10, 9, 0)));
    assert_eq!(slots[0].start_at, at(2024, 1, 10, 9, 30));
    assert_eq!(slots.last().unwrap().start_at, at(2024, 1, 10, 16, 30));
}

#[tokio::test]
async fn canceled_appointments_do_not_block_slots() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let now = at(2024, 1, 10, 8, 0);

    // The store query filters canceled rows out; an empty result set means
    // the whole grid is open.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.canceled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = AvailabilityService::new(&test_config(&mock_server.uri(), 1));
    let slots = service
        .compute_slots(doctor_id, now, "test_token")
        .await
        .unwrap();

    assert_eq!(slots.len(), 16);
}

#[tokio::test]
async fn appointments_with_seconds_still_block_their_slot() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let now = at(2024, 1, 10, 8, 0);

    // Legacy rows can carry stray seconds; occupancy is keyed by minute.
    let odd_start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 42).unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![appointment_json(doctor_id, odd_start)]),
        )
        .mount(&mock_server)
        .await;

    let service = AvailabilityService::new(&test_config(&mock_server.uri(), 1));
    let slots = service
        .compute_slots(doctor_id, now, "test_token")
        .await
        .unwrap();

    assert!(!slots.iter().any(|s| s.start_at == at(2024, 1, 10, 10, 0)));
}

#[tokio::test]
async fn repeated_queries_return_the_same_slots() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let now = at(2024, 1, 10, 8, 0);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            doctor_id,
            at(2024, 1, 10, 11, 30),
        )]))
        .mount(&mock_server)
        .await;

    let service = AvailabilityService::new(&test_config(&mock_server.uri(), 3));

    let first = service
        .compute_slots(doctor_id, now, "test_token")
        .await
        .unwrap();
    let second = service
        .compute_slots(doctor_id, now, "test_token")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0].start_at < w[1].start_at));
}

#[tokio::test]
async fn store_failure_surfaces_as_storage_error() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&mock_server)
        .await;

    let service = AvailabilityService::new(&test_config(&mock_server.uri(), 1));
    let result = service
        .compute_slots(doctor_id, at(2024, 1, 10, 8, 0), "test_token")
        .await;

    assert!(matches!(result, Err(SchedulingError::StorageError(_))));
}
