use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::models::SlotGranularity;
use schedule_cell::services::SlotService;
use shared_config::AppConfig;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn config_for(mock_server: &MockServer) -> AppConfig {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = mock_server.uri();
    config
}

async fn mount_monday_schedule(mock_server: &MockServer, doctor_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_rule_response(
                &Uuid::new_v4().to_string(),
                &doctor_id.to_string(),
                0,
                "09:00:00",
                "10:00:00",
            )
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_exceptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_generate_slots_is_idempotent_against_duplicates() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

    mount_monday_schedule(&mock_server, doctor_id).await;

    // Inserts must go through the unique index with duplicates ignored;
    // running generation twice hits this path twice without erroring.
    Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("on_conflict", "doctor_id,slot_date,start_time,end_time"))
        .and(header("Prefer", "resolution=ignore-duplicates,return=representation"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let stored = json!([
        MockSupabaseResponses::time_slot_response(
            &Uuid::new_v4().to_string(),
            &doctor_id.to_string(),
            "2025-06-02",
            "09:00:00",
            "09:30:00",
            true,
        ),
        MockSupabaseResponses::time_slot_response(
            &Uuid::new_v4().to_string(),
            &doctor_id.to_string(),
            "2025-06-02",
            "09:30:00",
            "10:00:00",
            true,
        ),
    ]);

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored))
        .mount(&mock_server)
        .await;

    let service = SlotService::new(&config_for(&mock_server));

    let first = service
        .generate_slots(doctor_id, date, SlotGranularity::FixedMinutes(30), "token")
        .await
        .unwrap();
    let second = service
        .generate_slots(doctor_id, date, SlotGranularity::FixedMinutes(30), "token")
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), first.len());
}

#[tokio::test]
async fn test_generate_slots_whole_range_inserts_single_window() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

    mount_monday_schedule(&mock_server, doctor_id).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_response(
                &Uuid::new_v4().to_string(),
                &doctor_id.to_string(),
                "2025-06-02",
                "09:00:00",
                "10:00:00",
                true,
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = SlotService::new(&config_for(&mock_server));
    let slots = service
        .generate_slots(doctor_id, date, SlotGranularity::WholeRange, "token")
        .await
        .unwrap();

    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].start_time.to_string(), "09:00:00");
    assert_eq!(slots[0].end_time.to_string(), "10:00:00");
}

#[tokio::test]
async fn test_list_open_slots_excludes_started_intervals() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    let now = Utc::now();
    let today = now.date_naive();
    let past_start = (now - Duration::hours(2)).time();
    let future_start = (now + Duration::hours(2)).time();
    let future_end = (now + Duration::hours(3)).time();

    // Guard against date rollover around midnight
    if past_start >= now.time() || future_end <= now.time() {
        return;
    }

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("is_available", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_response(
                &Uuid::new_v4().to_string(),
                &doctor_id.to_string(),
                &today.to_string(),
                &past_start.format("%H:%M:%S").to_string(),
                &now.time().format("%H:%M:%S").to_string(),
                true,
            ),
            MockSupabaseResponses::time_slot_response(
                &Uuid::new_v4().to_string(),
                &doctor_id.to_string(),
                &today.to_string(),
                &future_start.format("%H:%M:%S").to_string(),
                &future_end.format("%H:%M:%S").to_string(),
                true,
            ),
        ])))
        .mount(&mock_server)
        .await;

    let service = SlotService::new(&config_for(&mock_server));
    let slots = service
        .list_open_slots(doctor_id, today, now, "token")
        .await
        .unwrap();

    assert_eq!(slots.len(), 1);
    assert!(slots[0].start_time > now.time());
}
