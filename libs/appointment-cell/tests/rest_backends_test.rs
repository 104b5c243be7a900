mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::clock::FixedClock;
use appointment_cell::models::*;
use appointment_cell::services::availability::{AvailabilitySource, RestAvailabilitySource};
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::notification::{build_records, NotificationSink, RestNotificationSink};
use common::*;
use shared_models::auth::ActorContext;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

async fn mount_monday_hours(server: &MockServer, doctor_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::working_hours_response(&doctor_id.to_string(), 1, "09:00:00", "12:00:00"),
            MockSupabaseResponses::working_hours_response(&doctor_id.to_string(), 2, "13:00:00", "17:00:00"),
        ])))
        .mount(server)
        .await;
}

async fn mount_external_bookings(server: &MockServer, doctor_id: Uuid, rows: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rest_working_hours_follow_weekday_rows() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    mount_monday_hours(&server, doctor).await;

    let source = RestAvailabilitySource::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());

    let monday = source.get_working_hours(doctor, day()).await.unwrap();
    assert_eq!(monday.ranges, vec![TimeRange::new(t(9, 0), t(12, 0))]);
    assert_eq!(monday.granularity_minutes, 30);

    let sunday = source.get_working_hours(doctor, day() - chrono::Duration::days(1)).await.unwrap();
    assert!(sunday.ranges.is_empty());
}

#[tokio::test]
async fn test_rest_date_specific_row_replaces_weekday() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();

    let mut special = MockSupabaseResponses::working_hours_response(&doctor.to_string(), 1, "10:00:00", "11:00:00");
    special["day_of_week"] = json!(null);
    special["specific_date"] = json!(day());

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::working_hours_response(&doctor.to_string(), 1, "09:00:00", "12:00:00"),
            special,
        ])))
        .mount(&server)
        .await;

    let source = RestAvailabilitySource::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());
    let hours = source.get_working_hours(doctor, day()).await.unwrap();
    assert_eq!(hours.ranges, vec![TimeRange::new(t(10, 0), t(11, 0))]);
}

#[tokio::test]
async fn test_rest_availability_drives_slots_and_admission() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    let patient = Uuid::new_v4();
    mount_monday_hours(&server, doctor).await;
    mount_external_bookings(
        &server,
        doctor,
        json!([MockSupabaseResponses::booking_interval_response(
            &doctor.to_string(),
            &day().to_string(),
            "10:00:00",
            30
        )]),
    )
    .await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    let service = AppointmentBookingService::new(
        config.scheduling.clone(),
        Arc::new(RestAvailabilitySource::new(&config)),
        Arc::new(appointment_cell::services::notification::InMemoryNotificationSink::new()),
        Arc::new(FixedClock::at(at(8, 0))),
    );

    let slots = service
        .list_available_slots(doctor, DateRange::single(day()), Some(30))
        .await
        .unwrap();
    let starts: Vec<_> = slots.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![t(9, 0), t(9, 30), t(10, 30), t(11, 0), t(11, 30)]);

    let request = BookAppointmentRequest {
        patient_id: patient,
        doctor_id: doctor,
        appointment_date: day(),
        start_time: t(10, 0),
        duration_minutes: Some(30),
        appointment_type: AppointmentType::FollowUp,
        priority: AppointmentPriority::Normal,
        reason: None,
        notes: None,
        backdated_entry: false,
    };
    let result = service.book_appointment(ActorContext::patient(patient), request.clone()).await;
    assert_eq!(result, Err(AppointmentError::SlotOccupied));

    let result = service
        .book_appointment(ActorContext::patient(patient), BookAppointmentRequest { start_time: t(10, 30), ..request })
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_rest_availability_failure_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(MockSupabaseResponses::error_response("database unavailable", "500")),
        )
        .mount(&server)
        .await;

    let source = RestAvailabilitySource::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());
    let result = source
        .list_occupying_appointments(Uuid::new_v4(), DateRange::single(day()))
        .await;

    assert_matches!(result, Err(AppointmentError::AvailabilityUnavailable(msg)) if msg.contains("database unavailable"));
}

fn sample_event() -> TransitionEvent {
    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        appointment_date: day(),
        start_time: t(10, 0),
        duration_minutes: 30,
        appointment_type: AppointmentType::Consultation,
        priority: AppointmentPriority::Normal,
        status: AppointmentStatus::Confirmed,
        reason: None,
        notes: None,
        status_note: None,
        version: 2,
        created_at: now,
        updated_at: now,
    };

    TransitionEvent {
        change: StatusChange { from: Some(AppointmentStatus::Scheduled), to: AppointmentStatus::Confirmed },
        actor: ActorContext::doctor(appointment.doctor_id),
        appointment,
        note: None,
        occurred_at: now,
    }
}

#[tokio::test]
async fn test_rest_sink_posts_records() {
    let server = MockServer::start().await;
    let record = build_records(&sample_event()).remove(0);

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({
            "recipient_id": record.recipient_id,
            "recipient_role": "patient",
            "priority": "normal"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([record])))
        .expect(1)
        .mount(&server)
        .await;

    let sink = RestNotificationSink::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());
    sink.deliver(record).await.unwrap();
}

#[tokio::test]
async fn test_rest_sink_lists_and_marks_read() {
    let server = MockServer::start().await;
    let record = build_records(&sample_event()).remove(0);
    let recipient = record.recipient_id;
    let read_record = NotificationRecord { read: true, ..record.clone() };

    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .and(query_param("recipient_id", format!("eq.{}", recipient)))
        .and(query_param("read", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([record])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/notifications"))
        .and(query_param("id", format!("eq.{}", record.id)))
        .and(body_partial_json(json!({ "read": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([read_record])))
        .mount(&server)
        .await;

    let sink = RestNotificationSink::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());

    let unread = sink.list_for_recipient(recipient, true).await.unwrap();
    assert_eq!(unread, vec![record.clone()]);

    let updated = sink.mark_read(record.id, recipient).await.unwrap();
    assert!(updated.read);
}

#[tokio::test]
async fn test_rest_sink_mark_read_on_missing_row() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let sink = RestNotificationSink::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());
    let result = sink.mark_read(Uuid::new_v4(), Uuid::new_v4()).await;
    assert_matches!(result, Err(NotificationError::NotFound));
}
