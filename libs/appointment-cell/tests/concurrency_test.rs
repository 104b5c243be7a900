mod common;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::clock::FixedClock;
use appointment_cell::models::*;
use appointment_cell::services::availability::WorkingHoursTemplate;
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::notification::NotificationSink;
use common::*;
use shared_config::SchedulingConfig;
use shared_models::auth::ActorContext;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_for_same_slot_admit_one() {
    let clinic = Clinic::new();

    let attempts = (0..16).map(|i| {
        let service = Arc::clone(&clinic.service);
        // Mix identical and partially overlapping requests.
        let request = if i % 2 == 0 {
            clinic.request(t(10, 0), 30)
        } else {
            clinic.request(t(9, 30), 60)
        };
        let actor = clinic.patient_actor();
        tokio::spawn(async move { service.book_appointment(actor, request).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let occupied = results
        .iter()
        .filter(|r| matches!(r, Err(AppointmentError::SlotOccupied)))
        .count();

    assert_eq!(admitted, 1);
    assert_eq!(occupied, results.len() - 1);

    let booked = clinic
        .service
        .list_appointments(&clinic.staff_actor(), &AppointmentFilter::default())
        .await;
    assert_eq!(booked.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_for_disjoint_slots_all_succeed() {
    let clinic = Clinic::new();
    let starts = [t(9, 0), t(9, 30), t(10, 0), t(10, 30), t(11, 0), t(11, 30)];

    let attempts = starts.iter().map(|start| {
        let service = Arc::clone(&clinic.service);
        let request = clinic.request(*start, 30);
        let actor = clinic.patient_actor();
        tokio::spawn(async move { service.book_appointment(actor, request).await })
    });

    for joined in join_all(attempts).await {
        assert!(joined.unwrap().is_ok());
    }
    assert!(clinic.slot_starts(30).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_transitions_apply_exactly_one() {
    let clinic = Clinic::new();
    let apt = clinic.book(t(9, 0), 30).await.unwrap();
    clinic.clock.set(at(9, 45));

    let cancel = {
        let service = Arc::clone(&clinic.service);
        let actor = clinic.patient_actor();
        tokio::spawn(async move {
            service
                .transition(apt.id, actor, transition_to(AppointmentStatus::Cancelled))
                .await
        })
    };
    let complete = {
        let service = Arc::clone(&clinic.service);
        let actor = clinic.doctor_actor();
        tokio::spawn(async move {
            service
                .transition(apt.id, actor, transition_to(AppointmentStatus::Completed))
                .await
        })
    };

    let (cancel, complete) = (cancel.await.unwrap(), complete.await.unwrap());
    assert_ne!(cancel.is_ok(), complete.is_ok());

    let loser = if cancel.is_ok() { complete } else { cancel };
    assert!(matches!(loser, Err(AppointmentError::InvalidTransition { .. })));

    let stored = clinic.service.get_appointment(apt.id, &clinic.staff_actor()).await.unwrap();
    assert!(stored.is_terminal());
    assert_eq!(stored.version, 2);

    // Booking (2) plus the one transition that won.
    assert_eq!(clinic.delivered().await.len(), 3);
}

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn deliver(&self, _record: NotificationRecord) -> Result<(), NotificationError> {
        Err(NotificationError::Delivery("inbox offline".to_string()))
    }

    async fn list_for_recipient(
        &self,
        _recipient_id: Uuid,
        _unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, NotificationError> {
        Err(NotificationError::Delivery("inbox offline".to_string()))
    }

    async fn mark_read(&self, _notification_id: Uuid, _recipient_id: Uuid) -> Result<NotificationRecord, NotificationError> {
        Err(NotificationError::Delivery("inbox offline".to_string()))
    }
}

#[tokio::test]
async fn test_failing_sink_does_not_affect_transitions() {
    let clock = Arc::new(FixedClock::at(at(8, 0)));
    let template = Arc::new(WorkingHoursTemplate::new(vec![TimeRange::new(t(9, 0), t(12, 0))], 30));
    let service = AppointmentBookingService::new(
        SchedulingConfig::default(),
        template,
        Arc::new(FailingSink),
        clock.clone(),
    );

    let doctor = Uuid::new_v4();
    let patient = Uuid::new_v4();
    let request = BookAppointmentRequest {
        patient_id: patient,
        doctor_id: doctor,
        appointment_date: day(),
        start_time: t(10, 0),
        duration_minutes: Some(30),
        appointment_type: AppointmentType::Emergency,
        priority: AppointmentPriority::High,
        reason: None,
        notes: None,
        backdated_entry: false,
    };

    let apt = service.book_appointment(ActorContext::patient(patient), request).await.unwrap();
    let cancelled = service
        .transition(apt.id, ActorContext::doctor(doctor), transition_to(AppointmentStatus::Cancelled))
        .await
        .unwrap();
    service.dispatcher().flush().await;

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    let stored = service.get_appointment(apt.id, &ActorContext::patient(patient)).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Cancelled);

    // Reading the inbox does surface the sink error.
    assert!(service.list_notifications(&ActorContext::patient(patient), false).await.is_err());
}
