#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use appointment_cell::clock::FixedClock;
use appointment_cell::models::*;
use appointment_cell::services::availability::WorkingHoursTemplate;
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::notification::{InMemoryNotificationSink, NotificationSink};
use shared_config::SchedulingConfig;
use shared_models::auth::ActorContext;
use shared_utils::test_utils::TestUser;

pub fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// Monday 2025-06-02, the day most scenarios book on.
pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

pub fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_time(t(h, m))
}

/// One doctor working 09:00-12:00 in 30 minute steps, clock parked at 08:00 on `day()`.
pub struct Clinic {
    pub service: Arc<AppointmentBookingService>,
    pub clock: Arc<FixedClock>,
    pub sink: Arc<InMemoryNotificationSink>,
    pub template: Arc<WorkingHoursTemplate>,
    pub doctor: Uuid,
    pub patient: Uuid,
}

impl Clinic {
    pub fn new() -> Self {
        Self::with_sink_and_config(Arc::new(InMemoryNotificationSink::new()), SchedulingConfig::default())
    }

    pub fn with_config(config: SchedulingConfig) -> Self {
        Self::with_sink_and_config(Arc::new(InMemoryNotificationSink::new()), config)
    }

    fn with_sink_and_config(sink: Arc<InMemoryNotificationSink>, config: SchedulingConfig) -> Self {
        let clock = Arc::new(FixedClock::at(at(8, 0)));
        let template = Arc::new(WorkingHoursTemplate::new(vec![TimeRange::new(t(9, 0), t(12, 0))], 30));
        let service = AppointmentBookingService::new(
            config,
            template.clone(),
            sink.clone(),
            clock.clone(),
        );

        Self {
            service: Arc::new(service),
            clock,
            sink,
            template,
            doctor: Uuid::new_v4(),
            patient: Uuid::new_v4(),
        }
    }

    pub fn patient_actor(&self) -> ActorContext {
        ActorContext::patient(self.patient)
    }

    pub fn doctor_actor(&self) -> ActorContext {
        ActorContext::doctor(self.doctor)
    }

    /// Front-desk staff, resolved from a user record the way the auth layer does.
    pub fn staff_actor(&self) -> ActorContext {
        TestUser::admin("frontdesk@example.com").to_actor()
    }

    pub fn request(&self, start: NaiveTime, duration_minutes: i64) -> BookAppointmentRequest {
        BookAppointmentRequest {
            patient_id: self.patient,
            doctor_id: self.doctor,
            appointment_date: day(),
            start_time: start,
            duration_minutes: Some(duration_minutes),
            appointment_type: AppointmentType::Consultation,
            priority: AppointmentPriority::Normal,
            reason: Some("Persistent cough".to_string()),
            notes: None,
            backdated_entry: false,
        }
    }

    pub async fn book(&self, start: NaiveTime, duration_minutes: i64) -> Result<Appointment, AppointmentError> {
        self.service
            .book_appointment(self.patient_actor(), self.request(start, duration_minutes))
            .await
    }

    pub async fn slot_starts(&self, duration_minutes: i64) -> Vec<NaiveTime> {
        let slots = self
            .service
            .list_available_slots(self.doctor, DateRange::single(day()), Some(duration_minutes))
            .await
            .unwrap();
        slots.iter().map(|s| s.start_time).collect()
    }

    /// Every delivered record, after pending deliveries have landed.
    pub async fn delivered(&self) -> Vec<NotificationRecord> {
        self.service.dispatcher().flush().await;
        self.sink.all().await
    }

    pub async fn inbox(&self, recipient: Uuid) -> Vec<NotificationRecord> {
        self.service.dispatcher().flush().await;
        self.sink.list_for_recipient(recipient, false).await.unwrap()
    }
}

pub fn transition_to(target: AppointmentStatus) -> TransitionRequest {
    TransitionRequest {
        target_status: target,
        note: None,
        expected_version: None,
    }
}
