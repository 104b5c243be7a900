// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use tokio::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingConfig};
use shared_models::auth::{ActorContext, ActorRole};

use crate::clock::{Clock, SystemClock};
use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, BookAppointmentRequest,
    DateRange, NotificationError, NotificationRecord, RescheduleAppointmentRequest, StatusChange,
    TransitionEvent, TransitionRequest, UpdateAppointmentDetailsRequest,
};
use crate::services::availability::{AvailabilitySource, RestAvailabilitySource, WorkingHoursTemplate};
use crate::services::conflict::{AdmissionCandidate, ConflictValidator};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{
    InMemoryNotificationSink, NotificationDispatcher, NotificationSink, RestNotificationSink,
};
use crate::services::slots::{AvailableSlots, SlotAllocator};
use crate::services::store::{AdmissionKey, AppointmentRepository, KeyedLocks};

const MAX_TEXT_LEN: usize = 2_000;

/// Entry point for every scheduling operation.
///
/// Admission is serialized per `(doctor, date)`; transitions per appointment id.
/// Lock order is always appointment before doctor-day.
pub struct AppointmentBookingService {
    repository: Arc<AppointmentRepository>,
    slot_allocator: SlotAllocator,
    conflict_validator: ConflictValidator,
    lifecycle_service: AppointmentLifecycleService,
    dispatcher: NotificationDispatcher,
    admission_locks: KeyedLocks<AdmissionKey>,
    transition_locks: KeyedLocks<Uuid>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl AppointmentBookingService {
    pub fn new(
        config: SchedulingConfig,
        availability: Arc<dyn AvailabilitySource>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let repository = Arc::new(AppointmentRepository::new());
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);

        Self {
            slot_allocator: SlotAllocator::new(
                Arc::clone(&availability),
                Arc::clone(&repository),
                Arc::clone(&clock),
                config.clone(),
            ),
            conflict_validator: ConflictValidator::new(
                availability,
                Arc::clone(&repository),
                Arc::clone(&clock),
                config.clone(),
            ),
            lifecycle_service: AppointmentLifecycleService::new(),
            dispatcher: NotificationDispatcher::new(sink),
            admission_locks: KeyedLocks::new(lock_timeout),
            transition_locks: KeyedLocks::new(lock_timeout),
            repository,
            clock,
            config,
        }
    }

    /// REST backends when the database is configured, in-memory ones otherwise.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, AppointmentError> {
        let scheduling = config.scheduling.clone();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::with_offset_minutes(scheduling.clinic_utc_offset_minutes));

        let (availability, sink): (Arc<dyn AvailabilitySource>, Arc<dyn NotificationSink>) = if config.is_configured() {
            info!("Using REST availability source and notification sink");
            (
                Arc::new(RestAvailabilitySource::new(config)),
                Arc::new(RestNotificationSink::new(config)),
            )
        } else {
            info!("Using in-memory working hours ({}) and notification inbox", scheduling.default_working_hours);
            (
                Arc::new(WorkingHoursTemplate::from_config(&scheduling)?),
                Arc::new(InMemoryNotificationSink::new()),
            )
        };

        Ok(Self::new(scheduling, availability, sink, clock))
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    // ==============================================================================
    // SLOTS AND ADMISSION
    // ==============================================================================

    pub async fn list_available_slots(
        &self,
        doctor_id: Uuid,
        range: DateRange,
        duration_minutes: Option<i64>,
    ) -> Result<AvailableSlots, AppointmentError> {
        let duration = self.resolve_duration(duration_minutes)?;
        self.slot_allocator.list_available_slots(doctor_id, range, duration).await
    }

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, patient_id = %request.patient_id))]
    pub async fn book_appointment(
        &self,
        actor: ActorContext,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.validate_booking_request(&actor, &request)?;

        let candidate = AdmissionCandidate {
            doctor_id: request.doctor_id,
            date: request.appointment_date,
            start_time: request.start_time,
            duration_minutes: self.resolve_duration(request.duration_minutes)?,
            allow_past: request.backdated_entry,
            replacing: None,
        };

        let appointment = {
            let _admission = self.admission_locks.acquire((candidate.doctor_id, candidate.date)).await?;
            self.conflict_validator.check_admissible(&candidate).await?;

            let now = self.clock.now_utc();
            let appointment = Appointment {
                id: Uuid::new_v4(),
                patient_id: request.patient_id,
                doctor_id: request.doctor_id,
                appointment_date: candidate.date,
                start_time: candidate.start_time,
                duration_minutes: candidate.duration_minutes,
                appointment_type: request.appointment_type,
                priority: request.priority,
                status: AppointmentStatus::Scheduled,
                reason: request.reason,
                notes: request.notes,
                status_note: None,
                version: 1,
                created_at: now,
                updated_at: now,
            };
            self.repository.insert(appointment.clone()).await;
            appointment
        };

        info!(
            "Booked appointment {} for patient {} with doctor {} on {} at {}",
            appointment.id, appointment.patient_id, appointment.doctor_id,
            appointment.appointment_date, appointment.start_time
        );

        self.dispatcher.notify(self.creation_event(&appointment, actor));
        Ok(appointment)
    }

    // ==============================================================================
    // LIFECYCLE
    // ==============================================================================

    #[instrument(skip(self, request), fields(target = %request.target_status))]
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        actor: ActorContext,
        request: TransitionRequest,
    ) -> Result<Appointment, AppointmentError> {
        let note = clean_text("note", request.note)?;

        let (previous, updated) = {
            let _guard = self.transition_locks.acquire(appointment_id).await?;
            let current = self.visible_appointment(appointment_id, &actor).await?;

            if let Some(expected) = request.expected_version {
                if expected != current.version {
                    warn!(
                        "Stale transition on {} (expected v{}, current v{})",
                        appointment_id, expected, current.version
                    );
                    return Err(AppointmentError::ConcurrencyConflict);
                }
            }

            self.lifecycle_service.validate_status_transition(
                &current,
                request.target_status,
                actor.role,
                self.clock.now_local(),
            )?;

            let updated = self.lifecycle_service.apply_transition(
                &current,
                request.target_status,
                note.clone(),
                self.clock.now_utc(),
            );
            self.repository.replace(updated.clone(), current.version).await?;
            (current.status, updated)
        };

        info!("Appointment {} moved {} -> {} by {}", appointment_id, previous, updated.status, actor.role);

        self.dispatcher.notify(TransitionEvent {
            change: StatusChange { from: Some(previous), to: updated.status },
            appointment: updated.clone(),
            actor,
            note,
            occurred_at: updated.updated_at,
        });
        Ok(updated)
    }

    /// Cancel the original and admit a replacement as one unit.
    #[instrument(skip(self, request))]
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        actor: ActorContext,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let reason = clean_text("reason", request.reason)?;

        let (previous, cancelled, replacement) = {
            let _guard = self.transition_locks.acquire(appointment_id).await?;
            let original = self.visible_appointment(appointment_id, &actor).await?;

            self.lifecycle_service.validate_status_transition(
                &original,
                AppointmentStatus::Cancelled,
                actor.role,
                self.clock.now_local(),
            )?;

            let candidate = AdmissionCandidate {
                doctor_id: original.doctor_id,
                date: request.new_date,
                start_time: request.new_start_time,
                duration_minutes: match request.new_duration_minutes {
                    Some(minutes) => self.resolve_duration(Some(minutes))?,
                    None => original.duration_minutes,
                },
                allow_past: false,
                replacing: Some(original.id),
            };

            let _admission = self.admission_locks.acquire((candidate.doctor_id, candidate.date)).await?;
            self.conflict_validator.check_admissible(&candidate).await?;

            let now = self.clock.now_utc();
            let replacement = Appointment {
                id: Uuid::new_v4(),
                appointment_date: candidate.date,
                start_time: candidate.start_time,
                duration_minutes: candidate.duration_minutes,
                status: AppointmentStatus::Scheduled,
                status_note: None,
                version: 1,
                created_at: now,
                updated_at: now,
                ..original.clone()
            };

            let note = Some(match &reason {
                Some(reason) => format!("Rescheduled to {}: {}", replacement.id, reason),
                None => format!("Rescheduled to {}", replacement.id),
            });
            let cancelled = self.lifecycle_service.apply_transition(&original, AppointmentStatus::Cancelled, note, now);

            self.repository.replace(cancelled.clone(), original.version).await?;
            self.repository.insert(replacement.clone()).await;
            (original.status, cancelled, replacement)
        };

        info!("Appointment {} rescheduled as {}", cancelled.id, replacement.id);

        self.dispatcher.notify(TransitionEvent {
            change: StatusChange { from: Some(previous), to: AppointmentStatus::Cancelled },
            appointment: cancelled.clone(),
            actor,
            note: cancelled.status_note.clone(),
            occurred_at: cancelled.updated_at,
        });
        self.dispatcher.notify(self.creation_event(&replacement, actor));
        Ok(replacement)
    }

    /// Edit free-text fields on a live appointment. Absent or blank fields keep
    /// their current value. No notification is sent.
    pub async fn update_details(
        &self,
        appointment_id: Uuid,
        actor: ActorContext,
        request: UpdateAppointmentDetailsRequest,
    ) -> Result<Appointment, AppointmentError> {
        let reason = clean_text("reason", request.reason)?;
        let notes = clean_text("notes", request.notes)?;

        let _guard = self.transition_locks.acquire(appointment_id).await?;
        let current = self.visible_appointment(appointment_id, &actor).await?;
        self.lifecycle_service.ensure_mutable(&current)?;

        let updated = Appointment {
            reason: reason.or_else(|| current.reason.clone()),
            notes: notes.or_else(|| current.notes.clone()),
            version: current.version + 1,
            updated_at: self.clock.now_utc(),
            ..current.clone()
        };
        self.repository.replace(updated.clone(), current.version).await?;
        Ok(updated)
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn get_appointment(&self, appointment_id: Uuid, actor: &ActorContext) -> Result<Appointment, AppointmentError> {
        self.visible_appointment(appointment_id, actor).await
    }

    pub async fn list_appointments(&self, actor: &ActorContext, filter: &AppointmentFilter) -> Vec<Appointment> {
        self.repository
            .find(filter)
            .await
            .into_iter()
            .filter(|apt| apt.is_visible_to(actor))
            .collect()
    }

    pub async fn list_notifications(
        &self,
        actor: &ActorContext,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, NotificationError> {
        self.dispatcher.sink().list_for_recipient(actor.actor_ref, unread_only).await
    }

    pub async fn mark_notification_read(
        &self,
        actor: &ActorContext,
        notification_id: Uuid,
    ) -> Result<NotificationRecord, NotificationError> {
        self.dispatcher.sink().mark_read(notification_id, actor.actor_ref).await
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn visible_appointment(&self, appointment_id: Uuid, actor: &ActorContext) -> Result<Appointment, AppointmentError> {
        self.repository
            .get(appointment_id)
            .await
            .filter(|apt| apt.is_visible_to(actor))
            .ok_or(AppointmentError::NotFound)
    }

    fn resolve_duration(&self, requested: Option<i64>) -> Result<u32, AppointmentError> {
        let minutes = requested.unwrap_or(i64::from(self.config.default_duration_minutes));
        if minutes <= 0 {
            return Err(AppointmentError::validation("duration_minutes", "must be positive"));
        }
        u32::try_from(minutes)
            .ok()
            .filter(|m| *m <= 24 * 60)
            .ok_or_else(|| AppointmentError::validation("duration_minutes", "must not exceed one day"))
    }

    fn validate_booking_request(
        &self,
        actor: &ActorContext,
        request: &BookAppointmentRequest,
    ) -> Result<(), AppointmentError> {
        if request.patient_id.is_nil() {
            return Err(AppointmentError::validation("patient_id", "is required"));
        }
        if request.doctor_id.is_nil() {
            return Err(AppointmentError::validation("doctor_id", "is required"));
        }
        if actor.role == ActorRole::Patient && actor.actor_ref != request.patient_id {
            return Err(AppointmentError::validation("patient_id", "patients may only book for themselves"));
        }
        if request.backdated_entry && !actor.is_staff() {
            return Err(AppointmentError::validation("backdated_entry", "only staff may record past visits"));
        }
        for (field, value) in [("reason", &request.reason), ("notes", &request.notes)] {
            if value.as_ref().is_some_and(|v| v.len() > MAX_TEXT_LEN) {
                return Err(AppointmentError::validation(field, format!("must be at most {} characters", MAX_TEXT_LEN)));
            }
        }
        Ok(())
    }

    fn creation_event(&self, appointment: &Appointment, actor: ActorContext) -> TransitionEvent {
        TransitionEvent {
            change: StatusChange { from: None, to: AppointmentStatus::Scheduled },
            appointment: appointment.clone(),
            actor,
            note: None,
            occurred_at: appointment.created_at,
        }
    }
}

/// Trim free text; blank becomes `None`.
fn clean_text(field: &str, value: Option<String>) -> Result<Option<String>, AppointmentError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if v.len() > MAX_TEXT_LEN => Err(AppointmentError::validation(
            field,
            format!("must be at most {} characters", MAX_TEXT_LEN),
        )),
        Some(v) if v.is_empty() => Ok(None),
        other => Ok(other),
    }
}
