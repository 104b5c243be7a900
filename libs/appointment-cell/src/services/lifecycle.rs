// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use shared_models::auth::ActorRole;

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

/// The appointment state machine. Pure rules; locking and persistence live in the booking service.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// All statuses reachable from `current` by someone.
    pub fn get_valid_transitions(&self, current: AppointmentStatus) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match current {
            Scheduled => &[Confirmed, Cancelled, Completed, NoShow],
            Confirmed => &[Cancelled, Completed, NoShow],
            // Terminal states
            Completed | Cancelled | NoShow => &[],
        }
    }

    /// Which roles may request a move into `target`.
    pub fn is_role_allowed(&self, target: AppointmentStatus, role: ActorRole) -> bool {
        use AppointmentStatus::*;
        match target {
            Confirmed | Completed => matches!(role, ActorRole::Doctor | ActorRole::Staff),
            Cancelled => true,
            NoShow => role == ActorRole::Staff,
            Scheduled => false,
        }
    }

    /// Validate a requested status change against the table, the actor and the clock.
    pub fn validate_status_transition(
        &self,
        appointment: &Appointment,
        target: AppointmentStatus,
        role: ActorRole,
        now: NaiveDateTime,
    ) -> Result<(), AppointmentError> {
        let current = appointment.status;
        debug!("Validating status transition {} -> {} by {}", current, target, role);

        let invalid = || AppointmentError::InvalidTransition { from: current, to: target };

        if !self.get_valid_transitions(current).contains(&target) {
            warn!("Invalid status transition attempted: {} -> {}", current, target);
            return Err(invalid());
        }

        if !self.is_role_allowed(target, role) {
            warn!("Role {} may not move appointment {} to {}", role, appointment.id, target);
            return Err(invalid());
        }

        match target {
            AppointmentStatus::Completed if appointment.scheduled_start() > now => {
                warn!("Appointment {} has not started yet, cannot complete", appointment.id);
                Err(invalid())
            }
            AppointmentStatus::NoShow if appointment.scheduled_end() > now => {
                warn!("Appointment {} interval has not elapsed, cannot mark no-show", appointment.id);
                Err(invalid())
            }
            _ => Ok(()),
        }
    }

    /// Apply an already validated change, returning the new snapshot.
    pub fn apply_transition(
        &self,
        appointment: &Appointment,
        target: AppointmentStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Appointment {
        Appointment {
            status: target,
            status_note: note,
            version: appointment.version + 1,
            updated_at: at,
            ..appointment.clone()
        }
    }

    pub fn ensure_mutable(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        if appointment.is_terminal() {
            return Err(AppointmentError::Terminal { status: appointment.status });
        }
        Ok(())
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    use crate::models::{AppointmentPriority, AppointmentType};
    use AppointmentStatus::*;

    const ALL: [AppointmentStatus; 5] = [Scheduled, Confirmed, Completed, Cancelled, NoShow];

    fn appointment(status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            appointment_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            duration_minutes: 30,
            appointment_type: AppointmentType::Consultation,
            priority: AppointmentPriority::Normal,
            status,
            reason: None,
            notes: None,
            status_note: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn after_visit() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(11, 0, 0).unwrap()
    }

    #[test]
    fn only_listed_pairs_are_legal() {
        let lifecycle = AppointmentLifecycleService::new();
        let legal = [
            (Scheduled, Confirmed),
            (Scheduled, Cancelled),
            (Confirmed, Cancelled),
            (Scheduled, Completed),
            (Confirmed, Completed),
            (Scheduled, NoShow),
            (Confirmed, NoShow),
        ];

        for from in ALL {
            for to in ALL {
                let result = lifecycle.validate_status_transition(
                    &appointment(from),
                    to,
                    ActorRole::Staff,
                    after_visit(),
                );
                if legal.contains(&(from, to)) {
                    assert!(result.is_ok(), "{} -> {} should be allowed", from, to);
                } else {
                    assert_eq!(result, Err(AppointmentError::InvalidTransition { from, to }));
                }
            }
        }
    }

    #[test]
    fn roles_are_checked_per_target() {
        let lifecycle = AppointmentLifecycleService::new();
        let apt = appointment(Scheduled);

        assert!(lifecycle.validate_status_transition(&apt, Confirmed, ActorRole::Patient, after_visit()).is_err());
        assert!(lifecycle.validate_status_transition(&apt, Confirmed, ActorRole::Doctor, after_visit()).is_ok());
        assert!(lifecycle.validate_status_transition(&apt, Cancelled, ActorRole::Patient, after_visit()).is_ok());
        assert!(lifecycle.validate_status_transition(&apt, NoShow, ActorRole::Doctor, after_visit()).is_err());
        assert!(lifecycle.validate_status_transition(&apt, Completed, ActorRole::Patient, after_visit()).is_err());
    }

    #[test]
    fn completion_and_no_show_wait_for_the_clock() {
        let lifecycle = AppointmentLifecycleService::new();
        let apt = appointment(Confirmed);
        let date = apt.appointment_date;

        let before = date.and_hms_opt(9, 59, 0).unwrap();
        let during = date.and_hms_opt(10, 15, 0).unwrap();
        let at_end = date.and_hms_opt(10, 30, 0).unwrap();

        assert!(lifecycle.validate_status_transition(&apt, Completed, ActorRole::Doctor, before).is_err());
        assert!(lifecycle.validate_status_transition(&apt, Completed, ActorRole::Doctor, during).is_ok());
        assert!(lifecycle.validate_status_transition(&apt, NoShow, ActorRole::Staff, during).is_err());
        assert!(lifecycle.validate_status_transition(&apt, NoShow, ActorRole::Staff, at_end).is_ok());
    }

    #[test]
    fn apply_bumps_version_and_timestamp() {
        let lifecycle = AppointmentLifecycleService::new();
        let apt = appointment(Scheduled);
        let at = apt.updated_at + chrono::Duration::minutes(5);

        let next = lifecycle.apply_transition(&apt, Cancelled, Some("travelling".into()), at);
        assert_eq!(next.status, Cancelled);
        assert_eq!(next.version, 2);
        assert_eq!(next.updated_at, at);
        assert_eq!(next.status_note.as_deref(), Some("travelling"));
        assert_eq!(next.id, apt.id);
    }

    #[test]
    fn terminal_appointments_are_immutable() {
        let lifecycle = AppointmentLifecycleService::new();
        for status in [Completed, Cancelled, NoShow] {
            assert_eq!(
                lifecycle.ensure_mutable(&appointment(status)),
                Err(AppointmentError::Terminal { status })
            );
            assert!(lifecycle.get_valid_transitions(status).is_empty());
        }
    }
}
