// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingConfig;

use crate::clock::Clock;
use crate::models::{AppointmentError, DateRange, Interval};
use crate::services::availability::AvailabilitySource;
use crate::services::slots::horizon_end;
use crate::services::store::AppointmentRepository;

/// One booking candidate as seen by the validator.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionCandidate {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    /// Staff backfilling a visit that already happened.
    pub allow_past: bool,
    /// Appointment being replaced by this candidate; ignored in the overlap check.
    pub replacing: Option<Uuid>,
}

impl AdmissionCandidate {
    pub fn interval(&self) -> Interval {
        Interval::starting_at(self.date.and_time(self.start_time), self.duration_minutes)
    }
}

/// Strict overlap validation: no preemption, not even for emergencies.
///
/// Only meaningful when called inside the admission lock for `(doctor, date)`.
pub struct ConflictValidator {
    availability: Arc<dyn AvailabilitySource>,
    repository: Arc<AppointmentRepository>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl ConflictValidator {
    pub fn new(
        availability: Arc<dyn AvailabilitySource>,
        repository: Arc<AppointmentRepository>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        Self { availability, repository, clock, config }
    }

    #[instrument(skip(self))]
    pub async fn check_admissible(&self, candidate: &AdmissionCandidate) -> Result<(), AppointmentError> {
        let interval = candidate.interval();
        let now = self.clock.now_local();

        if !candidate.allow_past && interval.start < now {
            warn!("Rejecting booking for doctor {} at {}: in the past", candidate.doctor_id, interval.start);
            return Err(AppointmentError::PastDate);
        }

        let horizon = horizon_end(now.date(), self.config.max_advance_booking_days);
        if candidate.date > horizon {
            return Err(AppointmentError::validation(
                "appointment_date",
                format!("beyond the scheduling horizon ({})", horizon),
            ));
        }

        let hours = self.availability.get_working_hours(candidate.doctor_id, candidate.date).await?;
        let granularity = hours.granularity_minutes.max(1);
        if candidate.duration_minutes % granularity != 0 {
            return Err(AppointmentError::validation(
                "duration_minutes",
                format!("must be a multiple of {} minutes", granularity),
            ));
        }

        if !hours.contains(candidate.date, &interval) {
            warn!(
                "Rejecting booking for doctor {} at {}: outside working hours",
                candidate.doctor_id, interval.start
            );
            return Err(AppointmentError::OutsideWorkingHours);
        }

        let day = DateRange::single(candidate.date);
        let mut occupied = self
            .availability
            .list_occupying_appointments(candidate.doctor_id, day)
            .await?;
        occupied.extend(
            self.repository
                .occupying_intervals(candidate.doctor_id, day, candidate.replacing)
                .await,
        );

        if let Some(busy) = occupied.iter().find(|busy| busy.overlaps(&interval)) {
            warn!(
                "Rejecting booking for doctor {} at {}: overlaps {} - {}",
                candidate.doctor_id, interval.start, busy.start, busy.end
            );
            return Err(AppointmentError::SlotOccupied);
        }

        debug!("Candidate {} - {} admissible for doctor {}", interval.start, interval.end, candidate.doctor_id);
        Ok(())
    }
}
