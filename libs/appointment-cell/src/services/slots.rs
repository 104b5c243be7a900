// libs/appointment-cell/src/services/slots.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, instrument};
use uuid::Uuid;

use shared_config::SchedulingConfig;

use crate::clock::Clock;
use crate::models::{AppointmentError, DateRange, Interval, Slot, TimeRange};
use crate::services::availability::AvailabilitySource;
use crate::services::store::AppointmentRepository;

/// Derives offerable slots from working hours minus occupying bookings.
///
/// Reads are advisory: nothing is reserved, and every booking is re-validated
/// at admission time.
pub struct SlotAllocator {
    availability: Arc<dyn AvailabilitySource>,
    repository: Arc<AppointmentRepository>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl SlotAllocator {
    pub fn new(
        availability: Arc<dyn AvailabilitySource>,
        repository: Arc<AppointmentRepository>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        Self { availability, repository, clock, config }
    }

    #[instrument(skip(self))]
    pub async fn list_available_slots(
        &self,
        doctor_id: Uuid,
        range: DateRange,
        duration_minutes: u32,
    ) -> Result<AvailableSlots, AppointmentError> {
        if range.start > range.end {
            return Err(AppointmentError::validation("date_range", "range ends before it starts"));
        }
        if duration_minutes == 0 {
            return Err(AppointmentError::validation("duration_minutes", "must be positive"));
        }

        let now = self.clock.now_local();
        let horizon = horizon_end(now.date(), self.config.max_advance_booking_days);
        if range.end > horizon {
            return Err(AppointmentError::validation(
                "date_range",
                format!("cannot look beyond the scheduling horizon ({})", horizon),
            ));
        }

        // Days before today cannot offer anything.
        let range = DateRange::new(range.start.max(now.date()), range.end);
        if range.start > range.end {
            debug!("Requested range for doctor {} lies entirely in the past", doctor_id);
            return Ok(AvailableSlots {
                doctor_id,
                duration_minutes,
                not_before: now,
                days: Vec::new(),
            });
        }

        let mut occupied = self.availability.list_occupying_appointments(doctor_id, range).await?;
        occupied.extend(self.repository.occupying_intervals(doctor_id, range, None).await);

        let mut days = Vec::new();
        for date in range.days() {
            let hours = self.availability.get_working_hours(doctor_id, date).await?;
            let granularity = hours.granularity_minutes.max(1);

            if duration_minutes % granularity != 0 {
                return Err(AppointmentError::validation(
                    "duration_minutes",
                    format!("must be a multiple of {} minutes", granularity),
                ));
            }

            days.push(DayPlan {
                date,
                ranges: hours.ranges,
                granularity_minutes: granularity,
                occupied: occupied
                    .iter()
                    .filter(|interval| interval.start.date() <= date && date <= interval.end.date())
                    .copied()
                    .collect(),
            });
        }

        debug!("Planned {} day(s) of slots for doctor {} ({} occupied intervals)", days.len(), doctor_id, occupied.len());

        Ok(AvailableSlots {
            doctor_id,
            duration_minutes,
            not_before: now,
            days,
        })
    }
}

/// Last bookable date for a horizon measured from `today`.
pub(crate) fn horizon_end(today: NaiveDate, max_advance_days: u32) -> NaiveDate {
    today + Duration::days(i64::from(max_advance_days))
}

#[derive(Debug, Clone)]
struct DayPlan {
    date: NaiveDate,
    ranges: Vec<TimeRange>,
    granularity_minutes: u32,
    occupied: Vec<Interval>,
}

/// Snapshot of availability for one call. Iterating is lazy and can be repeated;
/// a fresh call is needed to see bookings made afterwards.
#[derive(Debug, Clone)]
pub struct AvailableSlots {
    pub doctor_id: Uuid,
    pub duration_minutes: u32,
    not_before: NaiveDateTime,
    days: Vec<DayPlan>,
}

impl AvailableSlots {
    pub fn iter(&self) -> SlotIter<'_> {
        SlotIter {
            slots: self,
            day: 0,
            range: 0,
            cursor: None,
        }
    }
}

impl<'a> IntoIterator for &'a AvailableSlots {
    type Item = Slot;
    type IntoIter = SlotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct SlotIter<'a> {
    slots: &'a AvailableSlots,
    day: usize,
    range: usize,
    cursor: Option<NaiveDateTime>,
}

impl Iterator for SlotIter<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let duration = self.slots.duration_minutes;

        loop {
            let plan = self.slots.days.get(self.day)?;
            let Some(window) = plan.ranges.get(self.range).map(|r| r.on(plan.date)) else {
                self.day += 1;
                self.range = 0;
                self.cursor = None;
                continue;
            };

            let tick = self.cursor.unwrap_or(window.start);
            let candidate = Interval::starting_at(tick, duration);

            if candidate.end > window.end {
                self.range += 1;
                self.cursor = None;
                continue;
            }

            self.cursor = Some(tick + Duration::minutes(i64::from(plan.granularity_minutes)));

            if tick < self.slots.not_before || plan.occupied.iter().any(|busy| busy.overlaps(&candidate)) {
                continue;
            }

            return Some(Slot {
                date: plan.date,
                start_time: tick.time(),
                duration_minutes: duration,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn plan(ranges: Vec<TimeRange>, occupied: Vec<Interval>, duration: u32) -> AvailableSlots {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        AvailableSlots {
            doctor_id: Uuid::new_v4(),
            duration_minutes: duration,
            not_before: date.and_hms_opt(0, 0, 0).unwrap(),
            days: vec![DayPlan { date, ranges, granularity_minutes: 30, occupied }],
        }
    }

    #[test]
    fn skips_ticks_that_overlap_bookings() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let slots = plan(
            vec![TimeRange::new(t(9, 0), t(12, 0))],
            vec![Interval::starting_at(date.and_time(t(10, 0)), 30)],
            30,
        );

        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![t(9, 0), t(9, 30), t(10, 30), t(11, 0), t(11, 30)]);
        // Restartable: a second pass yields the same sequence.
        assert_eq!(slots.iter().count(), 5);
    }

    #[test]
    fn longer_durations_must_fit_the_window() {
        let slots = plan(vec![TimeRange::new(t(9, 0), t(10, 30))], vec![], 60);
        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![t(9, 0), t(9, 30)]);
    }

    #[test]
    fn split_shifts_and_closed_days() {
        let slots = plan(
            vec![TimeRange::new(t(9, 0), t(10, 0)), TimeRange::new(t(14, 0), t(15, 0))],
            vec![],
            30,
        );
        assert_eq!(slots.iter().count(), 4);

        assert_eq!(plan(vec![], vec![], 30).iter().next(), None);
    }
}
