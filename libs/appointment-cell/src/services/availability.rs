// libs/appointment-cell/src/services/availability.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingConfig};
use shared_database::supabase::SupabaseClient;

use crate::models::{AppointmentError, DateRange, Interval, TimeRange, WorkingHours};

/// Where working-hour templates and externally held bookings come from.
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    async fn get_working_hours(&self, doctor_id: Uuid, date: NaiveDate) -> Result<WorkingHours, AppointmentError>;

    /// Occupying bookings that live outside this engine (legacy calendar, other systems).
    async fn list_occupying_appointments(
        &self,
        doctor_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<Interval>, AppointmentError>;
}

// ==============================================================================
// IN-MEMORY TEMPLATE
// ==============================================================================

#[derive(Default)]
struct DoctorTemplate {
    weekly: HashMap<Weekday, Vec<TimeRange>>,
    date_overrides: HashMap<NaiveDate, Vec<TimeRange>>,
    granularity_minutes: Option<u32>,
    external_bookings: Vec<Interval>,
}

/// Working hours held in memory: a clinic-wide default plus per-doctor weekly
/// templates and date overrides (an empty override closes the day).
pub struct WorkingHoursTemplate {
    default_ranges: Vec<TimeRange>,
    default_granularity_minutes: u32,
    doctors: RwLock<HashMap<Uuid, DoctorTemplate>>,
}

impl WorkingHoursTemplate {
    pub fn new(default_ranges: Vec<TimeRange>, default_granularity_minutes: u32) -> Self {
        Self {
            default_ranges,
            default_granularity_minutes,
            doctors: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SchedulingConfig) -> Result<Self, AppointmentError> {
        let ranges = TimeRange::parse_list(&config.default_working_hours)?;
        Ok(Self::new(ranges, config.slot_granularity_minutes))
    }

    pub async fn set_weekly_hours(&self, doctor_id: Uuid, weekday: Weekday, ranges: Vec<TimeRange>) {
        let mut doctors = self.doctors.write().await;
        doctors.entry(doctor_id).or_default().weekly.insert(weekday, ranges);
    }

    pub async fn set_date_override(&self, doctor_id: Uuid, date: NaiveDate, ranges: Vec<TimeRange>) {
        let mut doctors = self.doctors.write().await;
        doctors.entry(doctor_id).or_default().date_overrides.insert(date, ranges);
    }

    pub async fn set_granularity(&self, doctor_id: Uuid, minutes: u32) {
        let mut doctors = self.doctors.write().await;
        doctors.entry(doctor_id).or_default().granularity_minutes = Some(minutes);
    }

    pub async fn add_external_booking(&self, doctor_id: Uuid, interval: Interval) {
        let mut doctors = self.doctors.write().await;
        doctors.entry(doctor_id).or_default().external_bookings.push(interval);
    }
}

#[async_trait]
impl AvailabilitySource for WorkingHoursTemplate {
    async fn get_working_hours(&self, doctor_id: Uuid, date: NaiveDate) -> Result<WorkingHours, AppointmentError> {
        let doctors = self.doctors.read().await;
        let template = doctors.get(&doctor_id);

        let ranges = template
            .and_then(|t| {
                t.date_overrides
                    .get(&date)
                    .or_else(|| t.weekly.get(&date.weekday()))
            })
            .cloned()
            .unwrap_or_else(|| self.default_ranges.clone());

        let granularity_minutes = template
            .and_then(|t| t.granularity_minutes)
            .unwrap_or(self.default_granularity_minutes);

        Ok(WorkingHours { ranges, granularity_minutes })
    }

    async fn list_occupying_appointments(
        &self,
        doctor_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<Interval>, AppointmentError> {
        let doctors = self.doctors.read().await;
        Ok(doctors
            .get(&doctor_id)
            .map(|t| {
                t.external_bookings
                    .iter()
                    .filter(|interval| range.contains(interval.start.date()))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ==============================================================================
// POSTGREST-BACKED SOURCE
// ==============================================================================

#[derive(Debug, Deserialize)]
struct WorkingHoursRow {
    /// 0 = Sunday .. 6 = Saturday
    day_of_week: Option<u32>,
    start_time: NaiveTime,
    end_time: NaiveTime,
    duration_minutes: Option<u32>,
    specific_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    is_available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BookingRow {
    appointment_date: NaiveDate,
    start_time: NaiveTime,
    duration_minutes: u32,
}

/// Reads `doctor_working_hours` and externally held `appointments` rows over PostgREST.
pub struct RestAvailabilitySource {
    supabase: Arc<SupabaseClient>,
    default_granularity_minutes: u32,
}

impl RestAvailabilitySource {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            default_granularity_minutes: config.scheduling.slot_granularity_minutes,
        }
    }
}

fn postgrest_day_of_week(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

#[async_trait]
impl AvailabilitySource for RestAvailabilitySource {
    async fn get_working_hours(&self, doctor_id: Uuid, date: NaiveDate) -> Result<WorkingHours, AppointmentError> {
        let path = format!(
            "/rest/v1/doctor_working_hours?doctor_id=eq.{}&select=*",
            doctor_id
        );

        let rows: Vec<WorkingHoursRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AppointmentError::AvailabilityUnavailable(e.to_string()))?;

        debug!("Fetched {} working-hour rows for doctor {}", rows.len(), doctor_id);

        // Date-specific rows replace the weekly template for that day.
        let specific: Vec<&WorkingHoursRow> = rows.iter().filter(|row| row.specific_date == Some(date)).collect();
        let selected: Vec<&WorkingHoursRow> = if specific.is_empty() {
            rows.iter()
                .filter(|row| row.specific_date.is_none())
                .filter(|row| row.day_of_week == Some(postgrest_day_of_week(date)))
                .collect()
        } else {
            specific
        };

        let granularity_minutes = selected
            .iter()
            .filter_map(|row| row.duration_minutes)
            .filter(|minutes| *minutes > 0)
            .min()
            .unwrap_or(self.default_granularity_minutes);

        let ranges = selected
            .iter()
            .filter(|row| row.is_available)
            .filter(|row| {
                if row.start_time >= row.end_time {
                    warn!("Ignoring inverted working-hours row for doctor {}", doctor_id);
                    return false;
                }
                true
            })
            .map(|row| TimeRange::new(row.start_time, row.end_time))
            .collect();

        Ok(WorkingHours { ranges, granularity_minutes })
    }

    async fn list_occupying_appointments(
        &self,
        doctor_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<Interval>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=gte.{}&appointment_date=lte.{}&status=in.(scheduled,confirmed)&select=appointment_date,start_time,duration_minutes",
            doctor_id, range.start, range.end
        );

        let rows: Vec<BookingRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AppointmentError::AvailabilityUnavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| Interval::starting_at(row.appointment_date.and_time(row.start_time), row.duration_minutes))
            .collect())
    }
}
