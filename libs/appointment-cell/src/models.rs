// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt;

use shared_models::auth::{ActorContext, ActorRole};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub appointment_type: AppointmentType,
    pub priority: AppointmentPriority,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Note supplied with the most recent status change (cancellation reason etc.).
    pub status_note: Option<String>,
    /// Optimistic concurrency token, bumped on every mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn scheduled_start(&self) -> NaiveDateTime {
        self.appointment_date.and_time(self.start_time)
    }

    pub fn scheduled_end(&self) -> NaiveDateTime {
        self.scheduled_start() + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.scheduled_start(), self.scheduled_end())
    }

    pub fn is_occupying(&self) -> bool {
        self.status.is_occupying()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `actor` may see (and therefore act on) this appointment.
    pub fn is_visible_to(&self, actor: &ActorContext) -> bool {
        match actor.role {
            ActorRole::Staff => true,
            ActorRole::Doctor => self.doctor_id == actor.actor_ref,
            ActorRole::Patient => self.patient_id == actor.actor_ref,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    #[serde(alias = "Scheduled")]
    Scheduled,
    #[serde(alias = "Confirmed")]
    Confirmed,
    #[serde(alias = "Completed")]
    Completed,
    #[serde(alias = "Cancelled", alias = "canceled")]
    Cancelled,
    #[serde(alias = "no_show", alias = "No-Show", alias = "NoShow")]
    NoShow,
}

impl AppointmentStatus {
    /// Scheduled and confirmed appointments still reserve their interval.
    pub fn is_occupying(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no-show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentType {
    #[serde(alias = "Consultation")]
    Consultation,
    #[serde(alias = "follow_up", alias = "followup", alias = "Follow-up")]
    FollowUp,
    #[serde(alias = "Procedure")]
    Procedure,
    #[serde(alias = "Emergency")]
    Emergency,
    #[serde(alias = "Routine")]
    Routine,
    #[serde(alias = "Surgery")]
    Surgery,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::Consultation => write!(f, "consultation"),
            AppointmentType::FollowUp => write!(f, "follow-up"),
            AppointmentType::Procedure => write!(f, "procedure"),
            AppointmentType::Emergency => write!(f, "emergency"),
            AppointmentType::Routine => write!(f, "routine"),
            AppointmentType::Surgery => write!(f, "surgery"),
        }
    }
}

/// Display/ordering hint only; admission never looks at it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentPriority {
    #[serde(alias = "Low")]
    Low,
    #[default]
    #[serde(alias = "Normal")]
    Normal,
    #[serde(alias = "High")]
    High,
}

impl fmt::Display for AppointmentPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentPriority::Low => write!(f, "low"),
            AppointmentPriority::Normal => write!(f, "normal"),
            AppointmentPriority::High => write!(f, "high"),
        }
    }
}

// ==============================================================================
// TIME MODELS
// ==============================================================================

/// Half-open `[start, end)` interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: NaiveDateTime, duration_minutes: u32) -> Self {
        Self::new(start, start + Duration::minutes(i64::from(duration_minutes)))
    }

    /// `[a,b)` and `[c,d)` conflict iff `a < d && c < b`; adjacent intervals do not.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A daily working window, e.g. 09:00-12:00.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn on(&self, date: NaiveDate) -> Interval {
        Interval::new(date.and_time(self.start), date.and_time(self.end))
    }

    /// Parse a comma separated list such as `"09:00-12:00,13:00-17:00"`.
    pub fn parse_list(raw: &str) -> Result<Vec<TimeRange>, AppointmentError> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (start, end) = part.split_once('-').ok_or_else(|| {
                    AppointmentError::validation("working_hours", format!("'{}' is not a HH:MM-HH:MM range", part))
                })?;
                let start = parse_clock_time(start.trim())?;
                let end = parse_clock_time(end.trim())?;
                if start >= end {
                    return Err(AppointmentError::validation(
                        "working_hours",
                        format!("range '{}' ends before it starts", part),
                    ));
                }
                Ok(TimeRange::new(start, end))
            })
            .collect()
    }
}

fn parse_clock_time(raw: &str) -> Result<NaiveTime, AppointmentError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AppointmentError::validation("working_hours", format!("'{}' is not a valid time", raw)))
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }
}

/// A doctor's published working windows for one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkingHours {
    pub ranges: Vec<TimeRange>,
    pub granularity_minutes: u32,
}

impl WorkingHours {
    pub fn contains(&self, date: NaiveDate, interval: &Interval) -> bool {
        self.ranges.iter().any(|range| {
            let window = range.on(date);
            window.start <= interval.start && interval.end <= window.end
        })
    }
}

/// Offerable, non-persisted candidate interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn interval(&self) -> Interval {
        Interval::starting_at(self.date.and_time(self.start_time), self.duration_minutes)
    }

    pub fn end_time(&self) -> NaiveTime {
        self.interval().end.time()
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    /// Falls back to the configured default (30) when absent.
    pub duration_minutes: Option<i64>,
    pub appointment_type: AppointmentType,
    #[serde(default)]
    pub priority: AppointmentPriority,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Staff recording a visit after the fact; skips the past-date check.
    #[serde(default)]
    pub backdated_entry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target_status: AppointmentStatus,
    pub note: Option<String>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_date: NaiveDate,
    pub new_start_time: NaiveTime,
    pub new_duration_minutes: Option<i64>,
    pub reason: Option<String>,
}

/// Partial update; `None` or blank text leaves the stored value as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentDetailsRequest {
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.date.map_or(true, |date| appointment.appointment_date == date)
            && self.status.map_or(true, |status| appointment.status == status)
    }
}

// ==============================================================================
// NOTIFICATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Patient,
    Doctor,
    Staff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn escalated(self) -> Self {
        match self {
            NotificationPriority::Low => NotificationPriority::Normal,
            NotificationPriority::Normal => NotificationPriority::High,
            NotificationPriority::High | NotificationPriority::Urgent => NotificationPriority::Urgent,
        }
    }
}

impl From<AppointmentPriority> for NotificationPriority {
    fn from(priority: AppointmentPriority) -> Self {
        match priority {
            AppointmentPriority::Low => NotificationPriority::Low,
            AppointmentPriority::Normal => NotificationPriority::Normal,
            AppointmentPriority::High => NotificationPriority::High,
        }
    }
}

/// The lifecycle edge that produced a notification. `from` is `None` on creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub from: Option<AppointmentStatus>,
    pub to: AppointmentStatus,
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "{} -> {}", from, self.to),
            None => write!(f, "created -> {}", self.to),
        }
    }
}

/// A committed lifecycle change together with the appointment as it stood afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub change: StatusChange,
    pub appointment: Appointment,
    pub actor: ActorContext,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient_role: RecipientRole,
    pub recipient_id: Uuid,
    pub appointment_id: Uuid,
    pub triggering_transition: StatusChange,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AppointmentError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Requested interval overlaps an existing booking")]
    SlotOccupied,

    #[error("Requested interval is outside the doctor's working hours")]
    OutsideWorkingHours,

    #[error("Requested time is in the past")]
    PastDate,

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment is {status} and can no longer be modified")]
    Terminal { status: AppointmentStatus },

    #[error("Appointment not found")]
    NotFound,

    #[error("Lost a concurrent update race, re-fetch and retry")]
    ConcurrencyConflict,

    #[error("Availability source error: {0}")]
    AvailabilityUnavailable(String),
}

impl AppointmentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppointmentError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable error kind shown to clients so they can pick a corrective action.
    pub fn kind(&self) -> &'static str {
        match self {
            AppointmentError::Validation { .. } => "ValidationError",
            AppointmentError::SlotOccupied => "SlotOccupied",
            AppointmentError::OutsideWorkingHours => "OutsideWorkingHours",
            AppointmentError::PastDate => "PastDate",
            AppointmentError::InvalidTransition { .. } | AppointmentError::Terminal { .. } => "InvalidTransition",
            AppointmentError::NotFound => "NotFound",
            AppointmentError::ConcurrencyConflict => "ConcurrencyConflict",
            AppointmentError::AvailabilityUnavailable(_) => "AvailabilityUnavailable",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification not found")]
    NotFound,
}
