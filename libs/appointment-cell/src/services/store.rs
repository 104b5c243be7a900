// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentFilter, DateRange, Interval};

/// Named mutual-exclusion regions, e.g. one per `(doctor, date)` or per appointment id.
///
/// Entries are created on demand and pruned once nobody holds or waits on them.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    acquire_timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    /// Waits for the region. Gives up with `ConcurrencyConflict` after the configured timeout.
    pub async fn acquire(&self, key: K) -> Result<OwnedMutexGuard<()>, AppointmentError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        match timeout(self.acquire_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                debug!("Acquired scheduling lock {:?}", key);
                Ok(guard)
            }
            Err(_) => {
                warn!("Timed out after {:?} waiting for scheduling lock {:?}", self.acquire_timeout, key);
                Err(AppointmentError::ConcurrencyConflict)
            }
        }
    }

    pub fn active_keys(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

/// Lock key for admission: every booking for one doctor on one day is serialized.
pub type AdmissionKey = (Uuid, NaiveDate);

/// Authoritative in-process appointment store.
///
/// Mutations are crate-private: status only changes through the booking service.
#[derive(Default)]
pub struct AppointmentRepository {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl AppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(&self, appointment: Appointment) {
        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.id, appointment);
    }

    /// Replaces the stored record only if the caller saw the current version.
    pub(crate) async fn replace(&self, appointment: Appointment, seen_version: u64) -> Result<(), AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let current = appointments
            .get_mut(&appointment.id)
            .ok_or(AppointmentError::NotFound)?;

        if current.version != seen_version {
            warn!(
                "Appointment {} changed underneath update (saw v{}, now v{})",
                appointment.id, seen_version, current.version
            );
            return Err(AppointmentError::ConcurrencyConflict);
        }

        *current = appointment;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<Appointment> {
        self.appointments.read().await.get(&id).cloned()
    }

    /// Occupying intervals for a doctor within the date range, optionally ignoring one appointment.
    pub async fn occupying_intervals(
        &self,
        doctor_id: Uuid,
        range: DateRange,
        exclude: Option<Uuid>,
    ) -> Vec<Interval> {
        self.appointments
            .read()
            .await
            .values()
            .filter(|apt| apt.doctor_id == doctor_id)
            .filter(|apt| apt.is_occupying())
            .filter(|apt| range.contains(apt.appointment_date))
            .filter(|apt| Some(apt.id) != exclude)
            .map(Appointment::interval)
            .collect()
    }

    /// Matching appointments ordered by date, start time, then priority high to low.
    pub async fn find(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let mut matches: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|apt| filter.matches(apt))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            a.scheduled_start()
                .cmp(&b.scheduled_start())
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        matches
    }
}
