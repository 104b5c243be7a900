// libs/appointment-cell/src/services/notification.rs
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::ActorRole;

use crate::models::{
    AppointmentStatus, AppointmentType, NotificationError, NotificationPriority,
    NotificationRecord, RecipientRole, TransitionEvent,
};

/// Storage/delivery backend for notification records. The channel (in-app, email, ...) is the sink's business.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, record: NotificationRecord) -> Result<(), NotificationError>;

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, NotificationError>;

    async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<NotificationRecord, NotificationError>;
}

// ==============================================================================
// DISPATCHER
// ==============================================================================

/// Turns committed lifecycle events into role-targeted records and hands them
/// to the sink in the background. Never reports failure to its caller.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    in_flight: Mutex<JoinSet<()>>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    /// Fire-and-forget. Call exactly once per committed transition.
    pub fn notify(&self, event: TransitionEvent) {
        let records = build_records(&event);
        if records.is_empty() {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            error!(
                "No async runtime available, dropping {} notification(s) for appointment {}",
                records.len(),
                event.appointment.id
            );
            return;
        };

        debug!("Dispatching {} notification(s) for {} on {}", records.len(), event.change, event.appointment.id);

        let sink = Arc::clone(&self.sink);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        while in_flight.try_join_next().is_some() {}

        in_flight.spawn_on(
            async move {
                for record in records {
                    let (id, recipient) = (record.id, record.recipient_id);
                    match sink.deliver(record).await {
                        Ok(()) => debug!("Delivered notification {} to {}", id, recipient),
                        Err(e) => error!("Failed to deliver notification {} to {}: {}", id, recipient, e),
                    }
                }
            },
            &handle,
        );
    }

    /// Wait for every delivery started so far. Used on shutdown and in tests.
    pub async fn flush(&self) {
        let mut pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *in_flight)
        };

        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                error!("Notification delivery task failed: {}", e);
            }
        }
    }
}

/// Who hears about an event.
pub fn route(event: &TransitionEvent) -> Vec<(RecipientRole, Uuid)> {
    let apt = &event.appointment;
    let patient = (RecipientRole::Patient, apt.patient_id);
    let doctor = (RecipientRole::Doctor, apt.doctor_id);

    match (event.change.from, event.change.to) {
        (None, AppointmentStatus::Scheduled) => vec![patient, doctor],
        (Some(_), AppointmentStatus::Confirmed) => vec![patient],
        (Some(_), AppointmentStatus::Cancelled) => match event.actor.role {
            ActorRole::Patient => vec![doctor],
            ActorRole::Doctor | ActorRole::Staff => vec![patient],
        },
        (Some(_), AppointmentStatus::Completed) => vec![patient],
        (Some(_), AppointmentStatus::NoShow) => vec![doctor],
        _ => Vec::new(),
    }
}

/// Appointment priority, escalated for disruptive outcomes and emergencies.
pub fn derive_priority(event: &TransitionEvent) -> NotificationPriority {
    let base = NotificationPriority::from(event.appointment.priority);

    let priority = match event.change.to {
        AppointmentStatus::Cancelled | AppointmentStatus::NoShow => base.escalated(),
        _ => base,
    };

    if event.appointment.appointment_type == AppointmentType::Emergency {
        priority.max(NotificationPriority::High)
    } else {
        priority
    }
}

fn compose(event: &TransitionEvent, recipient: RecipientRole) -> (String, String) {
    let apt = &event.appointment;
    let when = format!("{} at {}", apt.appointment_date, apt.start_time.format("%H:%M"));
    let note = event
        .note
        .as_deref()
        .map(|n| format!(" Note: {}", n))
        .unwrap_or_default();

    match event.change.to {
        AppointmentStatus::Scheduled if recipient == RecipientRole::Doctor => (
            "New appointment booked".to_string(),
            format!("A {} appointment was booked with you on {}.", apt.appointment_type, when),
        ),
        AppointmentStatus::Scheduled => (
            "Appointment booked".to_string(),
            format!("Your {} appointment is booked for {}.", apt.appointment_type, when),
        ),
        AppointmentStatus::Confirmed => (
            "Appointment confirmed".to_string(),
            format!("Your appointment on {} has been confirmed.", when),
        ),
        AppointmentStatus::Cancelled => (
            "Appointment cancelled".to_string(),
            format!("The appointment on {} was cancelled by the {}.{}", when, event.actor.role, note),
        ),
        AppointmentStatus::Completed => (
            "Appointment completed".to_string(),
            format!("Your appointment on {} is complete. Book a follow-up if one was advised.", when),
        ),
        AppointmentStatus::NoShow => (
            "Patient did not attend".to_string(),
            format!("The patient did not attend the appointment on {}.", when),
        ),
    }
}

pub fn build_records(event: &TransitionEvent) -> Vec<NotificationRecord> {
    let priority = derive_priority(event);

    route(event)
        .into_iter()
        .map(|(recipient_role, recipient_id)| {
            let (title, message) = compose(event, recipient_role);
            NotificationRecord {
                id: Uuid::new_v4(),
                recipient_role,
                recipient_id,
                appointment_id: event.appointment.id,
                triggering_transition: event.change,
                title,
                message,
                priority,
                read: false,
                created_at: event.occurred_at,
            }
        })
        .collect()
}

// ==============================================================================
// SINKS
// ==============================================================================

/// In-process inbox.
#[derive(Default)]
pub struct InMemoryNotificationSink {
    records: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<NotificationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn deliver(&self, record: NotificationRecord) -> Result<(), NotificationError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, NotificationError> {
        let mut records: Vec<NotificationRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.recipient_id == recipient_id && (!unread_only || !r.read))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<NotificationRecord, NotificationError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == notification_id && r.recipient_id == recipient_id)
            .ok_or(NotificationError::NotFound)?;
        record.read = true;
        Ok(record.clone())
    }
}

/// Writes records to the `notifications` table over PostgREST.
pub struct RestNotificationSink {
    supabase: Arc<SupabaseClient>,
}

impl RestNotificationSink {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }
}

#[async_trait]
impl NotificationSink for RestNotificationSink {
    async fn deliver(&self, record: NotificationRecord) -> Result<(), NotificationError> {
        let body = serde_json::to_value(&record).map_err(|e| NotificationError::Delivery(e.to_string()))?;

        let _: Vec<serde_json::Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                None,
                Some(body),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        info!("Stored notification {} for {:?} {}", record.id, record.recipient_role, record.recipient_id);
        Ok(())
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, NotificationError> {
        let mut path = format!("/rest/v1/notifications?recipient_id=eq.{}&order=created_at.desc", recipient_id);
        if unread_only {
            path.push_str("&read=eq.false");
        }

        self.supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))
    }

    async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<NotificationRecord, NotificationError> {
        let path = format!(
            "/rest/v1/notifications?id=eq.{}&recipient_id=eq.{}",
            notification_id, recipient_id
        );

        let updated: Vec<NotificationRecord> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(json!({ "read": true })),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        updated.into_iter().next().ok_or(NotificationError::NotFound)
    }
}
