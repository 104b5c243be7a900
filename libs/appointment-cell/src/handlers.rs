// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{actor_context, ValidatedJson};

use crate::models::{
    AppointmentError, AppointmentFilter, AppointmentStatus, BookAppointmentRequest, DateRange,
    NotificationError, RescheduleAppointmentRequest, Slot, TransitionRequest,
    UpdateAppointmentDetailsRequest,
};
use crate::router::AppState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub doctor_id: Uuid,
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQueryParams {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        let kind = e.kind().to_string();
        match &e {
            AppointmentError::Validation { .. } => AppError::ValidationError(e.to_string()),
            AppointmentError::NotFound => AppError::NotFound(e.to_string()),
            AppointmentError::OutsideWorkingHours | AppointmentError::PastDate => {
                AppError::Unprocessable { kind, message: e.to_string() }
            }
            AppointmentError::SlotOccupied
            | AppointmentError::InvalidTransition { .. }
            | AppointmentError::Terminal { .. }
            | AppointmentError::ConcurrencyConflict => AppError::Conflict { kind, message: e.to_string() },
            AppointmentError::AvailabilityUnavailable(msg) => AppError::ExternalService(msg.clone()),
        }
    }
}

impl From<NotificationError> for AppError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::NotFound => AppError::NotFound("Notification not found".to_string()),
            NotificationError::Delivery(msg) => AppError::ExternalService(msg),
        }
    }
}

// ==============================================================================
// SLOT AND BOOKING HANDLERS
// ==============================================================================

pub async fn list_available_slots(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    actor_context(&user)?;

    let range = DateRange::new(query.from, query.to.unwrap_or(query.from));
    let slots = state
        .booking
        .list_available_slots(query.doctor_id, range, query.duration_minutes)
        .await?;

    let slots: Vec<Value> = slots
        .iter()
        .map(|slot: Slot| json!({
            "date": slot.date,
            "start_time": slot.start_time,
            "end_time": slot.end_time(),
            "duration_minutes": slot.duration_minutes
        }))
        .collect();

    Ok(Json(json!({
        "doctor_id": query.doctor_id,
        "slots": slots,
        "total": slots.len()
    })))
}

pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    ValidatedJson(request): ValidatedJson<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = actor_context(&user)?;

    let appointment = state.booking.book_appointment(actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked successfully"
        })),
    ))
}

pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;
    let appointment = state.booking.get_appointment(appointment_id, &actor).await?;
    Ok(Json(json!(appointment)))
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;

    let filter = AppointmentFilter {
        doctor_id: params.doctor_id,
        patient_id: params.patient_id,
        date: params.date,
        status: params.status,
    };
    let appointments = state.booking.list_appointments(&actor, &filter).await;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

pub async fn transition_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    ValidatedJson(request): ValidatedJson<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;

    let appointment = state.booking.transition(appointment_id, actor, request).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

pub async fn reschedule_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    ValidatedJson(request): ValidatedJson<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;

    let replacement = state
        .booking
        .reschedule_appointment(appointment_id, actor, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "cancelled_appointment_id": appointment_id,
        "appointment": replacement,
        "message": "Appointment rescheduled successfully"
    })))
}

pub async fn update_appointment_details(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    ValidatedJson(request): ValidatedJson<UpdateAppointmentDetailsRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;
    let appointment = state.booking.update_details(appointment_id, actor, request).await?;
    Ok(Json(json!(appointment)))
}

// ==============================================================================
// NOTIFICATION HANDLERS
// ==============================================================================

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;
    let notifications = state.booking.list_notifications(&actor, query.unread_only).await?;

    Ok(Json(json!({
        "notifications": notifications,
        "unread": notifications.iter().filter(|n| !n.read).count()
    })))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_context(&user)?;
    let notification = state.booking.mark_notification_read(&actor, notification_id).await?;
    Ok(Json(json!(notification)))
}
