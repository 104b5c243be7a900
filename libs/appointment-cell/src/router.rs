// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::booking::AppointmentBookingService;

/// Shared by every appointment handler.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<AppointmentBookingService>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, booking: Arc<AppointmentBookingService>) -> Self {
        Self { config, booking }
    }
}

pub fn appointment_routes(state: Arc<AppState>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment).get(handlers::list_appointments))
        .route("/slots", get(handlers::list_available_slots))
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/{notification_id}/read", post(handlers::mark_notification_read))
        .route("/{appointment_id}", get(handlers::get_appointment).patch(handlers::update_appointment_details))
        .route("/{appointment_id}/transition", post(handlers::transition_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
