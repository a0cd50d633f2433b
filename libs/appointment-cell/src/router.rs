// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        // Booking flow
        .route("/", post(handlers::book_appointment))
        .route("/availability/{doctor_id}", get(handlers::get_availability))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", post(handlers::update_appointment_status))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        // Listings
        .route("/search", get(handlers::search_appointments))
        .route("/doctors/{doctor_id}", get(handlers::get_doctor_appointments))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Confirmation codes are printed on handouts; verification stays public.
    let public_routes = Router::new()
        .route("/verify/{code}", get(handlers::verify_confirmation_code));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}
