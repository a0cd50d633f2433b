// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest, SchedulingError,
    UpdateStatusRequest,
};
use crate::services::availability::AvailabilityService;
use crate::services::booking::BookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub code: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        SchedulingError::SlotAlreadyTaken => {
            AppError::Conflict("Appointment slot is already taken".to_string())
        }
        SchedulingError::InvalidSlot(msg) => AppError::BadRequest(msg),
        SchedulingError::InvalidStatusTransition(status) => {
            AppError::BadRequest(format!("Cannot transition from current status: {}", status))
        }
        SchedulingError::GenerationFailed => {
            AppError::Internal("Could not generate a unique confirmation code".to_string())
        }
        SchedulingError::StorageError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let availability_service = AvailabilityService::new(&state);

    let slots = availability_service
        .compute_slots(doctor_id, Utc::now(), token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "slots": slots,
        "total": slots.len()
    })))
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Patients book for themselves; admins can book on a patient's behalf.
    let is_own_booking = request.patient_id.to_string() == user.id;
    if !is_own_booking && !user.is_admin() {
        return Err(AppError::Auth(
            "Not authorized to book appointment for this patient".to_string(),
        ));
    }

    let booking_service = BookingService::new(&state);

    let booking = booking_service
        .book(request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": booking.appointment,
        "confirmation_code": booking.confirmation_code,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_doctor = appointment.doctor_id.to_string() == user.id;

    if !is_patient && !is_doctor && !user.is_admin() {
        return Err(AppError::Auth(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    Ok(Json(json!(appointment)))
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    // Only the treating doctor or an admin can move an appointment through
    // its lifecycle.
    let is_doctor = appointment.doctor_id.to_string() == user.id;
    if !is_doctor && !user.is_admin() {
        return Err(AppError::Auth(
            "Not authorized to update this appointment".to_string(),
        ));
    }

    let updated = booking_service
        .update_status(appointment_id, request.status, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated,
        "message": "Appointment status updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_doctor = appointment.doctor_id.to_string() == user.id;

    if !is_patient && !is_doctor && !user.is_admin() {
        return Err(AppError::Auth(
            "Not authorized to cancel this appointment".to_string(),
        ));
    }

    let canceled = booking_service
        .cancel(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": canceled,
        "message": "Appointment canceled successfully"
    })))
}

// ==============================================================================
// SEARCH AND LISTINGS
// ==============================================================================

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<AppointmentQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = BookingService::new(&state);

    let mut search_query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        doctor_id: params.doctor_id,
        status: params.status,
        code: params.code,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    // Non-admins only ever see their own appointments.
    if !user.is_admin() {
        if user.is_doctor() {
            if let Ok(doctor_uuid) = Uuid::parse_str(&user.id) {
                search_query.doctor_id = Some(doctor_uuid);
            }
        } else if let Ok(patient_uuid) = Uuid::parse_str(&user.id) {
            search_query.patient_id = Some(patient_uuid);
        }
    }

    let appointments = booking_service
        .search(search_query, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len(),
        "limit": params.limit,
        "offset": params.offset
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(params): Query<AppointmentQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let is_own_calendar = doctor_id.to_string() == user.id;
    if !is_own_calendar && !user.is_admin() {
        return Err(AppError::Auth(
            "Not authorized to view appointments for this doctor".to_string(),
        ));
    }

    let booking_service = BookingService::new(&state);

    let search_query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        doctor_id: Some(doctor_id),
        status: params.status,
        code: None,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    let appointments = booking_service
        .search(search_query, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "appointments": appointments,
        "total": appointments.len()
    })))
}

// ==============================================================================
// PUBLIC CONFIRMATION LOOKUP
// ==============================================================================

/// Public endpoint: staff and patients verify a printed confirmation code
/// without logging in. Reads go through the store's anonymous role.
#[axum::debug_handler]
pub async fn verify_confirmation_code(
    State(state): State<Arc<AppConfig>>,
    Path(code): Path<String>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .verify_code(&code, &state.supabase_anon_key)
        .await
        .map_err(|e| match e {
            SchedulingError::NotFound => {
                AppError::NotFound(format!("No appointment found for code {}", code.trim().to_uppercase()))
            }
            other => map_scheduling_error(other),
        })?;

    Ok(Json(json!({
        "found": true,
        "appointment": appointment
    })))
}
