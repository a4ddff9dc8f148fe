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
    AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    BookingCapability, CancelAppointmentRequest, RescheduleAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

fn actor_id(user: &User) -> Option<Uuid> {
    Uuid::parse_str(&user.id).ok()
}

/// Authorization decision for acting on appointments, computed here and
/// passed into the engine as data.
fn capability_for(user: &User) -> BookingCapability {
    if user.is_staff() {
        BookingCapability::staff(actor_id(user))
    } else if let Some(id) = actor_id(user) {
        BookingCapability::patient(id)
    } else {
        BookingCapability::denied()
    }
}

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        AppointmentError::ServiceNotFound => AppError::NotFound("Service not found".to_string()),
        AppointmentError::SlotNotFound => {
            AppError::NotFound("No bookable slot begins at the requested time".to_string())
        }
        AppointmentError::SlotUnavailable => {
            AppError::Conflict("Appointment slot no longer available".to_string())
        }
        AppointmentError::InvalidTransition(status) => {
            AppError::Conflict(format!("Appointment cannot be modified in status {}", status))
        }
        AppointmentError::InvalidAvailability(msg) => AppError::BadRequest(msg),
        AppointmentError::Validation(msg) => AppError::BadRequest(msg),
        AppointmentError::Unauthorized => {
            AppError::Auth("Not authorized for this appointment".to_string())
        }
        AppointmentError::Database(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    // Only the patient themselves or staff may book for a patient.
    let is_patient = request.patient_id.to_string() == user.id;
    if !is_patient && !user.is_staff() {
        return Err(AppError::Auth(
            "Not authorized to book appointment for this patient".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);
    let capability = capability_for(&user);

    let appointment = booking_service
        .book_appointment(&capability, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": match appointment.status {
            AppointmentStatus::Confirmed => "Appointment booked and confirmed",
            _ => "Appointment requested - awaiting staff confirmation",
        }
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_appointment_error)?;

    // Only the patient, the dentist involved, or staff may view.
    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_dentist = appointment.dentist_id.to_string() == user.id;
    if !is_patient && !is_dentist && !user.is_staff() {
        return Err(AppError::Auth("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<AppointmentQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let mut query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        dentist_id: params.dentist_id,
        status: params.status,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    // Non-staff searches are scoped to the caller's own records.
    if !user.is_staff() {
        let own_id = actor_id(&user)
            .ok_or_else(|| AppError::Auth("Invalid user identity".to_string()))?;
        if user.is_dentist() {
            query.dentist_id = Some(own_id);
        } else {
            query.patient_id = Some(own_id);
        }
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service
        .search_appointments(query, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if patient_id.to_string() != user.id && !user.is_staff() {
        return Err(AppError::Auth(
            "Not authorized to view this patient's appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service
        .search_appointments(
            AppointmentSearchQuery {
                patient_id: Some(patient_id),
                ..Default::default()
            },
            auth.token(),
        )
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn get_dentist_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(dentist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if dentist_id.to_string() != user.id && !user.is_staff() {
        return Err(AppError::Auth(
            "Not authorized to view this dentist's appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service
        .search_appointments(
            AppointmentSearchQuery {
                dentist_id: Some(dentist_id),
                ..Default::default()
            },
            auth.token(),
        )
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        return Err(AppError::Auth("Only staff may confirm appointments".to_string()));
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .confirm_appointment(&capability_for(&user), appointment_id, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment confirmed"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .cancel_appointment(&capability_for(&user), appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        return Err(AppError::Auth("Only staff may complete appointments".to_string()));
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .complete_appointment(&capability_for(&user), appointment_id, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment completed"
    })))
}

#[axum::debug_handler]
pub async fn mark_arrived(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        return Err(AppError::Auth("Only staff may record arrivals".to_string()));
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .mark_arrived(&capability_for(&user), appointment_id, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .reschedule_appointment(&capability_for(&user), appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled"
    })))
}
