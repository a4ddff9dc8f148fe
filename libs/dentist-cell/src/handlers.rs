// libs/dentist-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityError, CreateExceptionRequest, CreateWorkingHoursRequest, SlotRangeQuery,
    UpdateWorkingHoursRequest,
};
use crate::services::availability::AvailabilityService;
use crate::services::slots::SlotGenerator;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ExceptionRangeParams {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct SlotRangeParams {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub include_taken: Option<bool>,
}

fn map_availability_error(e: AvailabilityError) -> AppError {
    match e {
        AvailabilityError::InvalidAvailability(msg) => AppError::BadRequest(msg),
        AvailabilityError::NotFound => AppError::NotFound("Working hours not found".to_string()),
        AvailabilityError::Database(msg) => AppError::Database(msg),
    }
}

/// Schedule management is restricted to staff, admins, and the dentist
/// whose calendar it is.
fn can_manage_schedule(user: &User, dentist_id: Uuid) -> bool {
    user.is_staff() || (user.is_dentist() && user.id == dentist_id.to_string())
}

// ==============================================================================
// WORKING HOURS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_working_hours(
    State(state): State<Arc<AppConfig>>,
    Path(dentist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);

    let working_hours = service
        .list_working_hours(dentist_id, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({ "working_hours": working_hours })))
}

#[axum::debug_handler]
pub async fn create_working_hours(
    State(state): State<Arc<AppConfig>>,
    Path(dentist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateWorkingHoursRequest>,
) -> Result<Json<Value>, AppError> {
    if !can_manage_schedule(&user, dentist_id) {
        return Err(AppError::Auth(
            "Not authorized to manage this dentist's schedule".to_string(),
        ));
    }

    let service = AvailabilityService::new(&state);

    let working_hours = service
        .create_working_hours(dentist_id, request, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "success": true,
        "working_hours": working_hours
    })))
}

#[axum::debug_handler]
pub async fn update_working_hours(
    State(state): State<Arc<AppConfig>>,
    Path(working_hours_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateWorkingHoursRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() && !user.is_dentist() {
        return Err(AppError::Auth(
            "Not authorized to manage working hours".to_string(),
        ));
    }

    let service = AvailabilityService::new(&state);

    let working_hours = service
        .update_working_hours(working_hours_id, request, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "success": true,
        "working_hours": working_hours
    })))
}

#[axum::debug_handler]
pub async fn delete_working_hours(
    State(state): State<Arc<AppConfig>>,
    Path(working_hours_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        return Err(AppError::Auth(
            "Not authorized to delete working hours".to_string(),
        ));
    }

    let service = AvailabilityService::new(&state);

    service
        .delete_working_hours(working_hours_id, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({ "success": true })))
}

// ==============================================================================
// SCHEDULE EXCEPTION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_exceptions(
    State(state): State<Arc<AppConfig>>,
    Path(dentist_id): Path<Uuid>,
    Query(params): Query<ExceptionRangeParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);

    let exceptions = service
        .list_exceptions(dentist_id, params.from, params.to, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({ "exceptions": exceptions })))
}

#[axum::debug_handler]
pub async fn create_exception(
    State(state): State<Arc<AppConfig>>,
    Path(dentist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    if !can_manage_schedule(&user, dentist_id) {
        return Err(AppError::Auth(
            "Not authorized to manage this dentist's schedule".to_string(),
        ));
    }

    let service = AvailabilityService::new(&state);

    let exception = service
        .create_exception(dentist_id, request, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "success": true,
        "exception": exception
    })))
}

#[axum::debug_handler]
pub async fn delete_exception(
    State(state): State<Arc<AppConfig>>,
    Path(exception_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() && !user.is_dentist() {
        return Err(AppError::Auth(
            "Not authorized to delete schedule exceptions".to_string(),
        ));
    }

    let service = AvailabilityService::new(&state);

    service
        .delete_exception(exception_id, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({ "success": true })))
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_slots(
    State(state): State<Arc<AppConfig>>,
    Path(dentist_id): Path<Uuid>,
    Query(params): Query<SlotRangeParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let generator = SlotGenerator::new(&state);

    let query = SlotRangeQuery {
        from: params.from,
        to: params.to,
        after: params.after,
        limit: params.limit,
        include_taken: params.include_taken,
    };

    let slots = generator
        .slots_for_range(dentist_id, &query, auth.token())
        .await
        .map_err(map_availability_error)?;

    // The cursor for the next page is the last slot start in this one.
    let next_after = slots.last().map(|s| s.starts_at);

    Ok(Json(json!({
        "dentist_id": dentist_id,
        "slots": slots,
        "next_after": next_after
    })))
}
