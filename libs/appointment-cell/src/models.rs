// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub service_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub staff_notes: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// An active appointment owns its time window exclusively.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Requested | AppointmentStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Requested,
    Confirmed,
    Cancelled,
    Completed,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Requested => write!(f, "requested"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Staff,
    System,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub service_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
    pub cancelled_by: CancelledBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_starts_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

/// Authorization decision computed by the caller (HTTP handler) and passed
/// into the engine. The engine itself never inspects roles.
#[derive(Debug, Clone)]
pub struct BookingCapability {
    pub actor_id: Option<Uuid>,
    /// May create/cancel/reschedule appointments for the named patient.
    pub may_book_for_patient: bool,
    /// Staff-level: confirm, complete, mark arrival, act on any appointment.
    pub may_manage: bool,
}

impl BookingCapability {
    pub fn patient(actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            may_book_for_patient: true,
            may_manage: false,
        }
    }

    pub fn staff(actor_id: Option<Uuid>) -> Self {
        Self {
            actor_id,
            may_book_for_patient: true,
            may_manage: true,
        }
    }

    pub fn denied() -> Self {
        Self {
            actor_id: None,
            may_book_for_patient: false,
            may_manage: false,
        }
    }
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

// ==============================================================================
// STATUS-CHANGE EVENTS (consumed by reporting)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub appointment_id: Uuid,
    pub dentist_id: Uuid,
    pub from_status: Option<AppointmentStatus>,
    pub to_status: AppointmentStatus,
    pub actor_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Service not found")]
    ServiceNotFound,

    #[error("No bookable slot begins at the requested time")]
    SlotNotFound,

    #[error("Appointment slot no longer available")]
    SlotUnavailable,

    #[error("Invalid availability: {0}")]
    InvalidAvailability(String),

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidTransition(AppointmentStatus),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(String),
}
