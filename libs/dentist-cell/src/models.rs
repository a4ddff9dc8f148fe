// libs/dentist-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// Recurring weekly availability template for one dentist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHours {
    pub id: Uuid,
    pub dentist_id: Uuid,
    pub day_of_week: i16, // 0 = Sunday, 1 = Monday, ...
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkingHours {
    /// A window is usable when it spans forward in time and carries a
    /// positive slot length. Malformed rows are skipped by the generator
    /// instead of failing the whole query.
    pub fn is_well_formed(&self) -> bool {
        self.start_time < self.end_time && self.slot_minutes > 0
    }
}

/// Date-bound override that removes availability (vacation, holiday,
/// blocked maintenance day). Inclusive on both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleException {
    pub id: Uuid,
    pub dentist_id: Uuid,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub kind: ExceptionKind,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleException {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.starts_on <= date && date <= self.ends_on
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    Blocked,
    Holiday,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Blocked => write!(f, "blocked"),
            ExceptionKind::Holiday => write!(f, "holiday"),
        }
    }
}

// ==============================================================================
// DERIVED SLOT MODELS
// ==============================================================================

/// A discrete bookable time window. Slots are derived on demand from
/// WorkingHours minus ScheduleExceptions minus active appointments and are
/// never persisted, so they cannot drift out of sync with bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub dentist_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Open,
    Held,   // covered by a requested appointment awaiting staff confirmation
    Booked, // covered by a confirmed (or completed) appointment
}

/// Appointment view the slot generator subtracts from availability. Kept
/// minimal so this cell does not depend on the appointment cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: String,
}

impl BookedWindow {
    pub fn holds_slot(&self) -> bool {
        self.status == "requested"
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkingHoursRequest {
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWorkingHoursRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub slot_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExceptionRequest {
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub kind: ExceptionKind,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Restart cursor: only slots strictly after this instant are returned,
    /// so callers can page through a range without re-reading it.
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// When true, held and booked slots are included alongside open ones.
    pub include_taken: Option<bool>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Invalid availability: {0}")]
    InvalidAvailability(String),

    #[error("Working hours not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),
}
