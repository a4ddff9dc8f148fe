// libs/appointment-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::postgrest::PostgrestClient;

use crate::models::{Appointment, AppointmentError, ConflictCheckResponse};

/// Pre-commit conflict check. This is a fast path for a friendly error
/// message; the authoritative exclusivity decision is the unique index the
/// booking INSERT runs into.
pub struct ConflictDetectionService {
    client: Arc<PostgrestClient>,
}

impl ConflictDetectionService {
    pub fn new(client: Arc<PostgrestClient>) -> Self {
        Self { client }
    }

    pub async fn check_conflicts(
        &self,
        dentist_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        debug!(
            "Checking conflicts for dentist {} from {} to {}",
            dentist_id, starts_at, ends_at
        );

        let existing = self
            .appointments_in_range(dentist_id, starts_at, ends_at, exclude_appointment_id, auth_token)
            .await?;

        let conflicting_appointments: Vec<Appointment> = existing
            .into_iter()
            .filter(|apt| apt.is_active())
            .filter(|apt| windows_overlap(starts_at, ends_at, apt.starts_at, apt.ends_at))
            .collect();

        let has_conflict = !conflicting_appointments.is_empty();
        if has_conflict {
            warn!(
                "Conflict detected for dentist {} - {} active appointments in window",
                dentist_id,
                conflicting_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
        })
    }

    async fn appointments_in_range(
        &self,
        dentist_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("dentist_id=eq.{}", dentist_id),
            format!("starts_at=lt.{}", urlencoding::encode(&ends_at.to_rfc3339())),
            format!("ends_at=gt.{}", urlencoding::encode(&starts_at.to_rfc3339())),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=starts_at.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::Database(format!("Failed to parse appointments: {}", e)))
    }
}

/// Two half-open windows overlap when each starts before the other ends.
pub fn windows_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}
