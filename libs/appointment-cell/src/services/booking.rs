// libs/appointment-cell/src/services/booking.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dentist_cell::services::slots::SlotGenerator;
use shared_config::{AppConfig, ConfirmationPolicy};
use shared_database::postgrest::{DbError, PostgrestClient};

use crate::models::{
    Appointment, AppointmentError, AppointmentEvent, AppointmentSearchQuery, AppointmentStatus,
    BookAppointmentRequest, BookingCapability, CancelAppointmentRequest,
    RescheduleAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::events::AppointmentEventService;
use crate::services::lifecycle::AppointmentLifecycleService;

pub struct AppointmentBookingService {
    client: Arc<PostgrestClient>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    event_service: AppointmentEventService,
    slot_generator: SlotGenerator,
    confirmation_policy: ConfirmationPolicy,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let client = Arc::new(PostgrestClient::new(config));

        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&client)),
            lifecycle_service: AppointmentLifecycleService::new(),
            event_service: AppointmentEventService::new(Arc::clone(&client)),
            slot_generator: SlotGenerator::new(config),
            confirmation_policy: config.confirmation_policy,
            client,
        }
    }

    /// Book a slot for a patient.
    ///
    /// Availability is re-validated here, at commit time, not just when the
    /// slot was displayed: the requested start must still be a slot the
    /// generator derives, and the INSERT runs into the store's unique index
    /// on active (dentist, start) pairs. The index is the linearizable
    /// commit point - of two concurrent claims on one window, exactly one
    /// INSERT succeeds and the other surfaces as `SlotUnavailable`.
    pub async fn book_appointment(
        &self,
        capability: &BookingCapability,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with dentist {} at {}",
            request.patient_id, request.dentist_id, request.starts_at
        );

        if !capability.may_book_for_patient {
            return Err(AppointmentError::Unauthorized);
        }

        if request.starts_at <= Utc::now() {
            return Err(AppointmentError::Validation(
                "Appointment must be scheduled for a future time".to_string(),
            ));
        }

        self.verify_patient_exists(&request.patient_id, auth_token).await?;
        let service_duration = self.fetch_service_duration(&request.service_id, auth_token).await?;

        // The slot must still derive from current working hours and
        // exceptions - a stale availability view is not honored.
        let slot = self
            .slot_generator
            .generated_slot_at(request.dentist_id, request.starts_at, auth_token)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?
            .ok_or(AppointmentError::SlotNotFound)?;

        let slot_minutes = (slot.ends_at - slot.starts_at).num_minutes() as i32;
        if service_duration > slot_minutes {
            return Err(AppointmentError::Validation(format!(
                "Service needs {} minutes but the slot is {} minutes",
                service_duration, slot_minutes
            )));
        }

        // Friendly pre-check; the INSERT below is what actually decides.
        let conflict_check = self
            .conflict_service
            .check_conflicts(request.dentist_id, slot.starts_at, slot.ends_at, None, auth_token)
            .await?;

        if conflict_check.has_conflict {
            warn!(
                "Conflict detected for dentist {} at {}",
                request.dentist_id, request.starts_at
            );
            return Err(AppointmentError::SlotUnavailable);
        }

        let initial_status = match self.confirmation_policy {
            ConfirmationPolicy::StaffConfirm => AppointmentStatus::Requested,
            ConfirmationPolicy::DirectConfirm => AppointmentStatus::Confirmed,
        };

        let appointment = self
            .create_appointment_record(&request, slot.ends_at, initial_status, auth_token)
            .await?;

        self.event_service
            .record(
                AppointmentEvent {
                    appointment_id: appointment.id,
                    dentist_id: appointment.dentist_id,
                    from_status: None,
                    to_status: appointment.status,
                    actor_id: capability.actor_id,
                    recorded_at: Utc::now(),
                },
                auth_token,
            )
            .await;

        info!(
            "Appointment {} booked ({}) for dentist {}",
            appointment.id, appointment.status, appointment.dentist_id
        );
        Ok(appointment)
    }

    /// Staff approval: requested -> confirmed.
    pub async fn confirm_appointment(
        &self,
        capability: &BookingCapability,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Confirming appointment {}", appointment_id);

        if !capability.may_manage {
            return Err(AppointmentError::Unauthorized);
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle_service
            .validate_status_transition(&current.status, &AppointmentStatus::Confirmed)?;

        let now = Utc::now();
        let update = json!({
            "status": AppointmentStatus::Confirmed,
            "confirmed_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let updated = self.patch_appointment(appointment_id, update, auth_token).await?;

        self.event_service
            .record(
                AppointmentEvent {
                    appointment_id: updated.id,
                    dentist_id: updated.dentist_id,
                    from_status: Some(current.status),
                    to_status: updated.status,
                    actor_id: capability.actor_id,
                    recorded_at: now,
                },
                auth_token,
            )
            .await;

        Ok(updated)
    }

    /// Soft-cancel. The row is kept for audit history; the window becomes
    /// implicitly open again because slots are re-derived, never flagged.
    pub async fn cancel_appointment(
        &self,
        capability: &BookingCapability,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.authorize_for(capability, &current)?;
        self.lifecycle_service
            .validate_status_transition(&current.status, &AppointmentStatus::Cancelled)?;

        let now = Utc::now();
        let update = json!({
            "status": AppointmentStatus::Cancelled,
            "cancelled_by": request.cancelled_by,
            "cancellation_reason": request.reason,
            "updated_at": now.to_rfc3339()
        });

        let updated = self.patch_appointment(appointment_id, update, auth_token).await?;

        self.event_service
            .record(
                AppointmentEvent {
                    appointment_id: updated.id,
                    dentist_id: updated.dentist_id,
                    from_status: Some(current.status),
                    to_status: updated.status,
                    actor_id: capability.actor_id,
                    recorded_at: now,
                },
                auth_token,
            )
            .await;

        info!("Appointment {} cancelled", appointment_id);
        Ok(updated)
    }

    /// Confirmed -> completed. Stamps the arrival time when staff never
    /// recorded one explicitly.
    pub async fn complete_appointment(
        &self,
        capability: &BookingCapability,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Completing appointment {}", appointment_id);

        if !capability.may_manage {
            return Err(AppointmentError::Unauthorized);
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle_service
            .validate_status_transition(&current.status, &AppointmentStatus::Completed)?;

        let now = Utc::now();
        let mut update = serde_json::Map::new();
        update.insert("status".to_string(), json!(AppointmentStatus::Completed));
        update.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if current.arrived_at.is_none() {
            update.insert("arrived_at".to_string(), json!(now.to_rfc3339()));
        }

        let updated = self
            .patch_appointment(appointment_id, Value::Object(update), auth_token)
            .await?;

        self.event_service
            .record(
                AppointmentEvent {
                    appointment_id: updated.id,
                    dentist_id: updated.dentist_id,
                    from_status: Some(current.status),
                    to_status: updated.status,
                    actor_id: capability.actor_id,
                    recorded_at: now,
                },
                auth_token,
            )
            .await;

        Ok(updated)
    }

    /// Record that the patient showed up. Not a lifecycle transition.
    pub async fn mark_arrived(
        &self,
        capability: &BookingCapability,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if !capability.may_manage {
            return Err(AppointmentError::Unauthorized);
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;
        if !current.is_active() {
            return Err(AppointmentError::InvalidTransition(current.status));
        }

        let now = Utc::now();
        let update = json!({
            "arrived_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        self.patch_appointment(appointment_id, update, auth_token).await
    }

    /// Reschedule as cancel-old + book-new in one storage transaction.
    ///
    /// The two writes run inside a database function, so exclusivity is
    /// never violated mid-operation: a conflict on the new window rolls the
    /// whole call back and the old appointment stays active.
    pub async fn reschedule_appointment(
        &self,
        capability: &BookingCapability,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!(
            "Rescheduling appointment {} to {}",
            appointment_id, request.new_starts_at
        );

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.authorize_for(capability, &current)?;

        if !self.lifecycle_service.can_reschedule(&current.status) {
            return Err(AppointmentError::InvalidTransition(current.status));
        }

        if request.new_starts_at <= Utc::now() {
            return Err(AppointmentError::Validation(
                "Rescheduled time must be in the future".to_string(),
            ));
        }

        let slot = self
            .slot_generator
            .generated_slot_at(current.dentist_id, request.new_starts_at, auth_token)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?
            .ok_or(AppointmentError::SlotNotFound)?;

        let result: Vec<Value> = self
            .client
            .rpc(
                "reschedule_appointment",
                Some(auth_token),
                json!({
                    "p_appointment_id": appointment_id,
                    "p_new_starts_at": slot.starts_at.to_rfc3339(),
                    "p_new_ends_at": slot.ends_at.to_rfc3339(),
                    "p_reason": request.reason
                }),
            )
            .await
            .map_err(|e| match e {
                DbError::Conflict(_) => AppointmentError::SlotUnavailable,
                DbError::NotFound(_) => AppointmentError::NotFound,
                other => AppointmentError::Database(other.to_string()),
            })?;

        let replacement = result
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("Reschedule returned no appointment".to_string()))?;
        let replacement: Appointment = serde_json::from_value(replacement)
            .map_err(|e| AppointmentError::Database(format!("Failed to parse appointment: {}", e)))?;

        let now = Utc::now();
        self.event_service
            .record(
                AppointmentEvent {
                    appointment_id: current.id,
                    dentist_id: current.dentist_id,
                    from_status: Some(current.status),
                    to_status: AppointmentStatus::Cancelled,
                    actor_id: capability.actor_id,
                    recorded_at: now,
                },
                auth_token,
            )
            .await;
        self.event_service
            .record(
                AppointmentEvent {
                    appointment_id: replacement.id,
                    dentist_id: replacement.dentist_id,
                    from_status: None,
                    to_status: replacement.status,
                    actor_id: capability.actor_id,
                    recorded_at: now,
                },
                auth_token,
            )
            .await;

        info!(
            "Appointment {} rescheduled to {} as {}",
            appointment_id, replacement.starts_at, replacement.id
        );
        Ok(replacement)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AppointmentError::Database(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Searching appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(dentist_id) = query.dentist_id {
            query_parts.push(format!("dentist_id=eq.{}", dentist_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            let encoded = urlencoding::encode(&from_date.to_rfc3339()).into_owned();
            query_parts.push(format!("starts_at=gte.{}", encoded));
        }
        if let Some(to_date) = query.to_date {
            let encoded = urlencoding::encode(&to_date.to_rfc3339()).into_owned();
            query_parts.push(format!("starts_at=lte.{}", encoded));
        }

        let mut path = format!(
            "/rest/v1/appointments?{}&order=starts_at.asc",
            query_parts.join("&")
        );

        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

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

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    /// Acting on an existing appointment: staff may always, a patient only
    /// on their own record.
    fn authorize_for(
        &self,
        capability: &BookingCapability,
        appointment: &Appointment,
    ) -> Result<(), AppointmentError> {
        if capability.may_manage {
            return Ok(());
        }
        if capability.may_book_for_patient && capability.actor_id == Some(appointment.patient_id) {
            return Ok(());
        }
        Err(AppointmentError::Unauthorized)
    }

    async fn verify_patient_exists(
        &self,
        patient_id: &Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::PatientNotFound);
        }

        Ok(())
    }

    /// Service catalog contract: we only consume the duration.
    async fn fetch_service_duration(
        &self,
        service_id: &Uuid,
        auth_token: &str,
    ) -> Result<i32, AppointmentError> {
        let path = format!("/rest/v1/services?id=eq.{}", service_id);
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let service = result.first().ok_or(AppointmentError::ServiceNotFound)?;

        if !service["is_active"].as_bool().unwrap_or(true) {
            return Err(AppointmentError::ServiceNotFound);
        }

        let duration = service["duration_minutes"].as_i64().unwrap_or(0) as i32;
        if duration <= 0 {
            return Err(AppointmentError::Validation(
                "Service has no usable duration".to_string(),
            ));
        }

        Ok(duration)
    }

    async fn create_appointment_record(
        &self,
        request: &BookAppointmentRequest,
        ends_at: chrono::DateTime<Utc>,
        status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();

        let appointment_data = json!({
            "patient_id": request.patient_id,
            "dentist_id": request.dentist_id,
            "service_id": request.service_id,
            "starts_at": request.starts_at.to_rfc3339(),
            "ends_at": ends_at.to_rfc3339(),
            "status": status,
            "reason": request.reason,
            "confirmed_at": match status {
                AppointmentStatus::Confirmed => Some(now.to_rfc3339()),
                _ => None,
            },
            "requested_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .client
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(headers),
            )
            .await
            .map_err(|e| match e {
                // Unique-violation on the active (dentist, start) index:
                // another request claimed this window first.
                DbError::Conflict(_) => AppointmentError::SlotUnavailable,
                other => AppointmentError::Database(other.to_string()),
            })?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("Failed to create appointment".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| AppointmentError::Database(format!("Failed to parse created appointment: {}", e)))
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        update: Value,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .client
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(update), Some(headers))
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AppointmentError::Database(format!("Failed to parse updated appointment: {}", e)))
    }
}
