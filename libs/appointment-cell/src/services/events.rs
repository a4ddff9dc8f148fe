// libs/appointment-cell/src/services/events.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use shared_database::postgrest::PostgrestClient;

use crate::models::AppointmentEvent;

/// Append-only status-change rows consumed by the reporting collaborator.
/// The appointment row itself is the source of truth, so a failed event
/// write is logged and dropped rather than failing the user's operation.
pub struct AppointmentEventService {
    client: Arc<PostgrestClient>,
}

impl AppointmentEventService {
    pub fn new(client: Arc<PostgrestClient>) -> Self {
        Self { client }
    }

    pub async fn record(&self, event: AppointmentEvent, auth_token: &str) {
        info!(
            appointment_id = %event.appointment_id,
            dentist_id = %event.dentist_id,
            from_status = ?event.from_status,
            to_status = %event.to_status,
            actor_id = ?event.actor_id,
            "appointment status change"
        );

        let data = json!({
            "appointment_id": event.appointment_id,
            "dentist_id": event.dentist_id,
            "from_status": event.from_status,
            "to_status": event.to_status,
            "actor_id": event.actor_id,
            "recorded_at": event.recorded_at.to_rfc3339()
        });

        if let Err(e) = self
            .client
            .request::<Value>(Method::POST, "/rest/v1/appointment_events", Some(auth_token), Some(data))
            .await
        {
            warn!(
                "Failed to record appointment event for {}: {}",
                event.appointment_id, e
            );
        }
    }
}
