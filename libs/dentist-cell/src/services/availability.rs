// libs/dentist-cell/src/services/availability.rs
use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::postgrest::PostgrestClient;

use crate::models::{
    AvailabilityError, CreateExceptionRequest, CreateWorkingHoursRequest, ScheduleException,
    UpdateWorkingHoursRequest, WorkingHours,
};

pub struct AvailabilityService {
    client: PostgrestClient,
    default_slot_minutes: i32,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: PostgrestClient::new(config),
            default_slot_minutes: config.default_slot_minutes,
        }
    }

    /// Create a recurring working-hours row for a dentist.
    pub async fn create_working_hours(
        &self,
        dentist_id: Uuid,
        request: CreateWorkingHoursRequest,
        auth_token: &str,
    ) -> Result<WorkingHours, AvailabilityError> {
        debug!("Creating working hours for dentist {}", dentist_id);

        let slot_minutes = request.slot_minutes.unwrap_or(self.default_slot_minutes);
        Self::validate_window(request.day_of_week, request.start_time, request.end_time, slot_minutes)?;

        // Reject overlap with an existing row for the same dentist + weekday.
        let existing = self.working_hours_for_day(dentist_id, request.day_of_week, auth_token).await?;
        for row in &existing {
            if request.start_time < row.end_time && row.start_time < request.end_time {
                return Err(AvailabilityError::InvalidAvailability(format!(
                    "Working hours overlap an existing window ({} - {})",
                    row.start_time, row.end_time
                )));
            }
        }

        let now = Utc::now();
        let data = json!({
            "dentist_id": dentist_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "slot_minutes": slot_minutes,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .client
            .request_with_headers(Method::POST, "/rest/v1/working_hours", Some(auth_token), Some(data), Some(headers))
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Failed to create working hours".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse working hours: {}", e)))
    }

    pub async fn update_working_hours(
        &self,
        working_hours_id: Uuid,
        request: UpdateWorkingHoursRequest,
        auth_token: &str,
    ) -> Result<WorkingHours, AvailabilityError> {
        debug!("Updating working hours {}", working_hours_id);

        let current = self.get_working_hours(working_hours_id, auth_token).await?;

        let start_time = request.start_time.unwrap_or(current.start_time);
        let end_time = request.end_time.unwrap_or(current.end_time);
        let slot_minutes = request.slot_minutes.unwrap_or(current.slot_minutes);
        Self::validate_window(current.day_of_week, start_time, end_time, slot_minutes)?;

        let siblings = self
            .working_hours_for_day(current.dentist_id, current.day_of_week, auth_token)
            .await?;
        for row in siblings.iter().filter(|r| r.id != working_hours_id) {
            if start_time < row.end_time && row.start_time < end_time {
                return Err(AvailabilityError::InvalidAvailability(format!(
                    "Working hours overlap an existing window ({} - {})",
                    row.start_time, row.end_time
                )));
            }
        }

        let mut update = serde_json::Map::new();
        if let Some(t) = request.start_time {
            update.insert("start_time".to_string(), json!(t.format("%H:%M:%S").to_string()));
        }
        if let Some(t) = request.end_time {
            update.insert("end_time".to_string(), json!(t.format("%H:%M:%S").to_string()));
        }
        if let Some(m) = request.slot_minutes {
            update.insert("slot_minutes".to_string(), json!(m));
        }
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/working_hours?id=eq.{}", working_hours_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .client
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(Value::Object(update)), Some(headers))
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AvailabilityError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse working hours: {}", e)))
    }

    pub async fn delete_working_hours(
        &self,
        working_hours_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        debug!("Deleting working hours {}", working_hours_id);

        // Existing appointments are untouched: slots are re-derived, so a
        // schedule change never corrupts what is already booked.
        let path = format!("/rest/v1/working_hours?id=eq.{}", working_hours_id);
        let _: Vec<Value> = self
            .client
            .request(Method::DELETE, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn list_working_hours(
        &self,
        dentist_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<WorkingHours>, AvailabilityError> {
        let path = format!(
            "/rest/v1/working_hours?dentist_id=eq.{}&order=day_of_week.asc,start_time.asc",
            dentist_id
        );
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WorkingHours>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse working hours: {}", e)))
    }

    pub async fn create_exception(
        &self,
        dentist_id: Uuid,
        request: CreateExceptionRequest,
        auth_token: &str,
    ) -> Result<ScheduleException, AvailabilityError> {
        debug!(
            "Creating {} exception for dentist {} ({} to {})",
            request.kind, dentist_id, request.starts_on, request.ends_on
        );

        if request.starts_on > request.ends_on {
            return Err(AvailabilityError::InvalidAvailability(
                "Exception start date must not be after its end date".to_string(),
            ));
        }

        let data = json!({
            "dentist_id": dentist_id,
            "starts_on": request.starts_on,
            "ends_on": request.ends_on,
            "kind": request.kind,
            "reason": request.reason,
            "created_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .client
            .request_with_headers(Method::POST, "/rest/v1/schedule_exceptions", Some(auth_token), Some(data), Some(headers))
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Failed to create exception".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse exception: {}", e)))
    }

    pub async fn delete_exception(
        &self,
        exception_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let path = format!("/rest/v1/schedule_exceptions?id=eq.{}", exception_id);
        let _: Vec<Value> = self
            .client
            .request(Method::DELETE, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        Ok(())
    }

    /// Exceptions whose date range intersects [from, to].
    pub async fn list_exceptions(
        &self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, AvailabilityError> {
        let path = format!(
            "/rest/v1/schedule_exceptions?dentist_id=eq.{}&starts_on=lte.{}&ends_on=gte.{}&order=starts_on.asc",
            dentist_id, to, from
        );
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleException>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse exceptions: {}", e)))
    }

    async fn get_working_hours(
        &self,
        working_hours_id: Uuid,
        auth_token: &str,
    ) -> Result<WorkingHours, AvailabilityError> {
        let path = format!("/rest/v1/working_hours?id=eq.{}", working_hours_id);
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AvailabilityError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse working hours: {}", e)))
    }

    async fn working_hours_for_day(
        &self,
        dentist_id: Uuid,
        day_of_week: i16,
        auth_token: &str,
    ) -> Result<Vec<WorkingHours>, AvailabilityError> {
        let path = format!(
            "/rest/v1/working_hours?dentist_id=eq.{}&day_of_week=eq.{}&order=start_time.asc",
            dentist_id, day_of_week
        );
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WorkingHours>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse working hours: {}", e)))
    }

    fn validate_window(
        day_of_week: i16,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_minutes: i32,
    ) -> Result<(), AvailabilityError> {
        if !(0..=6).contains(&day_of_week) {
            return Err(AvailabilityError::InvalidAvailability(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if start_time >= end_time {
            return Err(AvailabilityError::InvalidAvailability(
                "Start time must be before end time".to_string(),
            ));
        }
        if slot_minutes <= 0 {
            return Err(AvailabilityError::InvalidAvailability(
                "Slot length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
