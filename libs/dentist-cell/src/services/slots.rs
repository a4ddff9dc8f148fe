// libs/dentist-cell/src/services/slots.rs
//
// Slot derivation. Slots are computed on demand from working hours minus
// schedule exceptions minus active appointments; no slot table exists, so a
// schedule edit can never corrupt already-booked appointments.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::postgrest::PostgrestClient;

use crate::models::{
    AvailabilityError, BookedWindow, ScheduleException, Slot, SlotRangeQuery, SlotStatus,
    WorkingHours,
};

/// Derive the slots of a single date from already-fetched rows.
///
/// Walks each working-hours window in `slot_minutes` steps, truncating a
/// trailing remainder that does not fit a whole slot. Malformed windows are
/// skipped, a date covered by an exception yields nothing, and the result is
/// ordered by start time with overlaps between windows dropped.
pub fn slots_for_day(
    dentist_id: Uuid,
    date: NaiveDate,
    schedules: &[WorkingHours],
    exceptions: &[ScheduleException],
    booked: &[BookedWindow],
) -> Vec<Slot> {
    if exceptions.iter().any(|e| e.covers(date)) {
        return Vec::new();
    }

    let day_of_week = date.weekday().num_days_from_sunday() as i16;
    let mut slots = Vec::new();

    for schedule in schedules.iter().filter(|s| s.day_of_week == day_of_week) {
        if !schedule.is_well_formed() {
            warn!(
                "Skipping malformed working hours {} for dentist {}",
                schedule.id, schedule.dentist_id
            );
            continue;
        }

        let step = Duration::minutes(schedule.slot_minutes as i64);
        let window_end = date.and_time(schedule.end_time).and_utc();
        let mut current = date.and_time(schedule.start_time).and_utc();

        while current + step <= window_end {
            let slot_end = current + step;
            slots.push(Slot {
                dentist_id,
                starts_at: current,
                ends_at: slot_end,
                status: slot_status(current, slot_end, booked),
            });
            current = slot_end;
        }
    }

    slots.sort_by_key(|s| s.starts_at);

    // Overlapping windows across schedule rows would yield overlapping
    // slots; keep the earliest and drop the rest so the per-dentist
    // non-overlap invariant always holds.
    let mut result: Vec<Slot> = Vec::with_capacity(slots.len());
    let mut last_end = DateTime::<Utc>::MIN_UTC;
    for slot in slots {
        if slot.starts_at >= last_end {
            last_end = slot.ends_at;
            result.push(slot);
        }
    }

    result
}

fn slot_status(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>, booked: &[BookedWindow]) -> SlotStatus {
    let mut status = SlotStatus::Open;
    for window in booked {
        if starts_at < window.ends_at && window.starts_at < ends_at {
            if window.holds_slot() {
                if status == SlotStatus::Open {
                    status = SlotStatus::Held;
                }
            } else {
                return SlotStatus::Booked;
            }
        }
    }
    status
}

pub struct SlotGenerator {
    client: PostgrestClient,
}

impl SlotGenerator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: PostgrestClient::new(config),
        }
    }

    /// Ordered, restartable slot sequence for a dentist over a date range.
    ///
    /// Open slots only unless `include_taken` is set. The `after` cursor
    /// resumes a previous page; `limit` caps the page size.
    pub async fn slots_for_range(
        &self,
        dentist_id: Uuid,
        query: &SlotRangeQuery,
        auth_token: &str,
    ) -> Result<Vec<Slot>, AvailabilityError> {
        if query.from > query.to {
            return Err(AvailabilityError::InvalidAvailability(
                "Range start must not be after range end".to_string(),
            ));
        }

        debug!(
            "Deriving slots for dentist {} from {} to {}",
            dentist_id, query.from, query.to
        );

        // Past dates are never bookable.
        let today = Utc::now().date_naive();
        let from = query.from.max(today);
        if from > query.to {
            return Ok(Vec::new());
        }

        let schedules = self.fetch_working_hours(dentist_id, auth_token).await?;
        let exceptions = self.fetch_exceptions(dentist_id, from, query.to, auth_token).await?;
        let booked = self.fetch_booked_windows(dentist_id, from, query.to, auth_token).await?;

        let include_taken = query.include_taken.unwrap_or(false);
        let mut slots = Vec::new();

        let mut date = from;
        while date <= query.to {
            for slot in slots_for_day(dentist_id, date, &schedules, &exceptions, &booked) {
                if let Some(after) = query.after {
                    if slot.starts_at <= after {
                        continue;
                    }
                }
                if !include_taken && slot.status != SlotStatus::Open {
                    continue;
                }
                slots.push(slot);
            }
            if let Some(limit) = query.limit {
                if slots.len() >= limit {
                    slots.truncate(limit);
                    return Ok(slots);
                }
            }
            date += Duration::days(1);
        }

        Ok(slots)
    }

    /// Commit-time slot validation for the booking engine: does the
    /// schedule actually yield a slot starting at this instant? Occupancy
    /// is deliberately ignored here; claiming the window is the storage
    /// layer's job.
    pub async fn generated_slot_at(
        &self,
        dentist_id: Uuid,
        starts_at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Option<Slot>, AvailabilityError> {
        let date = starts_at.date_naive();
        let schedules = self.fetch_working_hours(dentist_id, auth_token).await?;
        let exceptions = self.fetch_exceptions(dentist_id, date, date, auth_token).await?;

        let slot = slots_for_day(dentist_id, date, &schedules, &exceptions, &[])
            .into_iter()
            .find(|s| s.starts_at == starts_at);

        Ok(slot)
    }

    async fn fetch_working_hours(
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

    async fn fetch_exceptions(
        &self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, AvailabilityError> {
        let path = format!(
            "/rest/v1/schedule_exceptions?dentist_id=eq.{}&starts_on=lte.{}&ends_on=gte.{}",
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

    async fn fetch_booked_windows(
        &self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<BookedWindow>, AvailabilityError> {
        let range_start = from.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let range_end = (to + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();

        let path = format!(
            "/rest/v1/appointments?dentist_id=eq.{}&status=in.(requested,confirmed,completed)&starts_at=gte.{}&starts_at=lt.{}&select=starts_at,ends_at,status&order=starts_at.asc",
            dentist_id,
            urlencoding::encode(&range_start.to_rfc3339()),
            urlencoding::encode(&range_end.to_rfc3339())
        );
        let result: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<BookedWindow>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse appointments: {}", e)))
    }
}
