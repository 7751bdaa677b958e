// libs/appointment-cell/src/services/reminders.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, BookingError, BookingPolicy, Reminder, ReminderChannel};

/// Derives reminder rows from confirmed appointments and hands due ones to
/// the external dispatch transport. Delivery itself is not this service's
/// concern; the transport calls back `mark_sent`.
pub struct ReminderService {
    supabase: Arc<SupabaseClient>,
    policy: BookingPolicy,
}

impl ReminderService {
    pub fn new(supabase: Arc<SupabaseClient>, policy: BookingPolicy) -> Self {
        Self { supabase, policy }
    }

    /// Create the reminder for a freshly confirmed appointment. Skipped
    /// without error when the fire time already passed or a reminder for the
    /// appointment exists (duplicate confirmations stay idempotent).
    pub async fn on_appointment_confirmed(
        &self,
        appointment: &Appointment,
        channel: Option<ReminderChannel>,
        auth_token: &str,
    ) -> Result<Option<Reminder>, BookingError> {
        let fire_at = compute_fire_at(
            appointment.scheduled_date,
            appointment.start_time,
            self.policy.reminder_lead_hours,
        );

        let now = Utc::now();
        if fire_at <= now {
            debug!(
                "Skipping reminder for appointment {}: fire time {} already passed",
                appointment.id, fire_at
            );
            return Ok(None);
        }

        let existing_path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}",
            appointment.id
        );
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &existing_path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if !existing.is_empty() {
            debug!("Reminder already exists for appointment {}", appointment.id);
            return Ok(None);
        }

        let reminder_data = json!({
            "appointment_id": appointment.id,
            "channel": channel.unwrap_or(ReminderChannel::Email).to_string(),
            "fire_at": fire_at.to_rfc3339(),
            "is_sent": false,
            "sent_at": null,
            "created_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/reminders",
                Some(auth_token),
                Some(reminder_data),
                Some(headers),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let reminder: Reminder = match result.first() {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| BookingError::DatabaseError(format!("Failed to parse reminder: {}", e)))?,
            None => {
                return Err(BookingError::DatabaseError(
                    "Failed to create reminder".to_string(),
                ))
            }
        };

        info!(
            "Reminder {} scheduled for appointment {} at {}",
            reminder.id, appointment.id, fire_at
        );
        Ok(Some(reminder))
    }

    /// Unsent reminders whose fire time has arrived, oldest first.
    pub async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Reminder>, BookingError> {
        let now_str = now.to_rfc3339();
        let path = format!(
            "/rest/v1/reminders?is_sent=eq.false&fire_at=lte.{}&order=fire_at.asc",
            urlencoding::encode(&now_str)
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| BookingError::DatabaseError(format!("Failed to parse reminder: {}", e)))
            })
            .collect()
    }

    /// Record a delivery. The `is_sent=eq.false` filter makes the second
    /// call a no-op, so the transport may retry freely.
    pub async fn mark_sent(
        &self,
        reminder_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let probe_path = format!("/rest/v1/reminders?id=eq.{}", reminder_id);
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &probe_path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if existing.is_empty() {
            return Err(BookingError::NotFound);
        }

        let path = format!(
            "/rest/v1/reminders?id=eq.{}&is_sent=eq.false",
            reminder_id
        );
        let body = json!({
            "is_sent": true,
            "sent_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            debug!("Reminder {} was already marked sent", reminder_id);
        } else {
            info!("Reminder {} marked sent", reminder_id);
        }

        Ok(())
    }
}

/// Reminder fire instant: appointment start minus the configured lead.
pub fn compute_fire_at(date: NaiveDate, start_time: NaiveTime, lead_hours: i64) -> DateTime<Utc> {
    date.and_time(start_time).and_utc() - Duration::hours(lead_hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fire_at_is_lead_before_start() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let fire_at = compute_fire_at(date, start, 24);
        assert_eq!(fire_at, Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_fire_at_with_short_lead() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let fire_at = compute_fire_at(date, start, 2);
        assert_eq!(fire_at, Utc.with_ymd_and_hms(2025, 6, 3, 7, 0, 0).unwrap());
    }
}
