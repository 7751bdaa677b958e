// libs/appointment-cell/src/services/conflict.rs
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, BookingError};

pub struct ConflictService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Appointments of the doctor on the date that hold [start, end) against
    /// new bookings: status in {pending, confirmed}, interval overlapping.
    /// `exclude_appointment_id` drops the appointment being rescheduled.
    pub async fn conflicting_appointments(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        debug!(
            "Checking conflicts for doctor {} on {} from {} to {}",
            doctor_id, date, start_time, end_time
        );

        let mut query_parts = vec![
            format!("doctor_id=eq.{}", doctor_id),
            format!("scheduled_date=eq.{}", date),
            format!("start_time=lt.{}", end_time.format("%H:%M:%S")),
            format!("end_time=gt.{}", start_time.format("%H:%M:%S")),
            "status=in.(pending,confirmed)".to_string(),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        // Re-check in code what the range filters selected; only active
        // appointments hold their interval.
        let appointments: Vec<Appointment> = appointments
            .into_iter()
            .filter(|appointment| appointment.status.is_active())
            .filter(|appointment| {
                intervals_overlap(
                    start_time,
                    end_time,
                    appointment.start_time,
                    appointment.end_time,
                )
            })
            .collect();

        if !appointments.is_empty() {
            warn!(
                "Conflict detected for doctor {} on {}: {} overlapping appointments",
                doctor_id,
                date,
                appointments.len()
            );
        }

        Ok(appointments)
    }

    /// True when the interval is held by an active appointment.
    pub async fn has_overlap(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, BookingError> {
        let conflicts = self
            .conflicting_appointments(
                doctor_id,
                date,
                start_time,
                end_time,
                exclude_appointment_id,
                auth_token,
            )
            .await?;

        Ok(!conflicts.is_empty())
    }
}

/// Half-open interval overlap: [s1, e1) and [s2, e2) overlap iff
/// s1 < e2 and e1 > s2.
pub fn intervals_overlap(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    s1 < e2 && e1 > s2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_overlapping_intervals() {
        assert!(intervals_overlap(time(9, 0), time(9, 30), time(9, 15), time(9, 45)));
        assert!(intervals_overlap(time(9, 15), time(9, 45), time(9, 0), time(9, 30)));
        assert!(intervals_overlap(time(9, 0), time(10, 0), time(9, 15), time(9, 30)));
    }

    #[test]
    fn test_adjacent_intervals_do_not_overlap() {
        assert!(!intervals_overlap(time(9, 0), time(9, 30), time(9, 30), time(10, 0)));
        assert!(!intervals_overlap(time(9, 30), time(10, 0), time(9, 0), time(9, 30)));
    }

    #[test]
    fn test_disjoint_intervals_do_not_overlap() {
        assert!(!intervals_overlap(time(9, 0), time(9, 30), time(11, 0), time(11, 30)));
    }
}
