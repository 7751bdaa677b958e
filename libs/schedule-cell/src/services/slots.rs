// libs/schedule-cell/src/services/slots.rs
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{ScheduleError, SlotGranularity, TimeRange, TimeSlot};
use crate::services::availability::AvailabilityService;

pub struct SlotService {
    supabase: SupabaseClient,
    availability: AvailabilityService,
}

impl SlotService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            availability: AvailabilityService::new(config),
        }
    }

    /// Materialize the doctor's slots for a date from the effective
    /// availability. Inserts go through the unique index on
    /// (doctor_id, slot_date, start_time, end_time) with duplicates ignored,
    /// so regenerating the same date never creates a second row for an
    /// interval. Returns the stored slots for the date.
    pub async fn generate_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        granularity: SlotGranularity,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        debug!("Generating slots for doctor {} on {}", doctor_id, date);

        let ranges = self
            .availability
            .effective_availability(doctor_id, date, auth_token)
            .await?;

        let candidates = partition_ranges(&ranges, granularity);

        if !candidates.is_empty() {
            let rows: Vec<Value> = candidates
                .iter()
                .map(|range| {
                    json!({
                        "doctor_id": doctor_id,
                        "slot_date": date,
                        "start_time": range.start.format("%H:%M:%S").to_string(),
                        "end_time": range.end.format("%H:%M:%S").to_string(),
                        "is_available": true,
                        "appointment_id": null,
                        "created_at": Utc::now().to_rfc3339(),
                        "updated_at": Utc::now().to_rfc3339()
                    })
                })
                .collect();

            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                "Prefer",
                reqwest::header::HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
            );

            let _: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::POST,
                    "/rest/v1/time_slots?on_conflict=doctor_id,slot_date,start_time,end_time",
                    Some(auth_token),
                    Some(Value::Array(rows)),
                    Some(headers),
                )
                .await
                .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;
        }

        self.slots_for_date(doctor_id, date, auth_token).await
    }

    /// Available, unlinked slots for a doctor/date with already-started
    /// intervals filtered out. Past slots stay in storage; they just stop
    /// being listed.
    pub async fn list_open_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        let path = format!(
            "/rest/v1/time_slots?doctor_id=eq.{}&slot_date=eq.{}&is_available=eq.true&order=start_time.asc",
            doctor_id, date
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let slots = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<TimeSlot>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse slots: {}", e)))?;

        Ok(slots
            .into_iter()
            .filter(|slot| !slot_has_started(slot.slot_date, slot.start_time, now))
            .collect())
    }

    async fn slots_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        let path = format!(
            "/rest/v1/time_slots?doctor_id=eq.{}&slot_date=eq.{}&order=start_time.asc",
            doctor_id, date
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<TimeSlot>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse slots: {}", e)))
    }
}

/// Cut availability ranges into slot intervals.
pub fn partition_ranges(ranges: &[TimeRange], granularity: SlotGranularity) -> Vec<TimeRange> {
    match granularity {
        SlotGranularity::WholeRange => ranges.to_vec(),
        SlotGranularity::FixedMinutes(minutes) => {
            if minutes <= 0 {
                return Vec::new();
            }

            let step = Duration::minutes(minutes);
            let mut slots = Vec::new();

            for range in ranges {
                let mut cursor = range.start;
                loop {
                    let (slot_end, wrapped) = cursor.overflowing_add_signed(step);
                    if wrapped != 0 || slot_end > range.end {
                        break;
                    }
                    slots.push(TimeRange::new(cursor, slot_end));
                    cursor = slot_end;
                }
            }

            slots
        }
    }
}

/// A slot has started once its date is past, or it is today and the start
/// time is behind the current time.
pub fn slot_has_started(slot_date: NaiveDate, start_time: chrono::NaiveTime, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if slot_date < today {
        return true;
    }
    slot_date == today && start_time < now.time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_whole_range_keeps_windows() {
        let ranges = vec![
            TimeRange::new(time(9, 0), time(12, 0)),
            TimeRange::new(time(14, 0), time(17, 0)),
        ];

        let slots = partition_ranges(&ranges, SlotGranularity::WholeRange);
        assert_eq!(slots, ranges);
    }

    #[test]
    fn test_fixed_partition_fills_range() {
        let ranges = vec![TimeRange::new(time(9, 0), time(10, 30))];

        let slots = partition_ranges(&ranges, SlotGranularity::FixedMinutes(30));
        assert_eq!(slots, vec![
            TimeRange::new(time(9, 0), time(9, 30)),
            TimeRange::new(time(9, 30), time(10, 0)),
            TimeRange::new(time(10, 0), time(10, 30)),
        ]);
    }

    #[test]
    fn test_fixed_partition_drops_remainder() {
        let ranges = vec![TimeRange::new(time(9, 0), time(9, 50))];

        let slots = partition_ranges(&ranges, SlotGranularity::FixedMinutes(30));
        assert_eq!(slots, vec![TimeRange::new(time(9, 0), time(9, 30))]);
    }

    #[test]
    fn test_fixed_partition_does_not_wrap_midnight() {
        let ranges = vec![TimeRange::new(time(23, 30), time(23, 59))];

        let slots = partition_ranges(&ranges, SlotGranularity::FixedMinutes(45));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_nonpositive_duration_yields_nothing() {
        let ranges = vec![TimeRange::new(time(9, 0), time(10, 0))];
        assert!(partition_ranges(&ranges, SlotGranularity::FixedMinutes(0)).is_empty());
    }

    #[test]
    fn test_slot_has_started() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();

        assert!(slot_has_started(yesterday, time(16, 0), now));
        assert!(slot_has_started(today, time(9, 30), now));
        // A slot starting exactly now is still bookable
        assert!(!slot_has_started(today, time(10, 0), now));
        assert!(!slot_has_started(today, time(10, 30), now));
        assert!(!slot_has_started(tomorrow, time(8, 0), now));
    }
}
