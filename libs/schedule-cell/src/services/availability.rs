// libs/schedule-cell/src/services/availability.rs
use chrono::{Datelike, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    AvailabilityException, CreateRuleRequest, ScheduleError, ScheduleRule, TimeRange,
    UpsertExceptionRequest,
};

pub struct AvailabilityService {
    supabase: SupabaseClient,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Create a recurring weekly rule for a doctor. Rejects a rule that
    /// overlaps an existing active rule for the same doctor and day.
    pub async fn create_rule(
        &self,
        doctor_id: Uuid,
        request: CreateRuleRequest,
        auth_token: &str,
    ) -> Result<ScheduleRule, ScheduleError> {
        debug!("Creating schedule rule for doctor: {}", doctor_id);

        if request.start_time >= request.end_time {
            return Err(ScheduleError::InvalidTimeRange(
                "Start time must be before end time".to_string(),
            ));
        }

        if !(0..=6).contains(&request.day_of_week) {
            return Err(ScheduleError::InvalidDayOfWeek(request.day_of_week));
        }

        let existing = self
            .rules_for_day(doctor_id, request.day_of_week, auth_token)
            .await?;

        let candidate = TimeRange::new(request.start_time, request.end_time);
        let conflicting = existing
            .iter()
            .any(|rule| candidate.overlaps(&TimeRange::new(rule.start_time, rule.end_time)));

        if conflicting {
            warn!(
                "Rule conflict for doctor {} on day {}: {} - {}",
                doctor_id, request.day_of_week, request.start_time, request.end_time
            );
            return Err(ScheduleError::RuleOverlap);
        }

        let rule_data = json!({
            "doctor_id": doctor_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_active": true,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
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
                "/rest/v1/schedule_rules",
                Some(auth_token),
                Some(rule_data),
                Some(headers),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let rule = result
            .first()
            .ok_or_else(|| ScheduleError::DatabaseError("Failed to create rule".to_string()))?;

        let rule: ScheduleRule = serde_json::from_value(rule.clone())
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse rule: {}", e)))?;

        debug!("Schedule rule created with ID: {}", rule.id);
        Ok(rule)
    }

    /// List a doctor's rules, ordered by day then start time.
    pub async fn list_rules(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<ScheduleRule>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_rules?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            doctor_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleRule>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse rules: {}", e)))
    }

    /// Delete a rule explicitly. Rules are never removed automatically.
    pub async fn delete_rule(&self, rule_id: Uuid, auth_token: &str) -> Result<(), ScheduleError> {
        debug!("Deleting schedule rule: {}", rule_id);

        let path = format!("/rest/v1/schedule_rules?id=eq.{}", rule_id);
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if existing.is_empty() {
            return Err(ScheduleError::RuleNotFound);
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, Some(auth_token), None, Some(headers))
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Upsert the exception for (doctor, date). PostgREST resolves the
    /// duplicate key so a second call replaces the first record.
    pub async fn upsert_exception(
        &self,
        doctor_id: Uuid,
        request: UpsertExceptionRequest,
        auth_token: &str,
    ) -> Result<AvailabilityException, ScheduleError> {
        debug!(
            "Upserting availability exception for doctor {} on {}",
            doctor_id, request.exception_date
        );

        if !request.all_day {
            match (request.start_time, request.end_time) {
                (Some(start), Some(end)) if start < end => {}
                _ => {
                    return Err(ScheduleError::InvalidTimeRange(
                        "A partial-day exception needs start < end".to_string(),
                    ));
                }
            }
        }

        let exception_data = json!({
            "doctor_id": doctor_id,
            "exception_date": request.exception_date,
            "all_day": request.all_day,
            "start_time": request.start_time.map(|t| t.format("%H:%M:%S").to_string()),
            "end_time": request.end_time.map(|t| t.format("%H:%M:%S").to_string()),
            "reason": request.reason,
            "created_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/availability_exceptions?on_conflict=doctor_id,exception_date",
                Some(auth_token),
                Some(exception_data),
                Some(headers),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let exception = result
            .first()
            .ok_or_else(|| ScheduleError::DatabaseError("Failed to upsert exception".to_string()))?;

        serde_json::from_value(exception.clone())
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse exception: {}", e)))
    }

    /// The doctor's bookable ranges on a date: the weekday's active rules
    /// minus the exception, as disjoint sorted ranges.
    pub async fn effective_availability(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<TimeRange>, ScheduleError> {
        debug!("Computing effective availability for doctor {} on {}", doctor_id, date);

        let day_of_week = weekday_index(date);
        let rules = self.rules_for_day(doctor_id, day_of_week, auth_token).await?;
        let exception = self.get_exception(doctor_id, date, auth_token).await?;

        Ok(effective_ranges(&rules, exception.as_ref()))
    }

    /// Fetch the (at most one) exception for a doctor/date.
    pub async fn get_exception(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Option<AvailabilityException>, ScheduleError> {
        let path = format!(
            "/rest/v1/availability_exceptions?doctor_id=eq.{}&exception_date=eq.{}",
            doctor_id, date
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse exception: {}", e)))
    }

    async fn rules_for_day(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
        auth_token: &str,
    ) -> Result<Vec<ScheduleRule>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_rules?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true&order=start_time.asc",
            doctor_id, day_of_week
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleRule>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse rules: {}", e)))
    }
}

/// Day-of-week index with Monday = 0, matching the stored rules.
pub fn weekday_index(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_monday() as i32
}

/// Combine a day's active rules with its exception into disjoint sorted
/// ranges. An all-day exception empties the day; a partial exception is
/// subtracted from every rule range, splitting ranges where it lands inside.
pub fn effective_ranges(
    rules: &[ScheduleRule],
    exception: Option<&AvailabilityException>,
) -> Vec<TimeRange> {
    let mut ranges: Vec<TimeRange> = rules
        .iter()
        .filter(|rule| rule.is_active)
        .map(|rule| TimeRange::new(rule.start_time, rule.end_time))
        .collect();

    ranges.sort_by_key(|range| range.start);

    match exception {
        Some(exception) if exception.all_day => Vec::new(),
        Some(exception) => match (exception.start_time, exception.end_time) {
            (Some(blocked_start), Some(blocked_end)) => {
                subtract_range(&ranges, TimeRange::new(blocked_start, blocked_end))
            }
            _ => ranges,
        },
        None => ranges,
    }
}

fn subtract_range(ranges: &[TimeRange], blocked: TimeRange) -> Vec<TimeRange> {
    let mut result = Vec::with_capacity(ranges.len());

    for range in ranges {
        if !range.overlaps(&blocked) {
            result.push(*range);
            continue;
        }

        if range.start < blocked.start {
            result.push(TimeRange::new(range.start, blocked.start));
        }
        if blocked.end < range.end {
            result.push(TimeRange::new(blocked.end, range.end));
        }
    }

    result
}
