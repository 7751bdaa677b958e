// libs/schedule-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// CORE SCHEDULING MODELS
// ==============================================================================

/// Recurring weekly working-hours definition for a doctor.
/// `day_of_week` runs 0 (Monday) through 6 (Sunday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Date-specific override of the recurring rules. Either the whole day is
/// unavailable (`all_day`) or just the `start_time..end_time` sub-range.
/// One record per (doctor, date); a second upsert replaces the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub exception_date: NaiveDate,
    pub all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One concrete bookable interval for one doctor on one date.
/// `is_available = false` with a cleared `appointment_id` is a transient
/// state inside a booking operation and must never be observable at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Half-open interval [start, end) within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Two half-open ranges overlap iff start < other.end and end > other.start.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// How effective-availability ranges are turned into slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGranularity {
    /// One slot per effective range: the range is the bookable window.
    WholeRange,
    /// Partition each range into fixed-duration slots; a trailing remainder
    /// shorter than the duration is dropped.
    FixedMinutes(i64),
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRuleRequest {
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertExceptionRequest {
    pub exception_date: NaiveDate,
    pub all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub date: NaiveDate,
    /// None generates whole-range slots; Some(n) subdivides every effective
    /// range into n-minute slots.
    pub duration_minutes: Option<i64>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Day of week must be between 0 (Monday) and 6 (Sunday), got {0}")]
    InvalidDayOfWeek(i32),

    #[error("Rule overlaps an existing active rule for this doctor and day")]
    RuleOverlap,

    #[error("Schedule rule not found")]
    RuleNotFound,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match &err {
            ScheduleError::InvalidTimeRange(msg) => AppError::ValidationError(msg.clone()),
            ScheduleError::InvalidDayOfWeek(_) => AppError::ValidationError(err.to_string()),
            ScheduleError::RuleOverlap => AppError::Conflict(err.to_string()),
            ScheduleError::RuleNotFound => AppError::NotFound(err.to_string()),
            ScheduleError::DatabaseError(msg) => AppError::Database(msg.clone()),
        }
    }
}
