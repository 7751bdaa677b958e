// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub symptoms: Option<String>,
    pub notes: Option<String>,
    pub is_paid: bool,
    pub payment_ref: Option<String>,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Scheduled start instant. Clinic times are stored as UTC wall-clock.
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.scheduled_date.and_time(self.start_time).and_utc()
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.starts_at() > now && self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Active appointments hold their interval against other bookings.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Consultation,
    FollowUp,
    Emergency,
    Checkup,
    Other,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::Consultation => write!(f, "consultation"),
            AppointmentType::FollowUp => write!(f, "follow_up"),
            AppointmentType::Emergency => write!(f, "emergency"),
            AppointmentType::Checkup => write!(f, "checkup"),
            AppointmentType::Other => write!(f, "other"),
        }
    }
}

/// Audit record written on every successful reschedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAudit {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub old_date: NaiveDate,
    pub old_start_time: NaiveTime,
    pub old_end_time: NaiveTime,
    pub new_date: NaiveDate,
    pub new_start_time: NaiveTime,
    pub new_end_time: NaiveTime,
    pub requested_by: Uuid,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REMINDER MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub channel: ReminderChannel,
    pub fire_at: DateTime<Utc>,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Email,
    Sms,
    Push,
}

impl fmt::Display for ReminderChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderChannel::Email => write!(f, "email"),
            ReminderChannel::Sms => write!(f, "sms"),
            ReminderChannel::Push => write!(f, "push"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotRequest {
    /// Staff may book on behalf of a patient; everyone else books for
    /// themselves and this field is ignored.
    pub patient_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub appointment_type: AppointmentType,
    pub reason: Option<String>,
    pub symptoms: Option<String>,
    pub amount: Option<f64>,
    pub reminder_channel: Option<ReminderChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub new_date: NaiveDate,
    pub new_start_time: NaiveTime,
    pub new_end_time: NaiveTime,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedEvent {
    pub appointment_id: Uuid,
    pub transaction_ref: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// POLICY
// ==============================================================================

/// Knobs of the booking engine, passed explicitly into the service
/// constructors.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// Patients and doctors must cancel at least this long before start.
    pub cancellation_lead_hours: i64,
    /// Reminders fire this long before the appointment starts.
    pub reminder_lead_hours: i64,
    /// When set, bookings skip `pending` and confirm immediately instead of
    /// waiting for payment to gate the confirmation.
    pub auto_confirm_on_booking: bool,
    /// Bookings may not be placed further out than this.
    pub max_advance_booking_days: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancellation_lead_hours: 24,
            reminder_lead_hours: 24,
            auto_confirm_on_booking: false,
            max_advance_booking_days: 90,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment time is in the past")]
    InPast,

    #[error("No slot exists for the requested interval")]
    SlotNotFound,

    #[error("The requested slot has already been taken")]
    SlotAlreadyTaken,

    #[error("Interval overlaps an existing appointment")]
    OverlapsExistingAppointment,

    #[error("Appointment is already in terminal status {0}")]
    AlreadyTerminal(AppointmentStatus),

    #[error("Too close to the appointment start to cancel")]
    TooCloseToStart,

    #[error("Status cannot change from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DbError> for BookingError {
    fn from(err: DbError) -> Self {
        match err {
            // The partial unique index on active appointments answers 409
            // when a concurrent insert wins the interval.
            DbError::Conflict(_) => BookingError::OverlapsExistingAppointment,
            DbError::NotFound(_) => BookingError::NotFound,
            other => BookingError::DatabaseError(other.to_string()),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match &err {
            BookingError::Validation(msg) => AppError::ValidationError(msg.clone()),
            BookingError::InPast => AppError::ValidationError(err.to_string()),
            BookingError::SlotNotFound | BookingError::NotFound => {
                AppError::NotFound(err.to_string())
            }
            BookingError::SlotAlreadyTaken
            | BookingError::OverlapsExistingAppointment
            | BookingError::AlreadyTerminal(_)
            | BookingError::InvalidStatusTransition { .. } => AppError::Conflict(err.to_string()),
            BookingError::TooCloseToStart => AppError::BadRequest(err.to_string()),
            BookingError::Forbidden(msg) => AppError::Forbidden(msg.clone()),
            BookingError::DatabaseError(msg) => AppError::Database(msg.clone()),
        }
    }
}
