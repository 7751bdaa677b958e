// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::models::{AppointmentStatus, BookingError};

/// All states reachable from `current` in one step.
pub fn valid_transitions(current: AppointmentStatus) -> Vec<AppointmentStatus> {
    match current {
        AppointmentStatus::Pending => vec![
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
        ],
        AppointmentStatus::Confirmed => vec![
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
            AppointmentStatus::Cancelled,
        ],
        // Terminal states absorb
        AppointmentStatus::Completed
        | AppointmentStatus::Cancelled
        | AppointmentStatus::NoShow => vec![],
    }
}

pub fn validate_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), BookingError> {
    if valid_transitions(current).contains(&next) {
        return Ok(());
    }

    warn!("Invalid status transition attempted: {} -> {}", current, next);

    if current.is_terminal() {
        return Err(BookingError::AlreadyTerminal(current));
    }

    Err(BookingError::InvalidStatusTransition { from: current, to: next })
}

/// Cancellation gate: active status, and outside the lead window unless the
/// actor has staff privilege.
pub fn validate_cancellation(
    status: AppointmentStatus,
    starts_at: DateTime<Utc>,
    now: DateTime<Utc>,
    lead_hours: i64,
    is_staff: bool,
) -> Result<(), BookingError> {
    if !status.is_active() {
        return Err(BookingError::AlreadyTerminal(status));
    }

    if is_staff {
        return Ok(());
    }

    if now + Duration::hours(lead_hours) >= starts_at {
        return Err(BookingError::TooCloseToStart);
    }

    Ok(())
}
