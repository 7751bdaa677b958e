// libs/appointment-cell/src/services/payments.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentStatus, BookingError, BookingPolicy};
use crate::services::reminders::ReminderService;

/// Applies the effect of a verified payment event: mark the appointment
/// paid, promote pending to confirmed, and kick off the reminder. Gateway
/// signatures and amounts are the webhook layer's problem; this hook trusts
/// its caller's verified event and only has to be idempotent against
/// duplicate deliveries.
pub struct PaymentReconciliationService {
    supabase: Arc<SupabaseClient>,
    reminders: ReminderService,
}

impl PaymentReconciliationService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, BookingPolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: BookingPolicy) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let reminders = ReminderService::new(Arc::clone(&supabase), policy);

        Self { supabase, reminders }
    }

    pub async fn on_payment_confirmed(
        &self,
        appointment_id: Uuid,
        transaction_ref: &str,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!(
            "Payment confirmed for appointment {} (ref {})",
            appointment_id, transaction_ref
        );

        let current = self.fetch_appointment(appointment_id, auth_token).await?;

        if current.is_paid {
            info!(
                "Duplicate payment event for appointment {} ignored",
                appointment_id
            );
            return Ok(current);
        }

        // CAS on the paid flag so two concurrent webhook deliveries apply once.
        let paid_path = format!(
            "/rest/v1/appointments?id=eq.{}&is_paid=eq.false",
            appointment_id
        );
        let paid_body = json!({
            "is_paid": true,
            "payment_ref": transaction_ref,
            "updated_at": chrono::Utc::now().to_rfc3339()
        });

        let rows = self.patch_returning(&paid_path, paid_body, auth_token).await?;
        let paid: Appointment = match rows.first() {
            Some(value) => parse_row(value)?,
            None => {
                // A concurrent delivery got there first.
                info!(
                    "Concurrent payment event for appointment {} already applied",
                    appointment_id
                );
                return self.fetch_appointment(appointment_id, auth_token).await;
            }
        };

        if paid.status != AppointmentStatus::Pending {
            return Ok(paid);
        }

        // Payment gates the pending -> confirmed transition.
        let confirm_path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.pending",
            appointment_id
        );
        let confirm_body = json!({
            "status": AppointmentStatus::Confirmed.to_string(),
            "updated_at": chrono::Utc::now().to_rfc3339()
        });

        let rows = self.patch_returning(&confirm_path, confirm_body, auth_token).await?;
        match rows.first() {
            Some(value) => {
                let confirmed: Appointment = parse_row(value)?;
                info!(
                    "Appointment {} confirmed by payment {}",
                    appointment_id, transaction_ref
                );

                // First confirmation schedules the reminder.
                self.reminders
                    .on_appointment_confirmed(&confirmed, None, auth_token)
                    .await?;

                Ok(confirmed)
            }
            None => self.fetch_appointment(appointment_id, auth_token).await,
        }
    }

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        match result.first() {
            Some(value) => parse_row(value),
            None => Err(BookingError::NotFound),
        }
    }

    async fn patch_returning(
        &self,
        path: &str,
        body: Value,
        auth_token: &str,
    ) -> Result<Vec<Value>, BookingError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        self.supabase
            .request_with_headers(Method::PATCH, path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))
    }
}

fn parse_row(value: &Value) -> Result<Appointment, BookingError> {
    serde_json::from_value(value.clone())
        .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
}
