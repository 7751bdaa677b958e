// libs/appointment-cell/src/services/booking.rs
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use schedule_cell::models::TimeSlot;

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, BookSlotRequest, BookingError,
    BookingPolicy, CancelRequest, RescheduleAudit, RescheduleRequest,
};
use crate::services::conflict::ConflictService;
use crate::services::lifecycle;
use crate::services::reminders::ReminderService;

/// The booking engine. Owns every Slot and Appointment mutation so the two
/// stay consistent: a slot flagged unavailable always carries a live
/// appointment link once an operation has finished.
///
/// The serializing step of book/reschedule is the slot claim: a conditional
/// PATCH filtered on `is_available=eq.true`. Of two concurrent claims for
/// the same interval exactly one receives the updated row; the other sees an
/// empty result and is rejected. The partial unique index on active
/// appointments backs this up at insert time.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    conflict: ConflictService,
    reminders: ReminderService,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, BookingPolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: BookingPolicy) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let conflict = ConflictService::new(Arc::clone(&supabase));
        let reminders = ReminderService::new(Arc::clone(&supabase), policy.clone());

        Self {
            supabase,
            conflict,
            reminders,
            policy,
        }
    }

    /// Reserve a slot and create the appointment for it.
    pub async fn book_slot(
        &self,
        actor: &User,
        request: BookSlotRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let patient_id = resolve_patient_id(actor, request.patient_id)?;

        info!(
            "Booking slot for patient {} with doctor {} on {} {}-{}",
            patient_id, request.doctor_id, request.scheduled_date, request.start_time, request.end_time
        );

        let now = Utc::now();
        self.validate_interval(request.scheduled_date, request.start_time, request.end_time, now)?;

        // Cheap read-only precheck; the claim below is what actually decides.
        if self
            .conflict
            .has_overlap(
                request.doctor_id,
                request.scheduled_date,
                request.start_time,
                request.end_time,
                None,
                auth_token,
            )
            .await?
        {
            return Err(BookingError::OverlapsExistingAppointment);
        }

        let slot = self
            .claim_slot(
                request.doctor_id,
                request.scheduled_date,
                request.start_time,
                request.end_time,
                None,
                auth_token,
            )
            .await?;

        let appointment = match self.insert_appointment(patient_id, &request, auth_token).await {
            Ok(appointment) => appointment,
            Err(err) => {
                self.release_slot_best_effort(slot.id, auth_token).await;
                return Err(err);
            }
        };

        if let Err(err) = self.link_slot(slot.id, appointment.id, auth_token).await {
            self.delete_appointment_best_effort(appointment.id, auth_token).await;
            self.release_slot_best_effort(slot.id, auth_token).await;
            return Err(err);
        }

        if appointment.status == AppointmentStatus::Confirmed {
            self.reminders
                .on_appointment_confirmed(&appointment, request.reminder_channel, auth_token)
                .await?;
        }

        info!(
            "Appointment {} booked for patient {} with doctor {}",
            appointment.id, patient_id, request.doctor_id
        );
        Ok(appointment)
    }

    /// Move an appointment to a new interval: claim the target, update the
    /// appointment, free the old slot, record the audit entry.
    pub async fn reschedule(
        &self,
        actor: &User,
        appointment_id: Uuid,
        request: RescheduleRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Rescheduling appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        ensure_party(actor, &current)?;

        if !current.status.is_active() {
            return Err(BookingError::AlreadyTerminal(current.status));
        }

        let now = Utc::now();
        self.validate_interval(request.new_date, request.new_start_time, request.new_end_time, now)?;

        if request.new_date == current.scheduled_date
            && request.new_start_time == current.start_time
            && request.new_end_time == current.end_time
        {
            return Err(BookingError::Validation(
                "Target interval equals the current one".to_string(),
            ));
        }

        if self
            .conflict
            .has_overlap(
                current.doctor_id,
                request.new_date,
                request.new_start_time,
                request.new_end_time,
                Some(appointment_id),
                auth_token,
            )
            .await?
        {
            return Err(BookingError::OverlapsExistingAppointment);
        }

        // The appointment exists, so the claim can link it right away.
        let new_slot = self
            .claim_slot(
                current.doctor_id,
                request.new_date,
                request.new_start_time,
                request.new_end_time,
                Some(appointment_id),
                auth_token,
            )
            .await?;

        let update = json!({
            "scheduled_date": request.new_date,
            "start_time": request.new_start_time.format("%H:%M:%S").to_string(),
            "end_time": request.new_end_time.format("%H:%M:%S").to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=in.(pending,confirmed)",
            appointment_id
        );
        let rows = match self.patch_returning(&path, update, auth_token).await {
            Ok(rows) => rows,
            Err(err) => {
                self.release_slot_best_effort(new_slot.id, auth_token).await;
                return Err(err);
            }
        };

        let updated: Appointment = match rows.first() {
            Some(value) => parse_row(value)?,
            None => {
                // Lost a race against a terminal transition.
                self.release_slot_best_effort(new_slot.id, auth_token).await;
                return Err(BookingError::AlreadyTerminal(current.status));
            }
        };

        self.release_other_slots(appointment_id, new_slot.id, auth_token).await?;

        self.record_reschedule_audit(actor, &current, &updated, request.reason.as_deref(), auth_token)
            .await?;

        info!(
            "Appointment {} rescheduled from {} {} to {} {}",
            appointment_id,
            current.scheduled_date,
            current.start_time,
            updated.scheduled_date,
            updated.start_time
        );
        Ok(updated)
    }

    /// Cancel an active appointment and free its slot. Patients and doctors
    /// are held to the cancellation lead time; staff bypass it.
    pub async fn cancel(
        &self,
        actor: &User,
        appointment_id: Uuid,
        request: CancelRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Cancelling appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        ensure_party(actor, &current)?;

        lifecycle::validate_cancellation(
            current.status,
            current.starts_at(),
            Utc::now(),
            self.policy.cancellation_lead_hours,
            actor.is_staff(),
        )?;

        let mut update = serde_json::Map::new();
        update.insert("status".to_string(), json!(AppointmentStatus::Cancelled.to_string()));
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        if let Some(reason) = &request.reason {
            update.insert(
                "notes".to_string(),
                json!(format!("Cancelled by {}: {}", actor.id, reason)),
            );
        }

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=in.(pending,confirmed)",
            appointment_id
        );
        let rows = self.patch_returning(&path, Value::Object(update), auth_token).await?;

        let cancelled: Appointment = match rows.first() {
            Some(value) => parse_row(value)?,
            None => return Err(BookingError::AlreadyTerminal(current.status)),
        };

        self.release_other_slots(appointment_id, Uuid::nil(), auth_token).await?;

        info!("Appointment {} cancelled by {}", appointment_id, actor.id);
        Ok(cancelled)
    }

    /// Doctor-side terminal outcome; the slot stays consumed.
    pub async fn mark_completed(
        &self,
        actor: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        self.finish_appointment(actor, appointment_id, AppointmentStatus::Completed, auth_token)
            .await
    }

    /// Doctor-side terminal outcome; the slot stays consumed.
    pub async fn mark_no_show(
        &self,
        actor: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        self.finish_appointment(actor, appointment_id, AppointmentStatus::NoShow, auth_token)
            .await
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Fetching appointment: {}", appointment_id);

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

    /// List appointments scoped to the actor: patients see their own,
    /// doctors theirs, staff whatever the filters say.
    pub async fn list_appointments(
        &self,
        actor: &User,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut query_parts = Vec::new();

        if actor.is_patient() {
            query_parts.push(format!("patient_id=eq.{}", actor.id));
        } else if actor.is_doctor() {
            query_parts.push(format!("doctor_id=eq.{}", actor.id));
        } else {
            if let Some(patient_id) = query.patient_id {
                query_parts.push(format!("patient_id=eq.{}", patient_id));
            }
            if let Some(doctor_id) = query.doctor_id {
                query_parts.push(format!("doctor_id=eq.{}", doctor_id));
            }
        }

        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("scheduled_date=gte.{}", from_date));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("scheduled_date=lte.{}", to_date));
        }

        query_parts.push("order=scheduled_date.desc,start_time.asc".to_string());

        let mut path = format!("/rest/v1/appointments?{}", query_parts.join("&"));

        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|value| parse_row(&value))
            .collect()
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    fn validate_interval(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if start_time >= end_time {
            return Err(BookingError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }

        let starts_at = date.and_time(start_time).and_utc();
        if starts_at < now {
            return Err(BookingError::InPast);
        }

        if starts_at > now + Duration::days(self.policy.max_advance_booking_days) {
            return Err(BookingError::Validation(format!(
                "Bookings may be at most {} days ahead",
                self.policy.max_advance_booking_days
            )));
        }

        Ok(())
    }

    /// The atomic check-and-reserve. The `is_available=eq.true` filter makes
    /// the PATCH a compare-and-swap: an empty representation means another
    /// booking already holds the interval (or no such slot was generated).
    async fn claim_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<TimeSlot, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?doctor_id=eq.{}&slot_date=eq.{}&start_time=eq.{}&end_time=eq.{}&is_available=eq.true",
            doctor_id,
            date,
            start_time.format("%H:%M:%S"),
            end_time.format("%H:%M:%S")
        );

        let body = json!({
            "is_available": false,
            "appointment_id": appointment_id,
            "updated_at": Utc::now().to_rfc3339()
        });

        let rows = self.patch_returning(&path, body, auth_token).await?;

        if let Some(value) = rows.first() {
            return parse_row(value);
        }

        // Distinguish a lost race from a slot that was never generated.
        let probe_path = format!(
            "/rest/v1/time_slots?doctor_id=eq.{}&slot_date=eq.{}&start_time=eq.{}&end_time=eq.{}",
            doctor_id,
            date,
            start_time.format("%H:%M:%S"),
            end_time.format("%H:%M:%S")
        );
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &probe_path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if existing.is_empty() {
            warn!(
                "No slot for doctor {} on {} {}-{}",
                doctor_id, date, start_time, end_time
            );
            Err(BookingError::SlotNotFound)
        } else {
            warn!(
                "Slot already taken for doctor {} on {} {}-{}",
                doctor_id, date, start_time, end_time
            );
            Err(BookingError::SlotAlreadyTaken)
        }
    }

    async fn insert_appointment(
        &self,
        patient_id: Uuid,
        request: &BookSlotRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let status = if self.policy.auto_confirm_on_booking {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Pending
        };

        let appointment_data = json!({
            "patient_id": patient_id,
            "doctor_id": request.doctor_id,
            "scheduled_date": request.scheduled_date,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "appointment_type": request.appointment_type.to_string(),
            "status": status.to_string(),
            "reason": request.reason,
            "symptoms": request.symptoms,
            "notes": null,
            "is_paid": false,
            "payment_ref": null,
            "amount": request.amount.unwrap_or(0.0),
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
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(headers),
            )
            .await?;

        match result.first() {
            Some(value) => parse_row(value),
            None => Err(BookingError::DatabaseError(
                "Failed to create appointment".to_string(),
            )),
        }
    }

    async fn link_slot(
        &self,
        slot_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);
        let body = json!({
            "appointment_id": appointment_id,
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_returning(&path, body, auth_token).await?;
        Ok(())
    }

    /// Free every slot linked to the appointment except `keep_slot_id`.
    /// Pass `Uuid::nil()` to free them all.
    async fn release_other_slots(
        &self,
        appointment_id: Uuid,
        keep_slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let path = format!(
            "/rest/v1/time_slots?appointment_id=eq.{}&id=neq.{}",
            appointment_id, keep_slot_id
        );
        let body = json!({
            "is_available": true,
            "appointment_id": null,
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_returning(&path, body, auth_token).await?;
        Ok(())
    }

    async fn release_slot_best_effort(&self, slot_id: Uuid, auth_token: &str) {
        let path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);
        let body = json!({
            "is_available": true,
            "appointment_id": null,
            "updated_at": Utc::now().to_rfc3339()
        });

        if let Err(err) = self.patch_returning(&path, body, auth_token).await {
            error!("Failed to release slot {} after aborted booking: {}", slot_id, err);
        }
    }

    async fn delete_appointment_best_effort(&self, appointment_id: Uuid, auth_token: &str) {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, Some(auth_token), None, Some(headers))
            .await;

        if let Err(err) = result {
            error!(
                "Failed to remove appointment {} after aborted booking: {}",
                appointment_id, err
            );
        }
    }

    async fn finish_appointment(
        &self,
        actor: &User,
        appointment_id: Uuid,
        target: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !actor.is_staff() && actor.id != current.doctor_id.to_string() {
            return Err(BookingError::Forbidden(
                "Only the doctor may record the appointment outcome".to_string(),
            ));
        }

        lifecycle::validate_transition(current.status, target)?;

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.confirmed",
            appointment_id
        );
        let body = json!({
            "status": target.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let rows = self.patch_returning(&path, body, auth_token).await?;

        match rows.first() {
            Some(value) => {
                info!("Appointment {} marked {}", appointment_id, target);
                parse_row(value)
            }
            None => Err(BookingError::InvalidStatusTransition {
                from: current.status,
                to: target,
            }),
        }
    }

    async fn record_reschedule_audit(
        &self,
        actor: &User,
        old: &Appointment,
        new: &Appointment,
        reason: Option<&str>,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let requested_by = Uuid::parse_str(&actor.id)
            .map_err(|_| BookingError::Validation("Actor id is not a UUID".to_string()))?;

        let audit_data = json!({
            "appointment_id": old.id,
            "old_date": old.scheduled_date,
            "old_start_time": old.start_time.format("%H:%M:%S").to_string(),
            "old_end_time": old.end_time.format("%H:%M:%S").to_string(),
            "new_date": new.scheduled_date,
            "new_start_time": new.start_time.format("%H:%M:%S").to_string(),
            "new_end_time": new.end_time.format("%H:%M:%S").to_string(),
            "requested_by": requested_by,
            "reason": reason,
            "created_at": Utc::now().to_rfc3339()
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
                "/rest/v1/reschedule_audits",
                Some(auth_token),
                Some(audit_data),
                Some(headers),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if let Some(value) = result.first() {
            let audit: RescheduleAudit = parse_row(value)?;
            debug!("Reschedule audit {} recorded for appointment {}", audit.id, audit.appointment_id);
        }

        Ok(())
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

        // From<DbError> keeps a 409 from the unique index typed as an overlap
        self.supabase
            .request_with_headers(Method::PATCH, path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(BookingError::from)
    }
}

fn resolve_patient_id(actor: &User, requested: Option<Uuid>) -> Result<Uuid, BookingError> {
    if let (true, Some(patient_id)) = (actor.is_staff(), requested) {
        return Ok(patient_id);
    }

    Uuid::parse_str(&actor.id)
        .map_err(|_| BookingError::Validation("Actor id is not a UUID".to_string()))
}

fn ensure_party(actor: &User, appointment: &Appointment) -> Result<(), BookingError> {
    if actor.is_staff()
        || actor.id == appointment.patient_id.to_string()
        || actor.id == appointment.doctor_id.to_string()
    {
        return Ok(());
    }

    Err(BookingError::Forbidden(
        "Not a party to this appointment".to_string(),
    ))
}

fn parse_row<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, BookingError> {
    serde_json::from_value(value.clone())
        .map_err(|e| BookingError::DatabaseError(format!("Failed to parse record: {}", e)))
}
