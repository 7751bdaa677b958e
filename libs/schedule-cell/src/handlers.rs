// libs/schedule-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreateRuleRequest, GenerateSlotsRequest, SlotGranularity, UpsertExceptionRequest};
use crate::services::{AvailabilityService, SlotService};

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

/// Schedule management is restricted to the doctor who owns the schedule,
/// or to staff acting on their behalf.
fn ensure_schedule_owner(user: &User, doctor_id: Uuid) -> Result<(), AppError> {
    if user.is_staff() || user.id == doctor_id.to_string() {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Only the doctor or staff may manage this schedule".to_string(),
    ))
}

#[axum::debug_handler]
pub async fn create_rule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_schedule_owner(&user, doctor_id)?;

    let service = AvailabilityService::new(&state);
    let rule = service.create_rule(doctor_id, request, auth.token()).await?;

    Ok(Json(json!(rule)))
}

#[axum::debug_handler]
pub async fn list_rules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);
    let rules = service.list_rules(doctor_id, auth.token()).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "rules": rules
    })))
}

#[axum::debug_handler]
pub async fn delete_rule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((doctor_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    ensure_schedule_owner(&user, doctor_id)?;

    let service = AvailabilityService::new(&state);
    service.delete_rule(rule_id, auth.token()).await?;

    Ok(Json(json!({ "deleted": rule_id })))
}

#[axum::debug_handler]
pub async fn upsert_exception(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<UpsertExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_schedule_owner(&user, doctor_id)?;

    let service = AvailabilityService::new(&state);
    let exception = service
        .upsert_exception(doctor_id, request, auth.token())
        .await?;

    Ok(Json(json!(exception)))
}

#[axum::debug_handler]
pub async fn get_effective_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);
    let ranges = service
        .effective_availability(doctor_id, query.date, auth.token())
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "available_ranges": ranges
    })))
}

#[axum::debug_handler]
pub async fn list_open_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&state);
    let slots = service
        .list_open_slots(doctor_id, query.date, Utc::now(), auth.token())
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "open_slots": slots
    })))
}

#[axum::debug_handler]
pub async fn generate_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_schedule_owner(&user, doctor_id)?;

    let granularity = match request.duration_minutes {
        Some(minutes) if minutes > 0 => SlotGranularity::FixedMinutes(minutes),
        Some(_) => {
            return Err(AppError::ValidationError(
                "duration_minutes must be positive".to_string(),
            ));
        }
        None => SlotGranularity::WholeRange,
    };

    let service = SlotService::new(&state);
    let slots = service
        .generate_slots(doctor_id, request.date, granularity, auth.token())
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": request.date,
        "slots": slots
    })))
}
