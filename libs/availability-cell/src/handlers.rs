use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use chrono::{NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::error::AvailabilityError;
use crate::models::{
    CancelQuery, ConflictCheckRequest, CreateSessionRequest, NextSlotQuery, OverrideRequest,
    SlotQuery,
};
use crate::services::adapter::AvailabilityPayload;
use crate::services::availability::{booking_for_caller, AvailabilityService};

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_slots(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, None);
    let end = query.end.unwrap_or(query.start);

    let slots = service
        .resolve(therapist_id, query.start, end, Utc::now(), query.strict.unwrap_or(false))
        .await?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "total": slots.len(),
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn get_next_slot(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    Query(query): Query<NextSlotQuery>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, None);

    let slot = service.next_available(therapist_id, query.from, Utc::now()).await?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "slot": slot,
    })))
}

#[axum::debug_handler]
pub async fn check_conflicts(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<ConflictCheckRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, None);

    let response = service.check_conflict(request).await?;

    Ok(Json(json!(response)))
}

// ==============================================================================
// PROTECTED HANDLERS (AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn save_availability(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(payload): Json<AvailabilityPayload>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, Some(auth.token().to_string()));

    let template = service.save_template(therapist_id, payload, &user).await?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "template": template,
    })))
}

#[axum::debug_handler]
pub async fn save_override(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, Some(auth.token().to_string()));

    let saved = service.save_override(therapist_id, request, &user).await?;

    Ok(Json(json!(saved)))
}

#[axum::debug_handler]
pub async fn delete_override(
    State(state): State<Arc<AppConfig>>,
    Path((therapist_id, date)): Path<(Uuid, NaiveDate)>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    let service = AvailabilityService::new(&state, Some(auth.token().to_string()));

    service.delete_override(therapist_id, date, &user).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn book_session(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let service = AvailabilityService::new(&state, Some(auth.token().to_string()));
    let now = Utc::now();

    let request = booking_for_caller(&user, request)?;
    let date = request.date;

    match service.commit_booking(therapist_id, request, now).await {
        Ok(session) => Ok((StatusCode::CREATED, Json(json!(session)))),
        Err(err @ AvailabilityError::ConflictOnCommit { .. }) => {
            Err(conflict_with_alternatives(&service, therapist_id, date, err).await)
        }
        Err(err) => Err(err.into()),
    }
}

#[axum::debug_handler]
pub async fn get_cancellation(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, Some(auth.token().to_string()));

    let outcome = service.evaluate_cancellation(session_id, &user, Utc::now()).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "can_cancel": outcome.decision.is_allowed(),
        "decision": outcome.decision,
        "deadline": outcome.deadline,
    })))
}

#[axum::debug_handler]
pub async fn cancel_session(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<CancelQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state, Some(auth.token().to_string()));

    let outcome = service
        .cancel_booking(
            session_id,
            &user,
            query.accept_late_penalty.unwrap_or(false),
            Utc::now(),
        )
        .await?;

    Ok(Json(json!(outcome)))
}

/// A lost booking race answers with the slots still open that day.
async fn conflict_with_alternatives(
    service: &AvailabilityService,
    therapist_id: Uuid,
    date: NaiveDate,
    err: AvailabilityError,
) -> AppError {
    let alternatives = match service.resolve(therapist_id, date, date, Utc::now(), false).await {
        Ok(slots) => slots,
        Err(resolve_err) => {
            debug!("Could not load alternatives for {}: {}", date, resolve_err);
            Vec::new()
        }
    };

    match AppError::from(err) {
        AppError::Conflict(message, details) => {
            let mut details = details.unwrap_or_else(|| json!({}));
            details["alternatives"] = json!(alternatives);
            AppError::Conflict(message, Some(details))
        }
        other => other,
    }
}
