use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid schedule: {0}")]
    InvalidTemplate(String),

    #[error("Therapist {0} has no availability configured")]
    UnknownTherapist(String),

    /// The slot was taken between resolution and commit. Re-resolve and retry.
    #[error("Slot {date} {start}-{end} is no longer available for therapist {therapist_id}")]
    ConflictOnCommit {
        therapist_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl AvailabilityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AvailabilityError::ConflictOnCommit { .. })
    }
}

impl From<anyhow::Error> for AvailabilityError {
    fn from(err: anyhow::Error) -> Self {
        AvailabilityError::Persistence(err.to_string())
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        let message = err.to_string();
        match err {
            AvailabilityError::InvalidRange(_)
            | AvailabilityError::InvalidTemplate(_) => AppError::BadRequest(message),
            AvailabilityError::ValidationError(_) => AppError::ValidationError(message),
            AvailabilityError::UnknownTherapist(_)
            | AvailabilityError::NotFound(_) => AppError::NotFound(message),
            AvailabilityError::Unauthorized(_) => AppError::Forbidden(message),
            AvailabilityError::ConflictOnCommit { therapist_id, date, .. } => AppError::Conflict(
                message,
                Some(json!({
                    "retryable": true,
                    "therapist_id": therapist_id,
                    "date": date,
                    "hint": "re-resolve available slots and offer alternatives",
                })),
            ),
            AvailabilityError::Persistence(_) => AppError::Database(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn taxonomy_maps_onto_http_statuses() {
        let cases = [
            (AvailabilityError::InvalidRange("x".into()), StatusCode::BAD_REQUEST),
            (AvailabilityError::InvalidTemplate("x".into()), StatusCode::BAD_REQUEST),
            (AvailabilityError::UnknownTherapist("x".into()), StatusCode::NOT_FOUND),
            (AvailabilityError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (AvailabilityError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn commit_conflict_is_retryable_409() {
        let err = AvailabilityError::ConflictOnCommit {
            therapist_id: Uuid::nil(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        };
        assert!(err.is_retryable());

        match AppError::from(err) {
            AppError::Conflict(_, Some(details)) => assert_eq!(details["retryable"], true),
            other => panic!("expected conflict, got {:?}", other),
        }
    }
}
