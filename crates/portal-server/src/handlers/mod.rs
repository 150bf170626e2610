//! One module per route group; one handler per route.

use axum::extract::FromRequest;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ApiError;

pub mod billing;
pub mod bulk;
pub mod content;
pub mod files;
pub mod invitations;
pub mod lessons;
pub mod progress;
pub mod tutor;
pub mod users;

/// JSON body extractor whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Trimmed, lower-cased email, or `Validation(message)` when blank.
pub(crate) fn required_email(value: Option<&str>, message: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation(message.to_string()))
}

/// Trimmed non-empty string, or `Validation(message)`.
pub(crate) fn required(value: Option<&str>, message: &str) -> Result<String, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Validation(message.to_string()))
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub(crate) fn parse_date(value: &str) -> Result<DateTime<Utc>, ApiError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::Validation(format!("Invalid date: {value}")))
}

/// Reject a write when the client sent a version that is no longer current.
pub(crate) fn check_expected_version(expected: Option<i64>, current: i64) -> Result<(), ApiError> {
    match expected {
        Some(v) if v != current => Err(ApiError::Stale),
        _ => Ok(()),
    }
}
