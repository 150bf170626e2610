use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use portal_shared::invite::InviteError;
use portal_store::StoreError;

use crate::payments::PaymentError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Access denied")]
    AccessDenied { reason: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Expired(String),

    #[error("Record was modified by another request; reload and retry")]
    Stale,

    #[error("Payment failed")]
    PaymentRequired {
        message: String,
        code: Option<String>,
    },

    #[error("Internal server error")]
    Upstream(String),
}

impl ApiError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        ApiError::AccessDenied {
            reason: reason.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::Expired(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::AccessDenied { .. } | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Stale => StatusCode::CONFLICT,
            ApiError::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });

        match self {
            ApiError::AccessDenied { reason } => body["reason"] = json!(reason),
            ApiError::PaymentRequired { message, code } => {
                body["message"] = json!(message);
                body["code"] = json!(code);
            }
            ApiError::Upstream(details) => {
                tracing::error!(%details, "request failed");
                body["details"] = json!(details);
            }
            _ => {}
        }

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("Record not found".to_string()),
            StoreError::Conflict => ApiError::Stale,
            StoreError::Duplicate(key) => ApiError::Conflict(format!("Record already exists: {key}")),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(e: InviteError) -> Self {
        match e {
            InviteError::NotFound => ApiError::NotFound(e.to_string()),
            InviteError::Expired => ApiError::Expired(e.to_string()),
            InviteError::AlreadyAccepted => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Card { message, code } => ApiError::PaymentRequired { message, code },
            PaymentError::NotFound(message) => ApiError::NotFound(message),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Validation(format!("Invalid multipart body: {}", e.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn access_denied_carries_reason() {
        let (status, body) = body_json(ApiError::access_denied("User not found")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Access denied");
        assert_eq!(body["reason"], "User not found");
    }

    #[tokio::test]
    async fn store_errors_map_to_statuses() {
        let (status, _) = body_json(StoreError::Conflict.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = body_json(StoreError::NotFound.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = body_json(StoreError::Duplicate("a@x.com".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Record already exists: a@x.com");
    }

    #[tokio::test]
    async fn card_errors_are_payment_required() {
        let err: ApiError = PaymentError::Card {
            message: "Your card was declined.".into(),
            code: Some("card_declined".into()),
        }
        .into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "Payment failed");
        assert_eq!(body["code"], "card_declined");
    }

    #[tokio::test]
    async fn upstream_passes_details_through() {
        let (status, body) = body_json(ApiError::Upstream("disk full".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["details"], "disk full");
    }
}
