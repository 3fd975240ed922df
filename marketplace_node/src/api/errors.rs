//! API error responses

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use crate::error::MarketError;

/// Failure reported to API callers. `code` selects the HTTP status and is
/// not part of the body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub code: u16,
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    pub timestamp: u64,
}

impl ApiError {
    pub fn new(code: u16, kind: &str, message: String) -> Self {
        Self {
            code,
            kind: kind.to_string(),
            message,
            retryable: false,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(400, "validation", message.to_string())
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(401, "unauthorized", message.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API Error {} ({}): {}", self.code, self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        let code = match &err {
            MarketError::NotFound(_) => 404,
            MarketError::Forbidden(_) => 403,
            MarketError::ChainAccess(_) | MarketError::Internal(_) => 500,
            MarketError::Validation(_)
            | MarketError::Locked(_)
            | MarketError::PinFailure(_)
            | MarketError::ReceiptNotFound(_)
            | MarketError::InsufficientConfirmations { .. }
            | MarketError::TransactionReverted(_)
            | MarketError::IdNotFoundInLogs(_)
            | MarketError::ListingNotActiveOnchain(_) => 400,
        };

        let mut api = Self::new(code, err.kind(), err.to_string());
        api.retryable = err.is_retryable();
        api
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(&format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(&format!("Invalid path: {}", rejection.body_text()))
    }
}

/// Error response wrapper
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ApiError,
}

impl ErrorResponse {
    pub fn new(error: ApiError) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ErrorResponse::new(self).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (MarketError::Validation("bad".into()), 400),
            (MarketError::Locked("pinned".into()), 400),
            (MarketError::PinFailure("502".into()), 400),
            (MarketError::InsufficientConfirmations { have: 0, need: 1 }, 400),
            (MarketError::ListingNotActiveOnchain(3), 400),
            (MarketError::NotFound("listing 9".into()), 404),
            (MarketError::Forbidden("owner".into()), 403),
            (MarketError::ChainAccess("timeout".into()), 500),
            (MarketError::Internal("oops".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).code, code);
        }
    }

    #[test]
    fn test_body_shape() {
        let api = ApiError::from(MarketError::ReceiptNotFound("0xab".into()));
        let body = serde_json::to_value(ErrorResponse::new(api)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "receipt-not-found");
        assert_eq!(body["error"]["retryable"], true);
        assert!(body["error"].get("code").is_none());
        assert!(body["error"]["timestamp"].as_u64().unwrap() > 0);
    }
}
