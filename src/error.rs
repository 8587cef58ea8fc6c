//! Request-level error taxonomy and its HTTP mapping.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use log::error;
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    /// Client input missing or malformed; the message names the field.
    Validation(String),
    NotFound(String),
    /// Duplicate unique key; surfaces as 400 with its own message.
    Conflict(String),
    Store(StoreError),
    Internal(String),
}

impl core::fmt::Display for ApiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ApiError::Validation(m) => write!(f, "validation error: {}", m),
            ApiError::NotFound(m) => write!(f, "not found: {}", m),
            ApiError::Conflict(m) => write!(f, "conflict: {}", m),
            ApiError::Store(e) => write!(f, "store error: {}", e),
            ApiError::Internal(m) => write!(f, "internal error: {}", m),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        ApiError::Store(value)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client. Store and internal failures stay generic.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Validation(m) | ApiError::NotFound(m) | ApiError::Conflict(m) => m.clone(),
            ApiError::Store(_) => "Database error".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Store(_) | ApiError::Internal(_)) {
            error!("Request failed: {}", self);
        }
        (self.status(), Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Store(StoreError::Query("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_details_are_not_leaked() {
        let err = ApiError::from(StoreError::Query("relation \"rooms\" does not exist".into()));
        assert_eq!(err.public_message(), "Database error");
    }
}
