//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::path::PathError;
use crate::registry::RegistryError;

/// Failure of an API request
///
/// This is the only place internal errors turn into status codes. Bodies
/// are left empty so a failed listing never leaks a partial result.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The registry could not be queried
    #[error("path registry query failed: {0}")]
    Registry(#[from] RegistryError),

    /// A path could not describe itself
    #[error("path query failed: {0}")]
    Path(#[from] PathError),
}

impl ApiError {
    /// Status code sent to the client
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(_) | ApiError::Path(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "API request failed");
        self.status().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_map_to_internal_server_error() {
        let err = ApiError::from(RegistryError::Unavailable);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::from(PathError::Terminated("cam1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
