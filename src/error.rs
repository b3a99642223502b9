#[cfg(feature = "web")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Main error type for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Empty or malformed request fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Registration attempted with a username that already exists
    #[error("Username already exists")]
    UsernameTaken,

    /// Unknown user or wrong password; the two cases are not distinguished
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The operation needs an authenticated session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// An upload could not be decoded as a supported raster image
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    /// Two embeddings of different lengths were compared
    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// Length of the first vector.
        left: usize,
        /// Length of the second vector.
        right: usize,
    },

    /// An embedding with zero norm was compared
    #[error("Degenerate embedding vector (zero norm)")]
    DegenerateVector,

    /// Model loading or inference failed
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Workflow step requested from the wrong stage
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The persistence layer is unreachable or corrupt
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Standard error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code (HTTP status code)
    pub code: u16,
    /// Error message
    pub message: String,
}

impl AppError {
    /// Get the HTTP status code for this error
    #[cfg(feature = "web")]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::UnsupportedImage(_) | Self::InvalidState(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidCredentials | Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::UsernameTaken => StatusCode::CONFLICT,
            Self::DimensionMismatch { .. } | Self::DegenerateVector | Self::EmbeddingFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert the error to a JSON response body
    pub fn to_json(&self) -> ErrorResponse {
        #[cfg(feature = "web")]
        let code = self.status_code().as_u16();
        #[cfg(not(feature = "web"))]
        let code = 500u16;

        ErrorResponse {
            code,
            message: self.to_string(),
        }
    }
}

#[cfg(feature = "web")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        let body = serde_json::json!({
            "success": false,
            "data": null,
            "error": self.to_json(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::StorageUnavailable(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::UnsupportedImage(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Password hashing error: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task join error: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(feature = "web")]
impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::InvalidInput(format!("Malformed multipart body: {}", err))
    }
}

#[cfg(feature = "embeddings")]
impl From<tch::TchError> for AppError {
    fn from(err: tch::TchError) -> Self {
        AppError::EmbeddingFailed(format!("PyTorch error: {}", err))
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_do_not_leak_cause() {
        assert_eq!(
            AppError::InvalidCredentials.to_string(),
            "Invalid username or password"
        );
    }

    #[cfg(feature = "web")]
    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::UsernameTaken.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::UnsupportedImage("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::StorageUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::DimensionMismatch { left: 2, right: 3 }.to_json().code,
            422
        );
    }

    #[test]
    fn test_sqlite_error_maps_to_storage_unavailable() {
        let err: AppError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
    }
}
