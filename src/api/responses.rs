use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use serde_json::json;

use crate::models::comparison::{Classification, ComparisonRecord};
use crate::utils::guess_content_type;

#[derive(Debug, Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    pub(crate) success: bool,
    pub(crate) data: Option<T>,
    pub(crate) error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };

        let body = json!({
            "success": self.success,
            "data": self.data,
            "error": self.error,
        });

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthInfo {
    pub(crate) status: &'static str,
    pub(crate) version: &'static str,
    pub(crate) built_at: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginInfo {
    pub(crate) session_id: String,
    pub(crate) username: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Message {
    pub(crate) message: String,
}

/// One image of a stored comparison, encoded for re-display.
#[derive(Debug, Serialize)]
pub(crate) struct StoredImage {
    pub(crate) name: String,
    pub(crate) content_type: String,
    pub(crate) data_base64: String,
}

impl StoredImage {
    fn new(name: String, bytes: &[u8]) -> Self {
        Self {
            content_type: guess_content_type(&name),
            data_base64: BASE64.encode(bytes),
            name,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HistoryEntry {
    pub(crate) id: i64,
    pub(crate) image1: StoredImage,
    pub(crate) image2: StoredImage,
    pub(crate) similarity: f32,
    pub(crate) label: Classification,
    pub(crate) created_at: String,
}

impl From<ComparisonRecord> for HistoryEntry {
    fn from(record: ComparisonRecord) -> Self {
        Self {
            id: record.id,
            image1: StoredImage::new(record.image1_name, &record.image1_bytes),
            image2: StoredImage::new(record.image2_name, &record.image2_bytes),
            similarity: record.similarity,
            label: record.classification,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}
