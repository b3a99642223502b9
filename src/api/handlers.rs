use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{comparison::ImageUpload, credentials::Credentials},
    state::AppState,
    workflow::{ComparisonOutcome, Session},
};

use super::responses::{ApiResponse, HealthInfo, HistoryEntry, LoginInfo, Message};

/// Header carrying the id returned by `/api/login`.
pub const SESSION_HEADER: &str = "x-session-id";

/// Health check endpoint
pub async fn health_check() -> ApiResponse<HealthInfo> {
    ApiResponse::success(HealthInfo {
        status: "OK",
        version: crate::built_info::PKG_VERSION,
        built_at: crate::built_info::BUILT_TIME_UTC,
    })
}

pub(crate) async fn register(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<ApiResponse<Message>> {
    state.orchestrator.register(&credentials).await?;
    Ok(ApiResponse::success(Message {
        message: "Registered successfully. Please log in.".to_string(),
    }))
}

pub(crate) async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<ApiResponse<LoginInfo>> {
    let mut session = Session::new();
    state.orchestrator.login(&mut session, &credentials).await?;
    let session_id = state.sessions.insert(session).await;

    Ok(ApiResponse::success(LoginInfo {
        session_id: session_id.to_string(),
        username: credentials.username,
    }))
}

pub(crate) async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<ApiResponse<Message>> {
    let (id, session) = lookup_session(&state, &headers).await?;
    state.orchestrator.logout(&mut *session.lock().await);
    state.sessions.remove(&id).await;

    Ok(ApiResponse::success(Message {
        message: "Logged out".to_string(),
    }))
}

pub(crate) async fn compare(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<ApiResponse<ComparisonOutcome>> {
    let (_, session) = lookup_session(&state, &headers).await?;

    let mut image1 = None;
    let mut image2 = None;

    // Process the multipart form data
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        if name != "image1" && name != "image2" {
            continue;
        }

        let file_name = field
            .file_name()
            .map(String::from)
            .ok_or_else(|| AppError::InvalidInput(format!("{} has no filename", name)))?;
        let content = field.bytes().await?;
        let upload = ImageUpload::new(file_name, content);

        if name == "image1" {
            image1 = Some(upload);
        } else {
            image2 = Some(upload);
        }
    }

    let (image1, image2) = match (image1, image2) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(AppError::InvalidInput(
                "both image1 and image2 are required".to_string(),
            ))
        }
    };

    let mut session = session.lock().await;
    let outcome = state
        .orchestrator
        .compare_and_record(&mut session, image1, image2)
        .await?;

    Ok(ApiResponse::success(outcome))
}

pub(crate) async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<ApiResponse<Vec<HistoryEntry>>> {
    let (_, session) = lookup_session(&state, &headers).await?;
    let session = session.lock().await;
    let records = state.orchestrator.history(&session).await?;

    Ok(ApiResponse::success(
        records.into_iter().map(HistoryEntry::from).collect(),
    ))
}

async fn lookup_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Uuid, Arc<Mutex<Session>>)> {
    let id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(AppError::NotAuthenticated)?;

    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or(AppError::NotAuthenticated)?;
    Ok((id, session))
}
