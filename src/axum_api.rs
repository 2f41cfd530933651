#[cfg(feature = "axum")]
use crate::errors::RecoveryError;
#[cfg(feature = "axum")]
use crate::service::RecoveryService;
#[cfg(feature = "axum")]
use axum::{
    extract::{Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
#[cfg(feature = "axum")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "axum")]
use std::sync::Arc;

#[cfg(feature = "axum")]
#[derive(Clone)]
pub struct AppState {
    pub recovery: Arc<RecoveryService>,
}

#[cfg(feature = "axum")]
#[derive(Deserialize)]
pub struct RequestOtpRequest {
    pub email: String,
}

#[cfg(feature = "axum")]
#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[cfg(feature = "axum")]
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub reset_token: String,
    pub new_password: String,
}

#[cfg(feature = "axum")]
#[derive(Serialize)]
pub struct ResetTokenResponse {
    pub reset_token: String,
}

#[cfg(feature = "axum")]
impl IntoResponse for RecoveryError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            RecoveryError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
            }
            RecoveryError::OtpNotFound => (StatusCode::BAD_REQUEST, "No active code"),
            RecoveryError::OtpExpired => (StatusCode::BAD_REQUEST, "Code expired"),
            RecoveryError::OtpAttemptsExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many failed attempts")
            }
            RecoveryError::OtpMismatch => (StatusCode::BAD_REQUEST, "Incorrect code"),
            RecoveryError::TokenInvalid => (StatusCode::BAD_REQUEST, "Invalid reset token"),
            RecoveryError::TokenExpired => (StatusCode::BAD_REQUEST, "Reset token expired"),
            RecoveryError::TokenAlreadyUsed => {
                (StatusCode::BAD_REQUEST, "Reset token already used")
            }
            RecoveryError::EmailError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to send email"),
            RecoveryError::UserStoreError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "User store error")
            }
            RecoveryError::ConfigError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error")
            }
            RecoveryError::StorageError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Storage error"),
        };

        let retry_after = match &self {
            RecoveryError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// First entry of `X-Forwarded-For`, the usual shape behind a reverse proxy.
#[cfg(feature = "axum")]
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(feature = "axum")]
pub async fn request_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RequestOtpRequest>,
) -> Result<Json<serde_json::Value>, RecoveryError> {
    let ip = client_ip(&headers);
    state.recovery.request_recovery(&payload.email, &ip).await?;
    Ok(Json(serde_json::json!({
        "message": "If the address is registered, a code is on its way"
    })))
}

#[cfg(feature = "axum")]
pub async fn verify_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<ResetTokenResponse>, RecoveryError> {
    let ip = client_ip(&headers);
    let reset_token = state
        .recovery
        .confirm_otp(&payload.email, &payload.otp, &ip)
        .await?;

    Ok(Json(ResetTokenResponse { reset_token }))
}

#[cfg(feature = "axum")]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, RecoveryError> {
    state
        .recovery
        .reset_password(&payload.reset_token, &payload.new_password)
        .await?;
    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}

#[cfg(feature = "axum")]
pub fn recovery_router(recovery: Arc<RecoveryService>) -> Router {
    let state = AppState { recovery };
    Router::new()
        .route("/request-otp", post(request_otp))
        .route("/verify-otp", post(verify_otp))
        .route("/reset-password", post(reset_password))
        .with_state(state)
}
