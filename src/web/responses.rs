use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::{
    content::ContentError, gateway::GatewayError, moderation::ModerationError,
    web::uploads::FormError,
};

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiMessage>);
pub type ApiResult<T> = Result<T, ApiError>;

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiMessage::new(message)))
}

pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiMessage::for_field(field, message)),
    )
}

pub fn gateway_error(err: GatewayError) -> ApiError {
    match err {
        GatewayError::NotFound => json_error(StatusCode::NOT_FOUND, "record not found"),
        err => {
            error!(?err, "backend request failed");
            json_error(StatusCode::BAD_GATEWAY, "backend request failed")
        }
    }
}

pub fn moderation_error(err: ModerationError) -> ApiError {
    match err {
        ModerationError::Validation { field, message } => field_error(field, message),
        ModerationError::Upload(err) => {
            error!(?err, "moderation upload failed");
            json_error(
                StatusCode::BAD_GATEWAY,
                "attachment upload failed; the record was not changed",
            )
        }
        ModerationError::Persistence(GatewayError::NotFound) => {
            json_error(StatusCode::NOT_FOUND, "record not found")
        }
        ModerationError::Persistence(err) => {
            error!(?err, "moderation persistence failed");
            json_error(StatusCode::BAD_GATEWAY, "failed to save the record")
        }
    }
}

pub fn form_error(err: FormError) -> ApiError {
    match err.field() {
        Some(field) => field_error(field, err.message()),
        None => json_error(StatusCode::BAD_REQUEST, err.message()),
    }
}

pub fn content_error(err: ContentError) -> ApiError {
    match err {
        ContentError::Validation { field, message } => field_error(field, message),
        ContentError::Gateway(err) => gateway_error(err),
    }
}
