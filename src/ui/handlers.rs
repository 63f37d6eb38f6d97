//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::ui::server::AppState;
use crate::ui::status::{StatusSnapshot, UiInput};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Current session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusSnapshot>> {
    Json(ApiResponse::ok(state.status.snapshot()))
}

/// Available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    Json(ApiResponse::ok(list_devices()))
}

/// Press the button; the main loop applies it on its next tick
pub async fn press_button(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    state.status.press(UiInput::Button);
    (StatusCode::ACCEPTED, Json(ApiResponse::ok(())))
}

/// Fallback for unknown API routes
pub async fn not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error("no such endpoint")))
}
