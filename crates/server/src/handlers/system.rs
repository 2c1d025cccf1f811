//! System endpoints.

use crate::auth;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// `POST /_/api/v1/system/sync` - request a reconciler sweep. The trigger
/// is coalesced with any sweep already pending or in flight.
pub async fn trigger_sync(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    auth::require_principal(&req)?;
    state.sync.trigger();
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "sync scheduled"}))).into_response())
}
