//! The mutator: recursive delete, rename, move, and directory creation.
//!
//! Delete, rename, and move are each two-phase: the filesystem change
//! first (atomic rename / recursive removal), then one transactional
//! metadata update that propagates the change to every affected record.

use crate::audit::{
    ACTION_DELETE, ACTION_MKDIR, ACTION_MOVE, ACTION_PATCH_META, ACTION_RENAME, AuditActor,
};
use crate::auth::{self, Principal};
use crate::error::{ApiError, ApiResult};
use crate::policy::{self, ModifyOptions, PolicyDecision};
use crate::state::AppState;
use axum::Json;
use axum::extract::{FromRequest, Path as UrlPath, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use depot_core::path;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

async fn gate(
    state: &AppState,
    logical: &str,
    principal: &Principal,
    opts: ModifyOptions,
) -> ApiResult<Result<(), String>> {
    let decision = policy::can_modify(
        state.metadata.as_ref(),
        &state.config.storage,
        logical,
        &principal.allowed_paths,
        opts,
    )
    .await?;
    Ok(match decision {
        PolicyDecision::Allowed => Ok(()),
        PolicyDecision::Denied(msg) => Err(msg),
    })
}

/// `DELETE /<path>` - recursive delete of a blob or subtree.
pub async fn delete_entry(
    state: AppState,
    req: Request,
    principal: Principal,
) -> ApiResult<Response> {
    let logical = path::clean(req.uri().path());
    let actor = AuditActor::from_principal(&principal, auth::request_id(&req));

    if !state.blobs.exists(&logical).await? {
        return Err(ApiError::NotFound(logical));
    }

    if let Err(msg) = gate(&state, &logical, &principal, ModifyOptions::default()).await? {
        state
            .audit
            .failure(&actor, ACTION_DELETE, &logical, &msg, json!({}));
        return Err(ApiError::PolicyDenied(msg));
    }

    // Collect affected record paths before anything is lost, so the audit
    // trail names what went away.
    let affected = state.metadata.subtree_paths(&logical).await?;

    if let Err(e) = state.blobs.remove_all(&logical).await {
        state
            .audit
            .failure(&actor, ACTION_DELETE, &logical, &e.to_string(), json!({}));
        return Err(e.into());
    }

    // The blobs are gone either way; a failed metadata delete leaves
    // ghost records for the reconciler to sweep.
    if let Err(e) = state.metadata.delete_subtree(&logical).await {
        tracing::error!(path = %logical, error = %e, "failed to clear metadata after physical delete");
    }

    state.audit.success(
        &actor,
        ACTION_DELETE,
        &logical,
        json!({"deleted_count": affected.len(), "affected_paths": affected}),
    );
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /_/api/v1/fs/{path}` body.
#[derive(Debug, Default, Deserialize)]
pub struct FsPostRequest {
    #[serde(default)]
    pub create_dir: bool,
    #[serde(default)]
    pub rename_to: Option<String>,
    #[serde(default)]
    pub move_to: Option<String>,
}

/// `POST /_/api/v1/fs/{path}` - create a directory, rename, or move.
pub async fn post_fs(
    State(state): State<AppState>,
    UrlPath(raw_path): UrlPath<String>,
    req: Request,
) -> ApiResult<Response> {
    let logical = path::clean(&format!("/{raw_path}"));
    let principal = auth::require_principal(&req)?;
    let actor = AuditActor::from_principal(&principal, auth::request_id(&req));

    let Json(body) = Json::<FsPostRequest>::from_request(req, &())
        .await
        .map_err(|_| ApiError::BadRequest("Invalid request".to_string()))?;

    if let Err(msg) = gate(&state, &logical, &principal, ModifyOptions::default()).await? {
        state
            .audit
            .failure(&actor, ACTION_PATCH_META, &logical, &msg, json!({}));
        return Err(ApiError::PolicyDenied(msg));
    }

    if body.create_dir {
        state.blobs.create_dir_all(&logical).await?;
        state
            .audit
            .success(&actor, ACTION_MKDIR, &logical, json!({}));
        return Ok((StatusCode::CREATED, Json(json!({"status": "created"}))).into_response());
    }

    if let Some(rename_to) = &body.rename_to {
        // The new name must stay in the current directory.
        if !path::is_bare_name(rename_to) {
            return Err(ApiError::BadRequest(format!(
                "invalid rename target: {rename_to:?}"
            )));
        }
        let new_path = path::join(&path::parent(&logical), rename_to);
        return relocate(&state, &actor, &principal, &logical, &new_path, ACTION_RENAME).await;
    }

    if let Some(move_to) = &body.move_to {
        let new_path = path::clean(move_to);
        if new_path == logical {
            return Err(ApiError::BadRequest(
                "source and destination are the same".to_string(),
            ));
        }
        if path::is_within(&new_path, &logical) {
            return Err(ApiError::BadRequest(
                "cannot move a directory into its own subdirectory".to_string(),
            ));
        }
        return relocate(&state, &actor, &principal, &logical, &new_path, ACTION_MOVE).await;
    }

    Err(ApiError::BadRequest("invalid action".to_string()))
}

/// Shared tail of rename and move: policy at the destination, atomic
/// filesystem rename, then one recursive path rewrite in metadata.
async fn relocate(
    state: &AppState,
    actor: &AuditActor,
    principal: &Principal,
    old_path: &str,
    new_path: &str,
    action: &str,
) -> ApiResult<Response> {
    if let Err(msg) = gate(state, new_path, principal, ModifyOptions::default()).await? {
        state
            .audit
            .failure(actor, action, new_path, &msg, json!({}));
        return Err(ApiError::PolicyDenied(msg));
    }

    if !state.blobs.exists(old_path).await? {
        return Err(ApiError::NotFound(old_path.to_string()));
    }

    if let Err(e) = state.blobs.rename(old_path, new_path).await {
        tracing::warn!(from = %old_path, to = %new_path, error = %e, "filesystem rename failed");
        return Err(ApiError::Internal(format!(
            "Filesystem rename failed: {e}"
        )));
    }

    let touched = state
        .metadata
        .rename_subtree(old_path, new_path, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(from = %old_path, to = %new_path, records = touched, "renamed metadata records");

    state.audit.success(
        actor,
        action,
        new_path,
        json!({"from": old_path, "records": touched}),
    );
    Ok((
        StatusCode::OK,
        Json(json!({"status": "renamed", "new_path": new_path})),
    )
        .into_response())
}
