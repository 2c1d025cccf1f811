//! Metadata surface: record and listing responses, metadata patch.

use crate::audit::{ACTION_PATCH_META, AuditActor};
use crate::auth::{self, Principal};
use crate::error::{ApiError, ApiResult};
use crate::policy::{self, PolicyDecision};
use crate::state::AppState;
use axum::Json;
use axum::extract::{FromRequest, Path as UrlPath, Request, State};
use axum::response::{IntoResponse, Response};
use depot_core::mode::DownloadMode;
use depot_core::{expiry, path, stream, tags};
use depot_metadata::{ResourcePatch, ResourceRow, TagRow, KIND_DIR, KIND_FILE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

/// Effective policy bits overlaid on a response.
#[derive(Debug, Default, Serialize)]
pub struct ResourcePolicyBits {
    /// This record or any ancestor is immutable.
    pub is_immutable: bool,
    /// The path lies under a configured protected prefix.
    pub is_protected: bool,
    /// The current principal's scopes cover the path.
    pub is_allowed: bool,
}

/// One resource as the API reports it: physical attributes from `stat`
/// combined with the metadata record, when one exists.
#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub name: String,
    pub isdir: bool,
    pub size: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub modtime: OffsetDateTime,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagRow>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stream: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub keep_latest: bool,
    #[serde(rename = "contenttype", skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub checksum_sha1: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub checksum_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub checksum_md5: String,
    pub policy: ResourcePolicyBits,
    pub download_mode: String,
}

impl ResourceResponse {
    /// Start from physical attributes alone.
    pub fn from_physical(
        logical_path: &str,
        is_dir: bool,
        size: i64,
        modtime: OffsetDateTime,
    ) -> Self {
        Self {
            name: logical_path.to_string(),
            isdir: is_dir,
            size,
            modtime,
            expires_at: None,
            tags: Vec::new(),
            stream: String::new(),
            group: String::new(),
            keep_latest: false,
            content_type: String::new(),
            checksum_sha1: String::new(),
            checksum_sha256: String::new(),
            checksum_md5: String::new(),
            policy: ResourcePolicyBits::default(),
            download_mode: DownloadMode::Literal.as_str().to_string(),
        }
    }

    /// Overlay the metadata record.
    pub fn apply_record(&mut self, record: &ResourceRow, record_tags: Vec<TagRow>) {
        self.expires_at = record.expires_at;
        self.tags = record_tags;
        self.stream = record.stream.clone().unwrap_or_default();
        self.group = record.grp.clone().unwrap_or_default();
        self.keep_latest = record.is_keep_latest();
        self.content_type = record.content_type.clone().unwrap_or_default();
        self.checksum_md5 = record.md5.clone();
        self.checksum_sha1 = record.sha1.clone();
        self.checksum_sha256 = record.sha256.clone();
        self.download_mode = record.download_mode.clone();
    }
}

/// Build the full response for one path, fetching its record and tags.
pub(crate) async fn describe(
    state: &AppState,
    logical_path: &str,
    is_dir: bool,
    size: i64,
    modtime: OffsetDateTime,
    inherited_immutable: bool,
    scopes: &[String],
) -> ApiResult<ResourceResponse> {
    let record = state.metadata.get_resource(logical_path).await?;
    let record_tags = match &record {
        Some(r) => state.metadata.tags_for(r.id).await?,
        None => Vec::new(),
    };

    let mut response = ResourceResponse::from_physical(logical_path, is_dir, size, modtime);
    let own_immutable = record.as_ref().map(|r| r.is_immutable()).unwrap_or(false);
    if let Some(record) = &record {
        response.apply_record(record, record_tags);
    }

    response.policy = ResourcePolicyBits {
        is_immutable: inherited_immutable || own_immutable,
        is_protected: state.config.storage.is_protected(logical_path),
        is_allowed: auth::is_in_scopes(logical_path, scopes),
    };

    Ok(response)
}

fn scopes_of(req: &Request) -> Vec<String> {
    req.extensions()
        .get::<Principal>()
        .map(|p| p.allowed_paths.clone())
        .unwrap_or_default()
}

/// Whether any record along the ancestor chain (excluding the path
/// itself) is immutable.
async fn ancestors_immutable(state: &AppState, logical_path: &str) -> ApiResult<bool> {
    let mut chain = path::chain(logical_path);
    chain.remove(0);
    if chain.is_empty() {
        return Ok(false);
    }
    let records = state.metadata.get_resources(&chain).await?;
    Ok(records.iter().any(|r| r.is_immutable()))
}

/// `GET /_/api/v1/fs` - metadata for the root directory.
pub async fn get_meta_root(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    get_meta_at(state, "/".to_string(), req).await
}

/// `GET /_/api/v1/fs/{path}` - record for a file, child array for a
/// directory.
pub async fn get_meta(
    State(state): State<AppState>,
    UrlPath(raw_path): UrlPath<String>,
    req: Request,
) -> ApiResult<Response> {
    get_meta_at(state, raw_path, req).await
}

async fn get_meta_at(state: AppState, raw_path: String, req: Request) -> ApiResult<Response> {
    let logical = path::clean(&format!("/{raw_path}"));
    let scopes = scopes_of(&req);

    let phys = state
        .blobs
        .try_stat(&logical)
        .await?
        .ok_or_else(|| ApiError::NotFound(logical.clone()))?;

    if phys.is_dir {
        // Immutability inherited by every child: any record on the
        // directory's own chain.
        let chain_records = state.metadata.get_resources(&path::chain(&logical)).await?;
        let inherited = chain_records.iter().any(|r| r.is_immutable());

        let entries = state.blobs.read_dir(&logical).await?;
        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let child_path = path::join(&logical, &entry.name);
            let child = describe(
                &state,
                &child_path,
                entry.is_dir,
                entry.size as i64,
                OffsetDateTime::from(entry.modified),
                inherited,
                &scopes,
            )
            .await?;
            children.push(child);
        }
        return Ok(Json(children).into_response());
    }

    let inherited = ancestors_immutable(&state, &logical).await?;
    let response = describe(
        &state,
        &logical,
        false,
        phys.size as i64,
        OffsetDateTime::from(phys.modified),
        inherited,
        &scopes,
    )
    .await?;
    Ok(Json(response).into_response())
}

/// Metadata patch body. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct MetaPatchRequest {
    pub expires_at: Option<String>,
    pub tags: Option<String>,
    pub immutable: Option<bool>,
    pub stream: Option<String>,
    pub keep_latest: Option<bool>,
    #[serde(rename = "contenttype")]
    pub content_type: Option<String>,
    pub download_mode: Option<String>,
}

/// `PATCH /_/api/v1/fs/{path}` - metadata update.
pub async fn patch_meta(
    State(state): State<AppState>,
    UrlPath(raw_path): UrlPath<String>,
    req: Request,
) -> ApiResult<Response> {
    let logical = path::clean(&format!("/{raw_path}"));
    let principal = auth::require_principal(&req)?;
    let actor = AuditActor::from_principal(&principal, auth::request_id(&req));

    let Json(body) = Json::<MetaPatchRequest>::from_request(req, &())
        .await
        .map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))?;

    if let PolicyDecision::Denied(msg) = policy::check_scopes(&logical, &principal.allowed_paths) {
        state
            .audit
            .failure(&actor, ACTION_PATCH_META, &logical, &msg, json!({}));
        return Err(ApiError::PolicyDenied(msg));
    }

    // The physical file must exist before metadata can be attached.
    let phys = state
        .blobs
        .try_stat(&logical)
        .await?
        .ok_or_else(|| ApiError::NotFound("physical path not found on disk".to_string()))?;

    let now = OffsetDateTime::now_utc();
    let mut patch = ResourcePatch {
        immutable: body.immutable,
        keep_latest: body.keep_latest,
        content_type: body.content_type.clone(),
        ..ResourcePatch::default()
    };

    if let Some(value) = &body.expires_at {
        patch.expires_at = Some(
            expiry::parse_expiry(value, now)
                .map_err(|e| ApiError::BadRequest(format!("expiry: {e}")))?,
        );
    }
    if let Some(value) = &body.stream {
        let pair = stream::parse_stream(value)?.ok_or_else(|| {
            ApiError::BadRequest("stream must be in format 'stream/group'".to_string())
        })?;
        patch.stream = Some(pair);
    }
    if let Some(value) = &body.download_mode {
        patch.download_mode = Some(DownloadMode::parse(value)?.as_str().to_string());
    }
    if let Some(value) = &body.tags {
        patch.tags = Some(
            tags::parse_tags(value)
                .into_iter()
                .map(|t| (t.key, t.value))
                .collect(),
        );
    }

    let kind = if phys.is_dir { KIND_DIR } else { KIND_FILE };
    let row = state
        .metadata
        .apply_patch(&logical, kind, &patch, now)
        .await?;

    if body.immutable == Some(false) {
        state
            .audit
            .success(&actor, ACTION_PATCH_META, &logical, json!({"action": "unlocked"}));
    } else {
        state
            .audit
            .success(&actor, ACTION_PATCH_META, &logical, json!({}));
    }

    let inherited = ancestors_immutable(&state, &logical).await?;
    let response = describe(
        &state,
        &logical,
        row.is_dir(),
        phys.size as i64,
        OffsetDateTime::from(phys.modified),
        inherited,
        &principal.allowed_paths,
    )
    .await?;
    Ok(Json(response).into_response())
}
