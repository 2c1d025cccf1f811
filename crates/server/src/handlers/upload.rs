//! The write pipeline: streaming upload with size bounding, triple
//! checksumming, client-checksum verification, retention policy, and a
//! transactional metadata commit.
//!
//! Every failure before the commit leaves no partial blob and no metadata
//! change. A failure *of* the commit leaves the blob on disk; the
//! reconciler rebuilds its metadata on the next sweep.

use crate::audit::{ACTION_UPLOAD, AuditActor};
use crate::auth::{self, Principal};
use crate::error::{ApiError, ApiResult};
use crate::handlers::meta;
use crate::policy::{self, ModifyOptions, PolicyDecision};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use depot_core::{expiry, path, stream as stream_hdr, tags as tags_hdr};
use depot_metadata::UploadCommit;
use futures::TryStreamExt;
use md5::Md5;
use serde_json::json;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

/// Sniff window for content-type detection when no header supplies one.
const SNIFF_LEN: usize = 512;

/// Where the upload body comes from: a raw request body or the `file`
/// part of a multipart form.
enum BodySource<'a> {
    Raw(axum::body::BodyDataStream),
    Part(Field<'a>),
}

impl BodySource<'_> {
    async fn next_chunk(&mut self) -> ApiResult<Option<Bytes>> {
        match self {
            Self::Raw(stream) => stream
                .try_next()
                .await
                .map_err(|e| ApiError::Internal(format!("body read failed: {e}"))),
            Self::Part(field) => field
                .chunk()
                .await
                .map_err(|e| ApiError::BadRequest(format!("multipart read failed: {e}"))),
        }
    }
}

/// Result of the bounded tee-copy: byte count, three digests, and the
/// sniff window for content-type detection.
struct StreamedBlob {
    written: u64,
    md5: String,
    sha1: String,
    sha256: String,
    sniff: Vec<u8>,
}

enum CopyOutcome {
    Complete(StreamedBlob),
    TooLarge,
}

/// Copy the body into the file through all three digests, stopping as
/// soon as the byte count exceeds `max`.
async fn copy_bounded(
    file: &mut tokio::fs::File,
    source: &mut BodySource<'_>,
    max: u64,
) -> ApiResult<CopyOutcome> {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut sniff: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
    let mut written: u64 = 0;

    while let Some(chunk) = source.next_chunk().await? {
        written += chunk.len() as u64;
        if written > max {
            return Ok(CopyOutcome::TooLarge);
        }

        md5.update(&chunk);
        sha1.update(&chunk);
        sha256.update(&chunk);
        if sniff.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - sniff.len()).min(chunk.len());
            sniff.extend_from_slice(&chunk[..take]);
        }

        file.write_all(&chunk).await?;
    }

    file.sync_all().await?;
    Ok(CopyOutcome::Complete(StreamedBlob {
        written,
        md5: hex::encode(md5.finalize()),
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
        sniff,
    }))
}

/// Retention and integrity headers consumed by the pipeline.
struct UploadHeaders {
    expires_at: Option<OffsetDateTime>,
    stream: Option<(String, String)>,
    keep_latest: bool,
    tags: Option<Vec<(String, String)>>,
    client_md5: Option<String>,
    client_sha1: Option<String>,
    client_sha256: Option<String>,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_upload_headers(headers: &HeaderMap, now: OffsetDateTime) -> ApiResult<UploadHeaders> {
    let keep_latest = header_str(headers, "x-keeplatest") == Some("true");

    let stream = stream_hdr::parse_stream(header_str(headers, "x-stream").unwrap_or_default())?;
    if keep_latest && stream.is_none() {
        return Err(ApiError::BadRequest(
            "X-KeepLatest requires an X-Stream header".to_string(),
        ));
    }

    let expires_at = match header_str(headers, "x-expires") {
        Some(value) if !value.is_empty() => Some(
            expiry::parse_expiry(value, now)
                .map_err(|e| ApiError::BadRequest(format!("X-Expires: {e}")))?,
        ),
        _ => None,
    };

    let tags = header_str(headers, "x-tags")
        .filter(|v| !v.is_empty())
        .map(|v| {
            tags_hdr::parse_tags(v)
                .into_iter()
                .map(|t| (t.key, t.value))
                .collect()
        });

    Ok(UploadHeaders {
        expires_at,
        stream,
        keep_latest,
        tags,
        client_md5: header_str(headers, "x-checksum-md5").map(str::to_string),
        client_sha1: header_str(headers, "x-checksum-sha1").map(str::to_string),
        client_sha256: header_str(headers, "x-checksum-sha256").map(str::to_string),
    })
}

/// Compare client-declared digests against the computed ones
/// (case-insensitive hex). Returns the first mismatch description.
fn verify_checksums(headers: &UploadHeaders, blob: &StreamedBlob) -> Option<String> {
    if let Some(expected) = &headers.client_sha256 {
        if !expected.eq_ignore_ascii_case(&blob.sha256) {
            return Some(format!(
                "SHA256 mismatch: expected {expected}, got {}",
                blob.sha256
            ));
        }
    }
    if let Some(expected) = &headers.client_sha1 {
        if !expected.eq_ignore_ascii_case(&blob.sha1) {
            return Some(format!(
                "SHA1 mismatch: expected {expected}, got {}",
                blob.sha1
            ));
        }
    }
    if let Some(expected) = &headers.client_md5 {
        if !expected.eq_ignore_ascii_case(&blob.md5) {
            return Some(format!("MD5 mismatch: expected {expected}, got {}", blob.md5));
        }
    }
    None
}

/// PUT/POST on a blob path (raw body) or on a directory (multipart with a
/// `file` field supplying the leaf name).
pub async fn handle_upload(
    state: AppState,
    req: Request,
    principal: Principal,
) -> ApiResult<Response> {
    let method = req.method().clone();
    let url_path = path::clean(req.uri().path());
    let actor = AuditActor::from_principal(&principal, auth::request_id(&req));
    let headers = req.headers().clone();
    let max = state.config.storage.max_upload_size_bytes;

    // Size gate on the declared length; the copy enforces the true bound.
    let declared_len = header_str(&headers, CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared_len {
        if len > max {
            state.audit.failure(
                &actor,
                ACTION_UPLOAD,
                &url_path,
                "file too large",
                json!({"max_upload_size_bytes": max}),
            );
            return Err(ApiError::PayloadTooLarge(format!(
                "File too large. Maximum allowed: {}",
                state.config.storage.max_upload_size
            )));
        }
    }

    let request_content_type = header_str(&headers, CONTENT_TYPE.as_str()).map(str::to_string);
    let is_multipart = request_content_type
        .as_deref()
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

        let field = loop {
            match multipart
                .next_field()
                .await
                .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
            {
                Some(field) if field.name() == Some("file") => break field,
                Some(_) => continue,
                None => {
                    return Err(ApiError::BadRequest("missing file in form".to_string()));
                }
            }
        };

        // The URL names the directory; the part filename supplies the leaf.
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("missing filename in form".to_string()))?;
        if !path::is_bare_name(&file_name) {
            return Err(ApiError::BadRequest(format!(
                "invalid filename: {file_name:?}"
            )));
        }
        let final_path = path::join(&url_path, &file_name);
        let part_content_type = field.content_type().map(str::to_string);

        let mut source = BodySource::Part(field);
        run_pipeline(
            &state,
            &principal,
            &actor,
            &method,
            final_path,
            part_content_type,
            &headers,
            &mut source,
        )
        .await
    } else {
        let final_path = url_path;
        let mut source = BodySource::Raw(req.into_body().into_data_stream());
        run_pipeline(
            &state,
            &principal,
            &actor,
            &method,
            final_path,
            request_content_type,
            &headers,
            &mut source,
        )
        .await
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    state: &AppState,
    principal: &Principal,
    actor: &AuditActor,
    method: &Method,
    final_path: String,
    content_type_hint: Option<String>,
    headers: &HeaderMap,
    source: &mut BodySource<'_>,
) -> ApiResult<Response> {
    let max = state.config.storage.max_upload_size_bytes;
    let now = OffsetDateTime::now_utc();

    // Overwrite classification: POST refuses to replace anything.
    let existing = state.blobs.try_stat(&final_path).await?;
    if *method == Method::POST {
        if let Some(existing) = &existing {
            let msg = if existing.is_dir {
                "directory with same name already exists"
            } else {
                "file exists"
            };
            return Err(ApiError::Conflict(msg.to_string()));
        }
    }
    let is_new = existing.is_none();

    // Policy gate. A brand-new file may land in a protected directory;
    // overwrites there stay blocked.
    let decision = policy::can_modify(
        state.metadata.as_ref(),
        &state.config.storage,
        &final_path,
        &principal.allowed_paths,
        ModifyOptions {
            ignore_protected: is_new,
            is_upload: true,
        },
    )
    .await?;
    if let PolicyDecision::Denied(msg) = decision {
        state
            .audit
            .failure(actor, ACTION_UPLOAD, &final_path, &msg, json!({}));
        return Err(ApiError::PolicyDenied(msg));
    }

    let parsed = parse_upload_headers(headers, now)?;

    // Streaming write: blob bytes and all three digests in one pass.
    let mut file = state.blobs.create(&final_path).await?;
    let outcome = match copy_bounded(&mut file, source, max).await {
        Ok(outcome) => outcome,
        Err(e) => {
            drop(file);
            remove_partial(state, &final_path).await;
            return Err(e);
        }
    };
    drop(file);

    let blob = match outcome {
        CopyOutcome::Complete(blob) => blob,
        CopyOutcome::TooLarge => {
            remove_partial(state, &final_path).await;
            state.audit.failure(
                actor,
                ACTION_UPLOAD,
                &final_path,
                "file content exceeded limit",
                json!({"max_upload_size_bytes": max}),
            );
            return Err(ApiError::PayloadTooLarge(
                "File content exceeded limit".to_string(),
            ));
        }
    };

    // Inbound integrity check.
    if let Some(mismatch) = verify_checksums(&parsed, &blob) {
        remove_partial(state, &final_path).await;
        state.audit.failure(
            actor,
            ACTION_UPLOAD,
            &final_path,
            &mismatch,
            json!({"status": "corrupted"}),
        );
        return Err(ApiError::IntegrityFailed(mismatch));
    }

    let content_type = content_type_hint
        .filter(|ct| !ct.is_empty())
        .or_else(|| infer::get(&blob.sniff).map(|t| t.mime_type().to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    // Transactional metadata commit.
    let commit = UploadCommit {
        path: final_path.clone(),
        size: blob.written as i64,
        mod_time: now,
        content_type,
        md5: blob.md5,
        sha1: blob.sha1,
        sha256: blob.sha256,
        expires_at: parsed.expires_at,
        stream: parsed.stream,
        keep_latest: parsed.keep_latest,
        tags: parsed.tags,
        download_mode: state
            .config
            .storage
            .default_batch_mode
            .as_str()
            .to_string(),
    };

    let row = match state.metadata.commit_upload(&commit).await {
        Ok(row) => row,
        Err(e) => {
            // The blob stays; the reconciler heals its metadata.
            state.audit.failure(
                actor,
                ACTION_UPLOAD,
                &final_path,
                &e.to_string(),
                json!({}),
            );
            tracing::error!(path = %final_path, error = %e, "metadata commit failed");
            return Err(ApiError::Internal("Database sync failed".to_string()));
        }
    };

    state.audit.success(
        actor,
        ACTION_UPLOAD,
        &final_path,
        json!({"size": row.size, "sha256": row.sha256}),
    );

    let record_tags = state.metadata.tags_for(row.id).await.unwrap_or_default();
    let mut response =
        meta::ResourceResponse::from_physical(&final_path, false, row.size, row.mod_time);
    response.apply_record(&row, record_tags);

    let status = if *method == Method::POST {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)).into_response())
}

async fn remove_partial(state: &AppState, logical: &str) {
    if let Err(e) = state.blobs.remove_file(logical).await {
        tracing::warn!(path = %logical, error = %e, "failed to remove partial upload");
    }
}
