//! Blob surface: dispatch and the read path.
//!
//! The blob surface and the metadata surface never collide: anything under
//! `/_/api` that reached the fallback is an unknown API route and gets a
//! 404, every other path is treated as a blob name.

use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{mutate, upload};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use depot_core::path;
use depot_storage::BlobMeta;

/// Fallback handler implementing the blob surface.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    if req.uri().path().starts_with("/_/api") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let method = req.method().clone();
    let result = if method == Method::GET || method == Method::HEAD {
        serve_blob(state, req).await
    } else if method == Method::DELETE {
        match auth::require_principal(&req) {
            Ok(principal) => mutate::delete_entry(state, req, principal).await,
            Err(e) => Err(e),
        }
    } else if method == Method::POST || method == Method::PUT {
        match auth::require_principal(&req) {
            Ok(principal) => upload::handle_upload(state, req, principal).await,
            Err(e) => Err(e),
        }
    } else {
        Err(ApiError::NotFound("unsupported method".to_string()))
    };

    result.unwrap_or_else(|e| e.into_response())
}

/// Parse an `Accept` header and return the quality score for a media type.
fn accept_score(header: &str, target: &str) -> f64 {
    for part in header.split(',') {
        let mut pieces = part.trim().split(';');
        if pieces.next().map(str::trim) != Some(target) {
            continue;
        }
        for param in pieces {
            if let Some(q) = param.trim().strip_prefix("q=") {
                return q.parse().unwrap_or(0.0);
            }
        }
        // No q parameter means full preference.
        return 1.0;
    }
    0.0
}

/// GET/HEAD on a blob path.
///
/// Directories (and missing paths) are handed to the SPA shell when the
/// client prefers HTML, so a browser can render a listing or a not-found
/// view; otherwise they are a plain 404.
async fn serve_blob(state: AppState, req: Request) -> ApiResult<Response> {
    let logical = path::clean(req.uri().path());
    let wants_html = req
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| accept_score(v, "text/html") > 0.0)
        .unwrap_or(false);

    let is_head = req.method() == Method::HEAD;
    let range_header = req.headers().get(RANGE).cloned();

    let phys = state.blobs.try_stat(&logical).await?;
    match phys {
        Some(meta) if !meta.is_dir => {
            serve_file(&state, &logical, &meta, is_head, range_header).await
        }
        _ if wants_html => serve_spa(&state).await,
        Some(_) => Err(ApiError::NotFound(logical)),
        None => Err(ApiError::NotFound(logical)),
    }
}

/// Serve the browser shell from `web_dir`. The SPA takes over rendering
/// directory listings and not-found views.
async fn serve_spa(state: &AppState) -> ApiResult<Response> {
    let index = state.config.server.web_dir.join("index.html");
    match tokio::fs::read(&index).await {
        Ok(bytes) => Ok((
            [(CONTENT_TYPE, "text/html; charset=utf-8")],
            bytes,
        )
            .into_response()),
        Err(_) => Err(ApiError::NotFound("web interface not available".to_string())),
    }
}

/// A parsed single byte range, inclusive on both ends.
enum RangeSpec {
    Satisfiable { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a `Range: bytes=a-b` header against the blob size. Returns `None`
/// for absent or non-bytes ranges (serve the whole blob).
fn parse_range(header: Option<&HeaderValue>, size: u64) -> Option<RangeSpec> {
    let value = header?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    // Single range only; multipart ranges are not supported.
    let spec = spec.split(',').next()?.trim();

    let (start_str, end_str) = spec.split_once('-')?;

    let resolved = if start_str.is_empty() {
        // Suffix form: last N bytes.
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 || size == 0 {
            None
        } else {
            Some((size.saturating_sub(suffix), size - 1))
        }
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end: u64 = if end_str.is_empty() {
            size.saturating_sub(1)
        } else {
            end_str.parse().ok()?
        };
        if start <= end && start < size {
            Some((start, end.min(size.saturating_sub(1))))
        } else {
            None
        }
    };

    Some(match resolved {
        Some((start, end)) => RangeSpec::Satisfiable { start, end },
        None => RangeSpec::Unsatisfiable,
    })
}

async fn serve_file(
    state: &AppState,
    logical: &str,
    phys: &BlobMeta,
    is_head: bool,
    range_header: Option<HeaderValue>,
) -> ApiResult<Response> {
    let record = state.metadata.get_resource(logical).await?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let mut content_type = "application/octet-stream".to_string();
    if let Some(record) = &record {
        if !record.md5.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&record.md5) {
                headers.insert("X-Checksum-Md5", v);
            }
        }
        if !record.sha1.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&record.sha1) {
                headers.insert("X-Checksum-Sha1", v);
            }
        }
        if !record.sha256.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&record.sha256) {
                headers.insert("X-Checksum-Sha256", v);
            }
            if let Ok(v) = HeaderValue::from_str(&record.sha256) {
                headers.insert(ETAG, v);
            }
        }
        if let Some(ct) = &record.content_type {
            if !ct.is_empty() {
                content_type = ct.clone();
            }
        }
    }
    if let Ok(v) = HeaderValue::from_str(&content_type) {
        headers.insert(CONTENT_TYPE, v);
    }

    match parse_range(range_header.as_ref(), phys.size) {
        Some(RangeSpec::Unsatisfiable) => {
            headers.insert(
                CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{}", phys.size))
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            );
            Ok((StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response())
        }
        Some(RangeSpec::Satisfiable { start, end }) => {
            headers.insert(
                CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{}", phys.size))
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            );
            headers.insert(CONTENT_LENGTH, HeaderValue::from(end - start + 1));

            let body = if is_head {
                Body::empty()
            } else {
                Body::from(state.blobs.read_range(logical, start, end + 1).await?)
            };
            Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
        }
        None => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(phys.size));
            let body = if is_head {
                Body::empty()
            } else {
                Body::from_stream(state.blobs.read_stream(logical).await?)
            };
            Ok((StatusCode::OK, headers, body).into_response())
        }
    }
}
