//! Stream listing: retention namespaces and their groups.

use crate::auth::Principal;
use crate::error::ApiResult;
use crate::handlers::meta::ResourceResponse;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path as UrlPath, Request, State};
use serde::Serialize;
use time::OffsetDateTime;

/// `GET /_/api/v1/streams` - distinct stream names.
pub async fn list_streams(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.metadata.distinct_streams().await?))
}

/// One group within a stream and the files it holds.
#[derive(Debug, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub files: Vec<ResourceResponse>,
}

/// `GET /_/api/v1/streams/{name}` - groups of a stream, newest first.
pub async fn get_stream(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
    req: Request,
) -> ApiResult<Json<Vec<GroupInfo>>> {
    let scopes = req
        .extensions()
        .get::<Principal>()
        .map(|p| p.allowed_paths.clone())
        .unwrap_or_default();

    let resources = state.metadata.stream_resources(&name).await?;

    let mut groups: Vec<GroupInfo> = Vec::new();
    for resource in resources {
        let group_name = resource.grp.clone().unwrap_or_default();

        // Physical attributes when the blob is still on disk.
        let (size, modtime) = match state.blobs.try_stat(&resource.path).await? {
            Some(meta) => (meta.size as i64, OffsetDateTime::from(meta.modified)),
            None => (resource.size, resource.mod_time),
        };

        let file = super::meta::describe(
            &state,
            &resource.path,
            resource.is_dir(),
            size,
            modtime,
            false,
            &scopes,
        )
        .await?;

        match groups.iter_mut().find(|g| g.name == group_name) {
            Some(group) => group.files.push(file),
            None => groups.push(GroupInfo {
                name: group_name,
                files: vec![file],
            }),
        }
    }

    Ok(Json(groups))
}
