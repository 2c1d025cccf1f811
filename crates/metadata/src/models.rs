//! Database models mapping to the metadata schema.

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Resource kind for regular files.
pub const KIND_FILE: &str = "file";
/// Resource kind for directories carrying metadata.
pub const KIND_DIR: &str = "dir";

/// One metadata record per logical path.
///
/// The `group` half of the stream pair is stored in a column named `grp`
/// so the schema never has to quote a SQL keyword.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub path: String,
    pub kind: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub mod_time: OffsetDateTime,
    pub stream: Option<String>,
    pub grp: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub immutable: Option<bool>,
    pub keep_latest: Option<bool>,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub download_mode: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ResourceRow {
    pub fn is_dir(&self) -> bool {
        self.kind == KIND_DIR
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable.unwrap_or(false)
    }

    pub fn is_keep_latest(&self) -> bool {
        self.keep_latest.unwrap_or(false)
    }
}

/// A tag attached to a resource. Cascade-deleted with its parent.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TagRow {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub resource_id: i64,
    pub key: String,
    pub value: String,
}

/// API token row, the integration point for the external auth surface.
/// `allowed_paths` holds a JSON array of scope prefixes.
#[derive(Debug, Clone, FromRow)]
pub struct ApiTokenRow {
    pub id: i64,
    pub token_hash: String,
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub allowed_paths: String,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

/// Everything the write pipeline commits in its single transaction.
#[derive(Debug, Clone)]
pub struct UploadCommit {
    pub path: String,
    pub size: i64,
    pub mod_time: OffsetDateTime,
    pub content_type: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    /// Set only when the client supplied `X-Expires`.
    pub expires_at: Option<OffsetDateTime>,
    /// Set only when the client supplied `X-Stream`.
    pub stream: Option<(String, String)>,
    /// Meaningful only together with `stream`. When true, every other
    /// record in the same stream with a different group and
    /// `keep_latest = true` is expired as of `mod_time`.
    pub keep_latest: bool,
    /// Full replacement set when the client supplied `X-Tags`.
    pub tags: Option<Vec<(String, String)>>,
    pub download_mode: String,
}

/// Partial metadata update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub expires_at: Option<OffsetDateTime>,
    pub immutable: Option<bool>,
    pub keep_latest: Option<bool>,
    pub content_type: Option<String>,
    pub stream: Option<(String, String)>,
    pub download_mode: Option<String>,
    /// Full replacement set when supplied.
    pub tags: Option<Vec<(String, String)>>,
}

/// Physical attributes the reconciler writes back after re-hashing a blob.
#[derive(Debug, Clone)]
pub struct ReconciledFile {
    pub path: String,
    pub size: i64,
    pub mod_time: OffsetDateTime,
    pub content_type: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}
