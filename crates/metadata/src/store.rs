//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{ApiTokenRow, ReconciledFile, ResourcePatch, ResourceRow, TagRow, UploadCommit};
use crate::repos::{ResourceRepo, TagRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ResourceRepo + TagRepo + TokenRepo + Send + Sync {
    /// Create the schema if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-backed metadata store.
///
/// A single connection is deliberate: it serialises writers and avoids
/// "database is locked" pathologies on the embedded engine. Reads share
/// the connection under short transactions.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the store at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn child_pattern(path: &str) -> String {
        if path == "/" {
            "/%".to_string()
        } else {
            format!("{path}/%")
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceRepo for SqliteStore {
    async fn get_resource(&self, path: &str) -> MetadataResult<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_resources(&self, paths: &[String]) -> MetadataResult<Vec<ResourceRow>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<&str> = paths.iter().map(|_| "?").collect();
        let query = format!(
            "SELECT * FROM resources WHERE path IN ({})",
            placeholders.join(", ")
        );

        let mut query_builder = sqlx::query_as::<_, ResourceRow>(&query);
        for path in paths {
            query_builder = query_builder.bind(path);
        }

        Ok(query_builder.fetch_all(&self.pool).await?)
    }

    async fn subtree_paths(&self, path: &str) -> MetadataResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT path FROM resources WHERE path = ? OR path LIKE ? ORDER BY path",
        )
        .bind(path)
        .bind(Self::child_pattern(path))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn all_resources(&self) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn expired_resources(&self, now: OffsetDateTime) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources
             WHERE expires_at IS NOT NULL AND expires_at <= ?
               AND (immutable IS NULL OR immutable = 0)
             ORDER BY path",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn commit_upload(&self, commit: &UploadCommit) -> MetadataResult<ResourceRow> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO resources (
                path, kind, content_type, size, mod_time,
                md5, sha1, sha256, download_mode, created_at, updated_at
            ) VALUES (?, 'file', ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                kind = 'file',
                content_type = excluded.content_type,
                size = excluded.size,
                mod_time = excluded.mod_time,
                md5 = excluded.md5,
                sha1 = excluded.sha1,
                sha256 = excluded.sha256,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&commit.path)
        .bind(&commit.content_type)
        .bind(commit.size)
        .bind(commit.mod_time)
        .bind(&commit.md5)
        .bind(&commit.sha1)
        .bind(&commit.sha256)
        .bind(&commit.download_mode)
        .bind(commit.mod_time)
        .bind(commit.mod_time)
        .execute(&mut *tx)
        .await?;

        if let Some(expires_at) = commit.expires_at {
            sqlx::query("UPDATE resources SET expires_at = ? WHERE path = ?")
                .bind(expires_at)
                .bind(&commit.path)
                .execute(&mut *tx)
                .await?;
        }

        if let Some((stream, grp)) = &commit.stream {
            sqlx::query("UPDATE resources SET stream = ?, grp = ?, keep_latest = ? WHERE path = ?")
                .bind(stream)
                .bind(grp)
                .bind(commit.keep_latest)
                .bind(&commit.path)
                .execute(&mut *tx)
                .await?;

            if commit.keep_latest {
                // Rotate stale groups: same stream, flagged keep-latest,
                // not the group just uploaded.
                sqlx::query(
                    "UPDATE resources SET expires_at = ?
                     WHERE stream = ? AND grp != ? AND keep_latest = 1",
                )
                .bind(commit.mod_time)
                .bind(stream)
                .bind(grp)
                .execute(&mut *tx)
                .await?;
            }
        }

        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE path = ?")
            .bind(&commit.path)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(tags) = &commit.tags {
            sqlx::query("DELETE FROM tags WHERE resource_id = ?")
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            for (key, value) in tags {
                sqlx::query("INSERT INTO tags (resource_id, key, value) VALUES (?, ?, ?)")
                    .bind(row.id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(row)
    }

    async fn apply_patch(
        &self,
        path: &str,
        kind_if_new: &str,
        patch: &ResourcePatch,
        now: OffsetDateTime,
    ) -> MetadataResult<ResourceRow> {
        let mut tx = self.pool.begin().await?;

        let existing =
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE path = ?")
                .bind(path)
                .fetch_optional(&mut *tx)
                .await?;

        let row = match existing {
            Some(row) => row,
            None => {
                sqlx::query(
                    "INSERT INTO resources (path, kind, mod_time, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(path)
                .bind(kind_if_new)
                .bind(now)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE path = ?")
                    .bind(path)
                    .fetch_one(&mut *tx)
                    .await?
            }
        };

        // A locked record accepts exactly one change: unlocking it.
        if row.is_immutable() && patch.immutable != Some(false) {
            return Err(MetadataError::Locked(path.to_string()));
        }

        if let Some(expires_at) = patch.expires_at {
            sqlx::query("UPDATE resources SET expires_at = ? WHERE id = ?")
                .bind(expires_at)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(immutable) = patch.immutable {
            sqlx::query("UPDATE resources SET immutable = ? WHERE id = ?")
                .bind(immutable)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(keep_latest) = patch.keep_latest {
            sqlx::query("UPDATE resources SET keep_latest = ? WHERE id = ?")
                .bind(keep_latest)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(content_type) = &patch.content_type {
            sqlx::query("UPDATE resources SET content_type = ? WHERE id = ?")
                .bind(content_type)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some((stream, grp)) = &patch.stream {
            sqlx::query("UPDATE resources SET stream = ?, grp = ? WHERE id = ?")
                .bind(stream)
                .bind(grp)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(mode) = &patch.download_mode {
            sqlx::query("UPDATE resources SET download_mode = ? WHERE id = ?")
                .bind(mode)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(tags) = &patch.tags {
            sqlx::query("DELETE FROM tags WHERE resource_id = ?")
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            for (key, value) in tags {
                sqlx::query("INSERT INTO tags (resource_id, key, value) VALUES (?, ?, ?)")
                    .bind(row.id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("UPDATE resources SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE id = ?")
            .bind(row.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn upsert_reconciled(
        &self,
        file: &ReconciledFile,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resources (
                path, kind, content_type, size, mod_time,
                md5, sha1, sha256, created_at, updated_at
            ) VALUES (?, 'file', ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                kind = 'file',
                content_type = excluded.content_type,
                size = excluded.size,
                mod_time = excluded.mod_time,
                md5 = excluded.md5,
                sha1 = excluded.sha1,
                sha256 = excluded.sha256,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&file.path)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(file.mod_time)
        .bind(&file.md5)
        .bind(&file.sha1)
        .bind(&file.sha256)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_subtree(&self, path: &str) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM resources WHERE path = ? OR path LIKE ?")
            .bind(path)
            .bind(Self::child_pattern(path))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete_resource(&self, id: i64) -> MetadataResult<()> {
        sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rename_subtree(
        &self,
        old: &str,
        new: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<u64> {
        // One prefix rewrite covers the target and all nested children. The
        // LIKE suffix keeps `/images-backup` out of a `/images` rename.
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE resources SET path = REPLACE(path, ?, ?), updated_at = ?
             WHERE path = ? OR path LIKE ?",
        )
        .bind(old)
        .bind(new)
        .bind(now)
        .bind(old)
        .bind(Self::child_pattern(old))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn distinct_streams(&self) -> MetadataResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT stream FROM resources
             WHERE stream IS NOT NULL AND stream != '' ORDER BY stream",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    async fn stream_resources(&self, stream: &str) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE stream = ? ORDER BY grp DESC, path ASC",
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TagRepo for SqliteStore {
    async fn tags_for(&self, resource_id: i64) -> MetadataResult<Vec<TagRow>> {
        let rows =
            sqlx::query_as::<_, TagRow>("SELECT * FROM tags WHERE resource_id = ? ORDER BY id")
                .bind(resource_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TokenRepo for SqliteStore {
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<ApiTokenRow>> {
        let row =
            sqlx::query_as::<_, ApiTokenRow>("SELECT * FROM api_tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn create_token(&self, token: &ApiTokenRow) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO api_tokens (token_hash, user_id, username, is_admin, allowed_paths, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(&token.username)
        .bind(token.is_admin)
        .bind(&token.allowed_paths)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn touch_token(&self, id: i64, used_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE id = ?")
            .bind(used_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Resource records, one per logical path that has ever received metadata
CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL DEFAULT 'file',
    content_type TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    mod_time TEXT NOT NULL,
    stream TEXT,
    grp TEXT,
    expires_at TEXT,
    immutable INTEGER,
    keep_latest INTEGER,
    md5 TEXT NOT NULL DEFAULT '',
    sha1 TEXT NOT NULL DEFAULT '',
    sha256 TEXT NOT NULL DEFAULT '',
    download_mode TEXT NOT NULL DEFAULT 'literal',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_resources_stream ON resources(stream, grp);
CREATE INDEX IF NOT EXISTS idx_resources_expires ON resources(expires_at);

-- Tags, cascade-deleted with their resource
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_tags_resource ON tags(resource_id);

-- API tokens (managed by the external admin surface)
CREATE TABLE IF NOT EXISTS api_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_hash TEXT NOT NULL UNIQUE,
    user_id INTEGER NOT NULL,
    username TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    allowed_paths TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    last_used_at TEXT
);
"#;
