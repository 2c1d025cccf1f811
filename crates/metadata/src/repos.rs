//! Repository traits, one per entity.

use crate::error::MetadataResult;
use crate::models::{
    ApiTokenRow, ReconciledFile, ResourcePatch, ResourceRow, TagRow, UploadCommit,
};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Resource records and the transactional mutations over them.
#[async_trait]
pub trait ResourceRepo: Send + Sync {
    /// Fetch one record by cleaned logical path.
    async fn get_resource(&self, path: &str) -> MetadataResult<Option<ResourceRow>>;

    /// Fetch every record whose path is in the given set (one query; used
    /// by the policy engine's parent walk).
    async fn get_resources(&self, paths: &[String]) -> MetadataResult<Vec<ResourceRow>>;

    /// All record paths at or below `path` (the target itself plus
    /// `path/...` children). Used to audit recursive deletes.
    async fn subtree_paths(&self, path: &str) -> MetadataResult<Vec<String>>;

    /// Every record in the store. The reconciler loads this once per sweep.
    async fn all_resources(&self) -> MetadataResult<Vec<ResourceRow>>;

    /// Records whose expiry has passed and that are not immutable.
    async fn expired_resources(&self, now: OffsetDateTime) -> MetadataResult<Vec<ResourceRow>>;

    /// The write pipeline's step-8 commit: upsert by path, apply retention
    /// headers, rotate keep-latest peers, replace tags. One transaction.
    async fn commit_upload(&self, commit: &UploadCommit) -> MetadataResult<ResourceRow>;

    /// Apply a metadata patch, creating the record on first touch with the
    /// given kind. Enforces the unlock-only rule for immutable records.
    async fn apply_patch(
        &self,
        path: &str,
        kind_if_new: &str,
        patch: &ResourcePatch,
        now: OffsetDateTime,
    ) -> MetadataResult<ResourceRow>;

    /// Upsert physical attributes after an out-of-band change, leaving
    /// user-supplied metadata (expiry, tags, flags) untouched.
    async fn upsert_reconciled(
        &self,
        file: &ReconciledFile,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete the record at `path` and every record beneath it.
    /// Returns the number of records removed.
    async fn delete_subtree(&self, path: &str) -> MetadataResult<u64>;

    /// Delete a single record by id (janitor, reconciler).
    async fn delete_resource(&self, id: i64) -> MetadataResult<()>;

    /// Recursive path rewrite for rename/move: one UPDATE over the target
    /// and its `old/...` children. Returns the number of rows touched.
    async fn rename_subtree(
        &self,
        old: &str,
        new: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Distinct non-empty stream names.
    async fn distinct_streams(&self) -> MetadataResult<Vec<String>>;

    /// Every record in a stream, newest group first.
    async fn stream_resources(&self, stream: &str) -> MetadataResult<Vec<ResourceRow>>;
}

/// Tag lookups. Mutation happens only through the resource transactions.
#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn tags_for(&self, resource_id: i64) -> MetadataResult<Vec<TagRow>>;
}

/// API tokens for the auth boundary.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<ApiTokenRow>>;

    /// Insert a token row (used by the external admin surface and tests).
    async fn create_token(&self, token: &ApiTokenRow) -> MetadataResult<i64>;

    async fn touch_token(&self, id: i64, used_at: OffsetDateTime) -> MetadataResult<()>;
}
