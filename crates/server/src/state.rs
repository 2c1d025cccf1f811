//! Application state shared across handlers.

use crate::audit::Auditor;
use crate::auth::PrincipalCache;
use crate::reconciler::SyncHandle;
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (finalized).
    pub config: Arc<AppConfig>,
    /// Blob store rooted at `storage.base_dir`.
    pub blobs: Arc<BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Audit sink.
    pub audit: Arc<Auditor>,
    /// Principal identity cache.
    pub principals: Arc<PrincipalCache>,
    /// Handle for triggering the reconciler out of band.
    pub sync: SyncHandle,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        blobs: Arc<BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        audit: Arc<Auditor>,
        sync: SyncHandle,
    ) -> Self {
        Self {
            config: Arc::new(config),
            blobs,
            metadata,
            audit,
            principals: Arc::new(PrincipalCache::new()),
            sync,
        }
    }
}
