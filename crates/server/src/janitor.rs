//! Expiry janitor.
//!
//! Periodically reclaims records whose `expires_at` has passed, under
//! three safety guards: immutable records are never selected, protected
//! paths are skipped entirely (a later config change may lift the
//! protection), and non-empty directories wait until their children have
//! expired.

use crate::audit::{ACTION_CLEANUP, AuditActor, Auditor};
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::BlobStore;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background task that reclaims expired resources.
pub struct Janitor {
    blobs: Arc<BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<Auditor>,
    config: Arc<AppConfig>,
}

impl Janitor {
    pub fn new(
        blobs: Arc<BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        audit: Arc<Auditor>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            blobs,
            metadata,
            audit,
            config,
        }
    }

    /// Spawn the sweep ticker.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.config.janitor.period();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_sweep().await,
                    _ = shutdown.changed() => {
                        tracing::info!("janitor shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Run one sweep. Errors are logged and never abort the sweep; one
    /// bad record must not halt reclamation of the rest.
    pub async fn run_sweep(&self) {
        let now = OffsetDateTime::now_utc();
        let expired = match self.metadata.expired_resources(now).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::error!(error = %e, "janitor: failed to query expired records");
                return;
            }
        };

        for record in expired {
            if self.config.storage.is_protected(&record.path) {
                tracing::debug!(path = %record.path, "janitor: skipping protected expired resource");
                continue;
            }

            let meta = match self.blobs.try_stat(&record.path).await {
                Ok(Some(meta)) => meta,
                Ok(None) => {
                    // Blob already gone out of band; drop the record only.
                    if let Err(e) = self.metadata.delete_resource(record.id).await {
                        tracing::error!(path = %record.path, error = %e, "janitor: record delete failed");
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(path = %record.path, error = %e, "janitor: stat failed");
                    continue;
                }
            };

            if meta.is_dir {
                match self.blobs.is_dir_empty(&record.path).await {
                    // Children have not expired yet; a later sweep gets it.
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        tracing::error!(path = %record.path, error = %e, "janitor: dir check failed");
                        continue;
                    }
                }
            }

            if let Err(e) = self.blobs.remove_entry(&record.path).await {
                tracing::error!(path = %record.path, error = %e, "janitor: blob removal failed");
                continue;
            }
            if let Err(e) = self.metadata.delete_resource(record.id).await {
                tracing::error!(path = %record.path, error = %e, "janitor: record delete failed");
                continue;
            }

            self.audit.success(
                &AuditActor::system(),
                ACTION_CLEANUP,
                &record.path,
                json!({"reason": "expired"}),
            );
        }
    }
}
