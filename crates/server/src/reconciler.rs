//! Filesystem reconciler.
//!
//! Metadata follows the blob tree, not the other way round: after an
//! out-of-band change (a crash between blob write and metadata commit, a
//! file dropped into the base directory, a record whose blob vanished)
//! the reconciler restores the metadata store from what is actually on
//! disk. It never consults policy and it is the only component allowed to
//! erase metadata without a matching user-initiated delete.

use crate::audit::{ACTION_SYNC_CLEANUP, AuditActor, Auditor};
use depot_core::config::AppConfig;
use depot_metadata::{MetadataStore, ReconciledFile, ResourceRow};
use depot_storage::{BlobStore, WalkEntry};
use futures::StreamExt;
use md5::Md5;
use serde_json::json;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Hash loop buffer size. Small on purpose: the reconciler must not
/// starve foreground request handlers on large trees.
const HASH_CHUNK_SIZE: usize = 32 * 1024;
/// Yield between hash chunks.
const HASH_THROTTLE: Duration = Duration::from_millis(5);

/// Handle for requesting a sweep out of band. The channel holds one
/// pending trigger; a trigger arriving mid-sweep is coalesced.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<()>,
}

impl SyncHandle {
    pub fn trigger(&self) {
        // Full channel means a trigger is already pending.
        let _ = self.tx.try_send(());
    }
}

/// Create the trigger channel pair.
pub fn sync_channel() -> (SyncHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (SyncHandle { tx }, rx)
}

/// Background task that rebuilds metadata from the blob tree.
pub struct Reconciler {
    blobs: Arc<BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<Auditor>,
    config: Arc<AppConfig>,
    shutdown: watch::Receiver<bool>,
    running: AtomicBool,
}

impl Reconciler {
    pub fn new(
        blobs: Arc<BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        audit: Arc<Auditor>,
        config: Arc<AppConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            blobs,
            metadata,
            audit,
            config,
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the ticker task: startup delay, then sweep on every interval
    /// tick or manual trigger, whichever fires first.
    pub fn spawn(self: Arc<Self>, mut trigger: mpsc::Receiver<()>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.clone();
        let startup_delay = self.config.sync.startup_delay();
        let interval = self.config.sync.interval();

        tokio::spawn(async move {
            tracing::info!(?startup_delay, "reconciler standing by");
            tokio::select! {
                _ = tokio::time::sleep(startup_delay) => {}
                _ = shutdown.changed() => return,
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                self.run_sweep().await;

                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(_) = trigger.recv() => {
                        tracing::info!("reconciler: manual trigger received");
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("reconciler shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Run one sweep. A compare-and-swap sentinel guarantees at most one
    /// sweep in flight; overlapping calls return immediately.
    pub async fn run_sweep(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.sweep().await;
        self.running.store(false, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn sweep(&self) {
        tracing::info!("reconciler: starting sweep");

        let records = match self.metadata.all_resources().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "reconciler: failed to load records");
                return;
            }
        };
        let by_path: HashMap<String, ResourceRow> =
            records.into_iter().map(|r| (r.path.clone(), r)).collect();

        let mut seen: HashSet<String> = HashSet::new();

        let mut walk = self.blobs.walk();
        while let Some(entry) = walk.next().await {
            if self.cancelled() {
                return;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(error = %e, "reconciler: walk error");
                    continue;
                }
            };

            seen.insert(entry.path.clone());

            // Directories carry metadata only when a user attached some;
            // the sweep never creates records for them.
            if entry.is_dir {
                continue;
            }

            let mod_time = OffsetDateTime::from(entry.modified);
            let changed = match by_path.get(&entry.path) {
                None => true,
                Some(record) => {
                    record.size != entry.size as i64
                        || record.mod_time.unix_timestamp() != mod_time.unix_timestamp()
                }
            };

            if changed {
                tracing::info!(path = %entry.path, "reconciler: rebuilding record");
                self.rebuild_record(&entry, mod_time).await;
            }
        }

        // Records never seen on disk are ghosts; remove them.
        for (record_path, record) in &by_path {
            if seen.contains(record_path) || record_path == "/" {
                continue;
            }
            tracing::info!(path = %record_path, "reconciler: removing ghost record");
            if let Err(e) = self.metadata.delete_resource(record.id).await {
                tracing::error!(path = %record_path, error = %e, "reconciler: ghost delete failed");
                continue;
            }
            self.audit.success(
                &AuditActor::system(),
                ACTION_SYNC_CLEANUP,
                record_path,
                json!({"reason": "missing_on_disk"}),
            );
        }
    }

    async fn rebuild_record(&self, entry: &WalkEntry, mod_time: OffsetDateTime) {
        let mut file = match self.blobs.open(&entry.path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "reconciler: open failed");
                return;
            }
        };

        // Sniff the content type from the first 512 bytes, then rewind for
        // the full hash pass.
        let mut sniff = [0u8; 512];
        let sniffed = match file.read(&mut sniff).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "reconciler: sniff read failed");
                return;
            }
        };
        let content_type = infer::get(&sniff[..sniffed])
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if file.seek(std::io::SeekFrom::Start(0)).await.is_err() {
            return;
        }

        let Some((md5, sha1, sha256, size)) = self.hash_throttled(&mut file).await else {
            return;
        };

        let reconciled = ReconciledFile {
            path: entry.path.clone(),
            size,
            mod_time,
            content_type,
            md5,
            sha1,
            sha256,
        };

        if let Err(e) = self
            .metadata
            .upsert_reconciled(&reconciled, OffsetDateTime::now_utc())
            .await
        {
            tracing::error!(path = %entry.path, error = %e, "reconciler: upsert failed");
        }
    }

    /// Compute all three digests in a throttled read loop, yielding between
    /// chunks and bailing out on shutdown.
    async fn hash_throttled(
        &self,
        file: &mut tokio::fs::File,
    ) -> Option<(String, String, String, i64)> {
        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();
        let mut sha256 = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        let mut written: i64 = 0;

        loop {
            if self.cancelled() {
                return None;
            }

            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "reconciler: hash read failed");
                    return None;
                }
            };

            md5.update(&buf[..n]);
            sha1.update(&buf[..n]);
            sha256.update(&buf[..n]);
            written += n as i64;

            tokio::time::sleep(HASH_THROTTLE).await;
        }

        Some((
            hex::encode(md5.finalize()),
            hex::encode(sha1.finalize()),
            hex::encode(sha256.finalize()),
            written,
        ))
    }
}
