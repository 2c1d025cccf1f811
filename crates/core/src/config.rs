//! Application configuration shared across crates.
//!
//! Values are layered by the binary (defaults < YAML file < `DEPOT_` env
//! vars < CLI flags) and validated once via [`AppConfig::finalize`] before
//! anything touches disk.

use crate::error::{Error, Result};
use crate::mode::DownloadMode;
use crate::{path, size};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Secret used by the external session-auth surface. Must be at least
    /// 32 characters; startup aborts otherwise.
    #[serde(default, skip_serializing)]
    pub jwt_secret: String,
    /// Directory holding the SPA shell served to browsers.
    #[serde(default = "default_web_dir")]
    pub web_dir: PathBuf,
}

/// Metadata database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    #[serde(default = "default_db_file")]
    pub file: PathBuf,
}

/// Blob storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the blob tree. Each logical path `/a/b` maps to
    /// `base_dir/a/b`.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Maximum accepted upload size in human form (`10MB`, `1GB`).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: String,
    /// Parsed form of `max_upload_size`, filled in by `finalize`.
    #[serde(skip)]
    pub max_upload_size_bytes: u64,
    /// Prefixes under which existing artifacts may not be overwritten or
    /// deleted. New artifacts may still land there.
    #[serde(default)]
    pub protected_paths: Vec<String>,
    /// Default batch download layout for new resources.
    #[serde(default)]
    pub default_batch_mode: DownloadMode,
}

/// Audit log configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Append-only audit log file (line-delimited JSON).
    #[serde(default = "default_audit_file")]
    pub file: PathBuf,
}

/// Expiry janitor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_janitor_period_secs")]
    pub period_secs: u64,
}

/// Filesystem reconciler configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay before the first sweep after startup.
    #[serde(default = "default_sync_startup_delay_secs")]
    pub startup_delay_secs: u64,
    /// Seconds between sweeps.
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_web_dir() -> PathBuf {
    PathBuf::from("web")
}

fn default_db_file() -> PathBuf {
    PathBuf::from("depot.db")
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_max_upload_size() -> String {
    "100MB".to_string()
}

fn default_audit_file() -> PathBuf {
    PathBuf::from("audit.log")
}

fn default_janitor_period_secs() -> u64 {
    60
}

fn default_sync_startup_delay_secs() -> u64 {
    10
}

fn default_sync_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            jwt_secret: String::new(),
            web_dir: default_web_dir(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: default_db_file(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            max_upload_size: default_max_upload_size(),
            max_upload_size_bytes: 0,
            protected_paths: Vec::new(),
            default_batch_mode: DownloadMode::Literal,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file: default_audit_file(),
        }
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            period_secs: default_janitor_period_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: default_sync_startup_delay_secs(),
            interval_secs: default_sync_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            audit: AuditConfig::default(),
            janitor: JanitorConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Whether the given logical path lies under a protected prefix.
    pub fn is_protected(&self, logical_path: &str) -> bool {
        self.protected_paths
            .iter()
            .any(|p| path::is_within(logical_path, p))
    }
}

impl JanitorConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }
}

impl SyncConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl AppConfig {
    /// Validate and derive computed fields. Must run before the config is
    /// used; startup aborts on failure.
    pub fn finalize(&mut self) -> Result<()> {
        if self.server.jwt_secret.len() < 32 {
            return Err(Error::Config(
                "server.jwt_secret must be at least 32 characters".to_string(),
            ));
        }

        self.storage.max_upload_size_bytes = size::parse_bytes(&self.storage.max_upload_size)
            .map_err(|e| Error::Config(format!("storage.max_upload_size: {e}")))?;

        for p in &mut self.storage.protected_paths {
            *p = path::clean(p);
        }

        Ok(())
    }

    /// Create a test configuration rooted at the given directory.
    ///
    /// **For testing only.** Uses a throwaway secret and a small upload cap.
    pub fn for_testing(root: &std::path::Path) -> Self {
        let mut config = Self {
            server: ServerConfig {
                jwt_secret: "test-secret-test-secret-test-secret!".to_string(),
                web_dir: root.join("web"),
                ..ServerConfig::default()
            },
            database: DatabaseConfig {
                file: root.join("depot.db"),
            },
            storage: StorageConfig {
                base_dir: root.join("storage"),
                max_upload_size: "4MB".to_string(),
                ..StorageConfig::default()
            },
            audit: AuditConfig {
                file: root.join("audit.log"),
            },
            janitor: JanitorConfig::default(),
            sync: SyncConfig::default(),
        };
        config.finalize().expect("test config must validate");
        config
    }
}
