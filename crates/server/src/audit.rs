//! Audit log sink.
//!
//! Every policy denial and every successful mutation is appended to a
//! configured log file as one JSON object per line. Background tasks
//! attribute their events to the synthetic `system` principal.

use crate::auth::Principal;
use serde_json::{Map, Value, json};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const ACTION_UPLOAD: &str = "FILE_UPLOAD";
pub const ACTION_DELETE: &str = "FILE_DELETE";
pub const ACTION_RENAME: &str = "FILE_RENAME";
pub const ACTION_MOVE: &str = "FILE_MOVE";
pub const ACTION_MKDIR: &str = "DIR_CREATE";
pub const ACTION_PATCH_META: &str = "META_PATCH";
pub const ACTION_CLEANUP: &str = "SYSTEM_CLEANUP";
pub const ACTION_SYNC_CLEANUP: &str = "SYSTEM_SYNC_CLEANUP";

/// Who performed an audited action.
#[derive(Debug, Clone)]
pub struct AuditActor {
    pub user: String,
    pub request_id: Option<String>,
}

impl AuditActor {
    /// Attribution for the janitor and reconciler.
    pub fn system() -> Self {
        Self {
            user: "system".to_string(),
            request_id: None,
        }
    }

    pub fn from_principal(principal: &Principal, request_id: Option<String>) -> Self {
        Self {
            user: principal.username.clone(),
            request_id,
        }
    }
}

/// Append-only audit sink.
pub struct Auditor {
    file: Mutex<File>,
}

impl Auditor {
    /// Open (or create) the audit log file in append mode.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn success(&self, actor: &AuditActor, action: &str, resource: &str, extra: Value) {
        self.record(actor, action, resource, "SUCCESS", None, extra);
    }

    pub fn failure(
        &self,
        actor: &AuditActor,
        action: &str,
        resource: &str,
        error: &str,
        extra: Value,
    ) {
        self.record(actor, action, resource, "FAILURE", Some(error), extra);
    }

    fn record(
        &self,
        actor: &AuditActor,
        action: &str,
        resource: &str,
        status: &str,
        error: Option<&str>,
        extra: Value,
    ) {
        let ts = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        let mut fields = Map::new();
        fields.insert("ts".to_string(), json!(ts));
        fields.insert("action".to_string(), json!(action));
        fields.insert("resource".to_string(), json!(resource));
        fields.insert("status".to_string(), json!(status));
        fields.insert("user".to_string(), json!(actor.user));
        if let Some(request_id) = &actor.request_id {
            fields.insert("request_id".to_string(), json!(request_id));
        }
        if let Some(error) = error {
            fields.insert("error".to_string(), json!(error));
        }
        if let Value::Object(extra) = extra {
            for (k, v) in extra {
                fields.insert(k, v);
            }
        }

        let line = Value::Object(fields).to_string();
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::error!(error = %e, "failed to append audit entry");
                }
            }
            Err(_) => tracing::error!("audit log mutex poisoned, dropping entry"),
        }
    }
}
