//! The policy engine: every mutation passes through [`can_modify`].

use depot_core::config::StorageConfig;
use depot_core::path;
use depot_metadata::{MetadataResult, MetadataStore, ResourceRow};
use std::collections::HashMap;

/// Options for a policy check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifyOptions {
    /// Skip the protected-prefix check. Set by the write pipeline when the
    /// target does not exist yet; this is the sole mechanism that lets new
    /// artifacts land in protected directories while overwrites and
    /// deletes there stay blocked.
    pub ignore_protected: bool,
    /// The check guards an upload (as opposed to delete/rename/move).
    pub is_upload: bool,
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }
}

/// Scope check alone: is the path within one of the principal's scopes?
/// An empty scope list denies everything.
pub fn check_scopes(logical_path: &str, scopes: &[String]) -> PolicyDecision {
    if scopes.is_empty() {
        return PolicyDecision::Denied(
            "Your account has no write permissions configured.".to_string(),
        );
    }

    if scopes.iter().any(|s| s == "/") {
        return PolicyDecision::Allowed;
    }

    if scopes.iter().any(|s| path::is_within(logical_path, s)) {
        PolicyDecision::Allowed
    } else {
        PolicyDecision::Denied("Path is outside of your authorized scopes.".to_string())
    }
}

/// Full policy check: scope containment, then a walk over the target and
/// every ancestor (fetched in one query) looking for protected prefixes
/// and immutable records. Immutability is a hard lock and ignores
/// `ignore_protected`.
pub async fn can_modify(
    metadata: &dyn MetadataStore,
    storage: &StorageConfig,
    logical_path: &str,
    scopes: &[String],
    opts: ModifyOptions,
) -> MetadataResult<PolicyDecision> {
    let logical_path = path::clean(logical_path);

    if let PolicyDecision::Denied(msg) = check_scopes(&logical_path, scopes) {
        return Ok(PolicyDecision::Denied(msg));
    }

    let chain = path::chain(&logical_path);
    let records = metadata.get_resources(&chain).await?;
    let by_path: HashMap<&str, &ResourceRow> =
        records.iter().map(|r| (r.path.as_str(), r)).collect();

    // Walk root-down so the denial names the outermost offending ancestor.
    for p in chain.iter().rev() {
        if !opts.ignore_protected && storage.is_protected(p) {
            return Ok(PolicyDecision::Denied(format!(
                "Action prohibited: {p} is a protected directory."
            )));
        }

        if let Some(record) = by_path.get(p.as_str()) {
            if record.is_immutable() {
                return Ok(PolicyDecision::Denied(format!(
                    "Action prohibited: {p} is immutable (locked)."
                )));
            }
        }
    }

    Ok(PolicyDecision::Allowed)
}
