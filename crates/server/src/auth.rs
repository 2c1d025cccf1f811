//! Authentication boundary: principal resolution and the identity cache.
//!
//! The login/JWT surface and user management live outside this service.
//! What crosses the boundary is an API token: the middleware hashes it,
//! resolves it through the TTL'd [`PrincipalCache`], and attaches a
//! [`Principal`] extension to the request. Handlers that mutate state
//! require one; the read path does not.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use depot_core::path;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use uuid::Uuid;

/// How long a resolved principal stays cached.
const CACHE_TTL: Duration = Duration::from_secs(60);
/// How long an unknown token stays negatively cached. Shorter, so a token
/// created moments ago does not stay invisible for a full TTL.
const NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(10);

/// Request correlation id, attached to every request for audit entries.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// The identity attached to an authenticated request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    /// Scope prefixes this principal may mutate under; `/` means
    /// unrestricted. Admins always carry `/`.
    pub allowed_paths: Vec<String>,
}

impl Principal {
    /// Synthetic principal for the janitor and reconciler.
    pub fn system() -> Self {
        Self {
            user_id: 0,
            username: "system".to_string(),
            is_admin: true,
            allowed_paths: vec!["/".to_string()],
        }
    }
}

/// Lenient scope containment used for the read-side `is_allowed` listing
/// bit: an empty scope list hides nothing.
pub fn is_in_scopes(logical_path: &str, scopes: &[String]) -> bool {
    if scopes.is_empty() || (scopes.len() == 1 && scopes[0] == "/") {
        return true;
    }
    scopes.iter().any(|s| path::is_within(logical_path, s))
}

struct CacheEntry {
    principal: Option<Principal>,
    expires_at: Instant,
}

/// Concurrent principal cache with per-entry TTL.
///
/// Reads take the shared lock; inserts and invalidations the exclusive
/// one. Unknown tokens are cached too (as `None`) to damp repeated
/// database misses.
#[derive(Default)]
pub struct PrincipalCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl PrincipalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` = cache miss; `Some(None)` = token known to be absent.
    pub fn get(&self, token_hash: &str) -> Option<Option<Principal>> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(token_hash)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.principal.clone())
    }

    pub fn set(&self, token_hash: String, principal: Principal) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                token_hash,
                CacheEntry {
                    principal: Some(principal),
                    expires_at: Instant::now() + CACHE_TTL,
                },
            );
        }
    }

    pub fn set_absent(&self, token_hash: String) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                token_hash,
                CacheEntry {
                    principal: None,
                    expires_at: Instant::now() + NEGATIVE_CACHE_TTL,
                },
            );
        }
    }

    /// Forget a single token (e.g. after revocation).
    pub fn invalidate(&self, token_hash: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(token_hash);
        }
    }

    /// Forget every entry belonging to a user (password reset, admin
    /// toggle, scope change).
    pub fn invalidate_user(&self, user_id: i64) {
        tracing::info!(user_id, "invalidating cached principals for user");
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, e| {
                e.principal
                    .as_ref()
                    .map(|p| p.user_id != user_id)
                    .unwrap_or(true)
            });
        }
    }
}

/// Extract the API token from `X-API-Token` or `Authorization: Bearer`.
fn extract_token(req: &Request) -> Option<&str> {
    if let Some(token) = req.headers().get("x-api-token").and_then(|v| v.to_str().ok()) {
        return Some(token);
    }
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Hash a token for storage lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn principal_from_row(row: &depot_metadata::ApiTokenRow) -> Principal {
    let mut allowed_paths: Vec<String> = serde_json::from_str(&row.allowed_paths)
        .unwrap_or_else(|e| {
            tracing::warn!(token_id = row.id, error = %e, "token has malformed allowed_paths");
            Vec::new()
        })
        .into_iter()
        .map(|p: String| path::clean(&p))
        .collect();

    if row.is_admin && !allowed_paths.iter().any(|p| p == "/") {
        allowed_paths.push("/".to_string());
    }

    Principal {
        user_id: row.user_id,
        username: row.username.clone(),
        is_admin: row.is_admin,
        allowed_paths,
    }
}

/// Middleware: attach a request id, resolve any presented token to a
/// principal, and pass the request on. Authentication *requirements* are
/// enforced per-handler; presenting no token is fine for reads.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    req.extensions_mut()
        .insert(RequestId(Uuid::new_v4().to_string()));

    if let Some(token) = extract_token(&req) {
        let token_hash = hash_token(token);

        let principal = match state.principals.get(&token_hash) {
            Some(cached) => cached,
            None => match state.metadata.get_token_by_hash(&token_hash).await? {
                Some(row) => {
                    let principal = principal_from_row(&row);
                    state.principals.set(token_hash.clone(), principal.clone());
                    if let Err(e) = state
                        .metadata
                        .touch_token(row.id, OffsetDateTime::now_utc())
                        .await
                    {
                        tracing::warn!(error = %e, "failed to update token last_used_at");
                    }
                    Some(principal)
                }
                None => {
                    state.principals.set_absent(token_hash);
                    None
                }
            },
        };

        if let Some(principal) = principal {
            req.extensions_mut().insert(principal);
        }
    }

    Ok(next.run(req).await)
}

/// Require an authenticated principal on the request.
pub fn require_principal(req: &Request) -> ApiResult<Principal> {
    req.extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// The request's correlation id, if the middleware ran.
pub fn request_id(req: &Request) -> Option<String> {
    req.extensions().get::<RequestId>().map(|r| r.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(user_id: i64) -> Principal {
        Principal {
            user_id,
            username: format!("user-{user_id}"),
            is_admin: false,
            allowed_paths: vec!["/ci".to_string()],
        }
    }

    #[test]
    fn cache_hits_and_negative_entries() {
        let cache = PrincipalCache::new();
        assert!(cache.get("h1").is_none());

        cache.set("h1".to_string(), principal(1));
        assert_eq!(cache.get("h1").unwrap().unwrap().user_id, 1);

        cache.set_absent("h2".to_string());
        assert!(cache.get("h2").unwrap().is_none());

        cache.invalidate("h1");
        assert!(cache.get("h1").is_none());
    }

    #[test]
    fn invalidate_user_drops_only_their_entries() {
        let cache = PrincipalCache::new();
        cache.set("a".to_string(), principal(1));
        cache.set("b".to_string(), principal(2));

        cache.invalidate_user(1);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn lenient_scope_containment() {
        assert!(is_in_scopes("/anything", &[]));
        assert!(is_in_scopes("/anything", &["/".to_string()]));
        assert!(is_in_scopes("/ci/build", &["/ci".to_string()]));
        assert!(!is_in_scopes("/prod/x", &["/ci".to_string()]));
    }

    #[test]
    fn token_hash_is_hex_sha256() {
        let hash = hash_token("token");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
