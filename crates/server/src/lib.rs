//! HTTP surface for the Depot artifact repository.
//!
//! This crate wires the blob store and the metadata store behind the
//! public surfaces:
//! - Blob surface: `GET|HEAD|PUT|POST|DELETE /<path>`
//! - Metadata surface under `/_/api/v1` (records, listings, patches,
//!   rename/move, streams, manual sync)
//! - The policy engine gating every mutation
//! - The janitor (expiry) and reconciler (filesystem sync) tasks

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod janitor;
pub mod policy;
pub mod reconciler;
pub mod routes;
pub mod state;

pub use audit::Auditor;
pub use error::{ApiError, ApiResult};
pub use janitor::Janitor;
pub use reconciler::{Reconciler, SyncHandle};
pub use routes::create_router;
pub use state::AppState;
