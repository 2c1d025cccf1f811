//! Metadata store for the Depot artifact repository.
//!
//! One record per logical path that has ever received metadata, a child
//! table of tags, and the API token table the auth boundary resolves
//! principals through. All multi-statement mutations run inside a single
//! transaction; the write pipeline's commit, the recursive rename, and the
//! metadata patch are store methods for exactly that reason.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{
    ApiTokenRow, ReconciledFile, ResourcePatch, ResourceRow, TagRow, UploadCommit, KIND_DIR,
    KIND_FILE,
};
pub use repos::{ResourceRepo, TagRepo, TokenRepo};
pub use store::{MetadataStore, SqliteStore};
