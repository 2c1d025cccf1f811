//! Filesystem blob store for the Depot artifact repository.
//!
//! Blobs live at their logical path under a single base directory:
//! `/a/b/c.ext` maps 1:1 to `base_dir/a/b/c.ext`. The store performs no
//! in-process locking; it relies on the OS atomicity of single `rename`
//! and `unlink` calls.

pub mod blobs;
pub mod error;

pub use blobs::{BlobMeta, BlobStore, DirEntryMeta, WalkEntry};
pub use error::{StorageError, StorageResult};
