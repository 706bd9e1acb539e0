//! Physical blob storage
//!
//! Blobs live under `<storage_root>/<YYYY>/<MM>/<blob_name>`. The metadata that
//! says which revision uses which blob lives in [`crate::revision`]; this module
//! only places, writes, hashes, finds and removes files.

pub mod content;
pub mod digest;
pub mod layout;

use std::path::PathBuf;
use thiserror::Error;

pub use content::{BlobSlot, ContentStore, DEFAULT_CHUNK_SIZE};
pub use digest::{DigestKind, DIGEST_UNAVAILABLE};
pub use layout::sanitize_filename;

/// Error types for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {}", .0.display())]
    NotFound(PathBuf),
}
