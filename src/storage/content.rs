//! Blob placement, retrieval and hashing on the local filesystem

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::layout::{self, sanitize_filename};
use super::{digest, StorageError};
use crate::revision::{DocumentId, Revision};

/// Bytes copied per read/write step when storing content.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// A freshly reserved, empty blob file.
#[derive(Debug, Clone)]
pub struct BlobSlot {
    pub name: String,
    pub path: PathBuf,
}

/// Local filesystem store for revision blobs.
pub struct ContentStore {
    /// Root of the year/month bucket tree
    root: PathBuf,

    chunk_size: usize,

    /// Serializes blob name allocation
    allocation: Mutex<()>,
}

impl ContentStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P, chunk_size: usize) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            chunk_size: chunk_size.max(1),
            allocation: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bucket directory for content created at `created_at`, created on demand.
    ///
    /// A directory that cannot be created is logged; the failure surfaces later
    /// when something is written into it.
    pub fn base_path_for(&self, created_at: DateTime<Utc>) -> PathBuf {
        let path = layout::bucket_path(&self.root, created_at);
        if let Err(e) = fs::create_dir_all(&path) {
            log::error!("Failed to create storage directory {}: {}", path.display(), e);
        }
        path
    }

    /// Where this revision's own blob would live, without any searching.
    pub fn blob_path(&self, revision: &Revision) -> PathBuf {
        self.base_path_for(revision.created_at)
            .join(&revision.blob_name)
    }

    /// Existing path of a revision's blob.
    ///
    /// When the revision has no physical file of its own, `older` revisions are
    /// tried in the order given, then the bucket named by the blob's timestamp
    /// prefix. If nothing exists, the path computed last in the `older` walk is
    /// returned (it does not exist).
    pub fn resolve<'a, I>(&self, revision: &Revision, older: I) -> PathBuf
    where
        I: IntoIterator<Item = &'a Revision>,
    {
        let mut path = self.blob_path(revision);
        if path.exists() {
            return path;
        }

        for ancestor in older {
            path = self.blob_path(ancestor);
            if path.exists() {
                log::debug!(
                    "Revision {} resolved to blob of revision {}",
                    revision.id,
                    ancestor.id
                );
                return path;
            }
        }

        match self.bucket_of(&revision.blob_name) {
            Some(candidate) if candidate.exists() => candidate,
            _ => path,
        }
    }

    /// Physical location of a blob by name, trying each bucket in `created`
    /// and finally the bucket named by the blob's timestamp prefix.
    pub fn find_blob<I>(&self, blob_name: &str, created: I) -> Option<PathBuf>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        if blob_name.is_empty() {
            return None;
        }
        created
            .into_iter()
            .map(|at| layout::bucket_path(&self.root, at).join(blob_name))
            .chain(self.bucket_of(blob_name))
            .find(|path| path.is_file())
    }

    fn bucket_of(&self, blob_name: &str) -> Option<PathBuf> {
        if blob_name.is_empty() {
            return None;
        }
        layout::bucket_from_blob_name(&self.root, blob_name).map(|dir| dir.join(blob_name))
    }

    /// First free blob name in `dir` for this document and display name.
    ///
    /// On a collision the timestamp prefix is advanced to its successor rather
    /// than re-sampled, so the result is deterministic for a given directory.
    pub fn new_blob_name(
        &self,
        dir: &Path,
        document_id: DocumentId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> String {
        let sanitized = sanitize_filename(display_name);
        let mut timestamp = layout::blob_timestamp(now);
        loop {
            let name = layout::blob_name(&timestamp, document_id, &sanitized);
            if !dir.join(&name).exists() {
                return name;
            }
            timestamp = layout::next_timestamp(&timestamp);
        }
    }

    /// Reserve a new blob by exclusively creating an empty file for it.
    pub fn allocate(
        &self,
        document_id: DocumentId,
        display_name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<BlobSlot, StorageError> {
        let dir = self.base_path_for(created_at);
        let _guard = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let name = self.new_blob_name(&dir, document_id, display_name, created_at);
            let path = dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(BlobSlot { name, path }),
                // Another process took the name between the check and the create
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Stream `source` into `path`, replacing any previous content.
    ///
    /// Returns the number of bytes written. A failed write may leave a partial
    /// file behind; writing the same path again overwrites it.
    pub fn write<R: Read + ?Sized>(&self, path: &Path, source: &mut R) -> Result<u64, StorageError> {
        let mut file = File::create(path)?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        loop {
            let read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&buffer[..read])?;
            written += read as u64;
        }

        file.flush()?;
        Ok(written)
    }

    /// SHA-256 of the file at `path`, or the unavailable sentinel.
    pub fn digest(&self, path: &Path) -> String {
        digest::file_digest(path)
    }

    pub fn open(&self, path: &Path) -> Result<File, StorageError> {
        if !path.exists() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        Ok(File::open(path)?)
    }

    /// Best-effort removal of a blob file. Failures are logged, never returned.
    pub fn remove(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => {
                log::info!("Removed blob {}", path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                log::warn!("Failed to remove blob {}: {}", path.display(), e);
                false
            }
        }
    }
}
