//! Persistent metadata index of revisions
//!
//! The whole index is one JSON document. Changes go through
//! [`RevisionIndex::transaction`]: they are applied to a copy, the copy is
//! written to a temporary file and renamed over the index, and only then does
//! the copy replace the in-memory state. A reader of either the file or the
//! in-memory state therefore sees a change completely or not at all.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::access::AccessEntry;
use super::{DocumentId, Revision, RevisionDraft, RevisionId};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// On-disk shape of the index.
#[derive(Serialize, Deserialize, Default)]
struct IndexFile {
    next_revision_id: u64,
    revisions: Vec<Revision>,
    accesses: Vec<AccessEntry>,
}

/// In-memory contents of the index.
#[derive(Clone, Debug, Default)]
pub struct IndexState {
    next_revision_id: u64,
    revisions: BTreeMap<RevisionId, Revision>,
    accesses: Vec<AccessEntry>,
}

impl IndexState {
    fn from_file(file: IndexFile) -> Self {
        let revisions: BTreeMap<RevisionId, Revision> =
            file.revisions.into_iter().map(|r| (r.id, r)).collect();
        let highest = revisions.keys().next_back().map_or(0, |id| id.0);
        Self {
            next_revision_id: file.next_revision_id.max(highest + 1),
            revisions,
            accesses: file.accesses,
        }
    }

    fn to_file(&self) -> IndexFile {
        IndexFile {
            next_revision_id: self.next_revision_id,
            revisions: self.revisions.values().cloned().collect(),
            accesses: self.accesses.clone(),
        }
    }

    pub fn get(&self, id: RevisionId) -> Option<&Revision> {
        self.revisions.get(&id)
    }

    pub fn get_mut(&mut self, id: RevisionId) -> Option<&mut Revision> {
        self.revisions.get_mut(&id)
    }

    /// Persist a draft under the next free id.
    pub fn insert(&mut self, draft: RevisionDraft, now: DateTime<Utc>) -> Revision {
        let id = RevisionId(self.next_revision_id.max(1));
        self.next_revision_id = id.0 + 1;
        let revision = draft.into_revision(id, now);
        self.revisions.insert(id, revision.clone());
        revision
    }

    /// Drop a revision row together with its access log.
    pub fn remove(&mut self, id: RevisionId) -> Option<Revision> {
        let removed = self.revisions.remove(&id)?;
        self.accesses.retain(|a| a.revision_id != id);
        Some(removed)
    }

    /// All revisions of a document, oldest first.
    pub fn revisions_of(&self, document_id: DocumentId) -> impl Iterator<Item = &Revision> + '_ {
        self.revisions
            .values()
            .filter(move |r| r.document_id == document_id)
    }

    /// Revisions of the same document created before `revision`, newest first.
    pub fn older_than(&self, revision: &Revision) -> Vec<&Revision> {
        self.revisions
            .range(..revision.id)
            .rev()
            .map(|(_, r)| r)
            .filter(|r| r.document_id == revision.document_id)
            .collect()
    }

    /// Revisions whose source link points at `id`.
    pub fn children_of(&self, id: RevisionId) -> Vec<RevisionId> {
        self.revisions
            .values()
            .filter(|r| r.source_revision_id == Some(id))
            .map(|r| r.id)
            .collect()
    }

    pub fn visible_count(&self, document_id: DocumentId) -> usize {
        self.revisions_of(document_id)
            .filter(|r| !r.is_deleted())
            .count()
    }

    pub fn latest_visible(&self, document_id: DocumentId) -> Option<&Revision> {
        self.revisions_of(document_id)
            .filter(|r| !r.is_deleted())
            .last()
    }

    /// Revisions, across every document, using `blob_name`.
    pub fn sharing_blob<'a>(&'a self, blob_name: &'a str) -> impl Iterator<Item = &'a Revision> + 'a {
        self.revisions
            .values()
            .filter(move |r| r.blob_name == blob_name)
    }

    pub fn blob_references(&self, blob_name: &str) -> usize {
        self.sharing_blob(blob_name).count()
    }

    pub fn documents(&self) -> BTreeSet<DocumentId> {
        self.revisions.values().map(|r| r.document_id).collect()
    }

    pub fn record_access(&mut self, entry: AccessEntry) {
        self.accesses.push(entry);
    }

    pub fn accesses_of(&self, id: RevisionId) -> impl Iterator<Item = &AccessEntry> + '_ {
        self.accesses.iter().filter(move |a| a.revision_id == id)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

/// The index together with the file it is persisted to.
pub struct RevisionIndex {
    path: PathBuf,
    state: IndexState,
}

impl RevisionIndex {
    /// Load the index at `path`, or start an empty one if the file is absent.
    pub fn load_or_create(path: PathBuf) -> Result<Self, IndexError> {
        let state = if path.exists() {
            let data = std::fs::read(&path).map_err(|e| IndexError::Io(e.to_string()))?;
            let file: IndexFile = serde_json::from_slice(&data)
                .map_err(|e| IndexError::Deserialization(e.to_string()))?;
            IndexState::from_file(file)
        } else {
            IndexState::default()
        };

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &IndexState {
        &self.state
    }

    /// Apply `change` atomically: persisted and published together, or not at all.
    pub fn transaction<T, E, F>(&mut self, change: F) -> Result<T, E>
    where
        F: FnOnce(&mut IndexState) -> Result<T, E>,
        E: From<IndexError>,
    {
        let mut next = self.state.clone();
        let output = change(&mut next)?;
        write_index(&self.path, &next)?;
        self.state = next;
        Ok(output)
    }
}

fn write_index(path: &Path, state: &IndexState) -> Result<(), IndexError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| IndexError::Io(e.to_string()))?;

    let json = serde_json::to_vec_pretty(&state.to_file())
        .map_err(|e| IndexError::Serialization(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| IndexError::Io(e.to_string()))?;
    temp.write_all(&json).map_err(|e| IndexError::Io(e.to_string()))?;
    temp.as_file().sync_all().map_err(|e| IndexError::Io(e.to_string()))?;
    temp.persist(path).map_err(|e| IndexError::Io(e.error.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(document: u64, blob: &str) -> RevisionDraft {
        let mut draft = RevisionDraft::new(DocumentId(document), "file.txt", None);
        draft.blob_name = blob.to_string();
        draft
    }

    #[test]
    fn test_create_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta").join("index.json");

        let id;
        {
            let mut index = RevisionIndex::load_or_create(path.clone()).unwrap();
            id = index
                .transaction(|state| Ok::<_, IndexError>(state.insert(draft(1, "a"), Utc::now()).id))
                .unwrap();
        }

        let index = RevisionIndex::load_or_create(path).unwrap();
        let revision = index.state().get(id).unwrap();
        assert_eq!(revision.blob_name, "a");
        assert_eq!(revision.document_id, DocumentId(1));
    }

    #[test]
    fn test_ids_keep_increasing_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = RevisionIndex::load_or_create(path.clone()).unwrap();
        let first = index
            .transaction(|state| {
                let id = state.insert(draft(1, "a"), Utc::now()).id;
                state.remove(id);
                Ok::<_, IndexError>(id)
            })
            .unwrap();

        let mut index = RevisionIndex::load_or_create(path).unwrap();
        let second = index
            .transaction(|state| Ok::<_, IndexError>(state.insert(draft(1, "b"), Utc::now()).id))
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_failed_transaction_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = RevisionIndex::load_or_create(dir.path().join("index.json")).unwrap();

        let result: Result<(), IndexError> = index.transaction(|state| {
            state.insert(draft(1, "a"), Utc::now());
            Err(IndexError::Io("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(index.state().is_empty());
        assert!(!index.path().exists());
    }

    #[test]
    fn test_queries() {
        let mut state = IndexState::default();
        let a = state.insert(draft(1, "shared"), Utc::now());
        let mut child = draft(1, "shared");
        child.source_revision_id = Some(a.id);
        let b = state.insert(child, Utc::now());
        let other = state.insert(draft(2, "shared"), Utc::now());

        assert_eq!(state.blob_references("shared"), 3);
        assert_eq!(state.children_of(a.id), vec![b.id]);
        assert_eq!(state.visible_count(DocumentId(1)), 2);
        assert_eq!(state.latest_visible(DocumentId(1)).unwrap().id, b.id);
        assert_eq!(
            state.older_than(&b).iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![a.id]
        );
        assert!(state.older_than(&other).is_empty());
        assert_eq!(state.documents().len(), 2);
    }
}
