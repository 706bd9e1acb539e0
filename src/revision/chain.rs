//! Revision chains: creation, deletion and blob reclamation
//!
//! All metadata changes run inside one index transaction while the index mutex
//! is held, so concurrent callers never observe a half-applied change. Purging
//! relinks dependents and removes the row in the same transaction, then
//! counts the remaining references to the blob and removes the file, still
//! under the mutex.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::iter;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::access::{self, AccessEntry, AccessSummary};
use super::index::{IndexState, RevisionIndex};
use super::{
    mime_for_name, DeletedState, DocumentId, Revision, RevisionDraft, RevisionError, RevisionId,
    OCTET_STREAM,
};
use crate::collab::{Collaborators, UserId};
use crate::config::StoreConfig;
use crate::storage::{ContentStore, DigestKind};
use crate::workflow::{self, StepAction, WorkflowError, WorkflowRefId, WorkflowState};

/// Content to attach when committing a draft.
pub enum Content<'a> {
    /// Keep pointing at the blob the draft already names
    Unchanged,
    /// Store new bytes under a fresh blob
    Bytes(&'a mut dyn Read),
}

/// What to do with a blob once no revision references it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimPolicy {
    /// Delete the file right away
    Eager,
    /// Leave the file on disk
    Retain,
}

impl ReclaimPolicy {
    pub fn from_flag(reclaim: bool) -> Self {
        if reclaim {
            ReclaimPolicy::Eager
        } else {
            ReclaimPolicy::Retain
        }
    }
}

/// Outcome of checking a blob against its recorded digest.
#[derive(Clone, Debug, PartialEq)]
pub enum Verification {
    Match,
    Mismatch { expected: String, actual: String },
    /// The recorded digest cannot be recomputed (legacy or absent)
    Unsupported(DigestKind),
    Missing(PathBuf),
}

/// Revision metadata index plus the blobs it points at.
pub struct RevisionChain {
    store: ContentStore,
    index: Mutex<RevisionIndex>,
    collaborators: Collaborators,
}

impl RevisionChain {
    pub fn new(store: ContentStore, index: RevisionIndex, collaborators: Collaborators) -> Self {
        Self {
            store,
            index: Mutex::new(index),
            collaborators,
        }
    }

    /// Open the blob store and index named by `config`.
    pub fn open(config: &StoreConfig, collaborators: Collaborators) -> Result<Self, RevisionError> {
        let store = ContentStore::new(&config.storage_root, config.chunk_size)?;
        let index = RevisionIndex::load_or_create(config.index_path.clone())?;
        log::info!(
            "Opened revision store at {} ({} revisions)",
            config.storage_root.display(),
            index.state().len()
        );
        Ok(Self::new(store, index, collaborators))
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.store
    }

    fn index(&self) -> MutexGuard<'_, RevisionIndex> {
        // Transactions publish only on success, so a poisoned index is still consistent
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn actor(&self) -> Option<UserId> {
        self.collaborators.actors.current()
    }

    fn ensure_unlocked(&self, document_id: DocumentId) -> Result<(), RevisionError> {
        if self.collaborators.locks.is_locked_for(document_id, self.actor()) {
            return Err(RevisionError::Locked(document_id));
        }
        Ok(())
    }

    pub fn get(&self, id: RevisionId) -> Result<Revision, RevisionError> {
        self.index()
            .state()
            .get(id)
            .cloned()
            .ok_or(RevisionError::NotFound(id))
    }

    /// Every revision of a document, deleted ones included, oldest first.
    pub fn revisions_of(&self, document_id: DocumentId) -> Vec<Revision> {
        self.index().state().revisions_of(document_id).cloned().collect()
    }

    /// Newest visible revision of a document.
    pub fn latest(&self, document_id: DocumentId) -> Option<Revision> {
        self.index().state().latest_visible(document_id).cloned()
    }

    pub fn documents(&self) -> Vec<DocumentId> {
        self.index().state().documents().into_iter().collect()
    }

    /// The revision and its ancestors along source links, newest first.
    pub fn history(&self, id: RevisionId) -> Result<Vec<Revision>, RevisionError> {
        let index = self.index();
        if index.state().get(id).is_none() {
            return Err(RevisionError::NotFound(id));
        }
        Ok(ancestors(index.state(), id)?.into_iter().cloned().collect())
    }

    /// Unsaved successor of `parent`, authored by the acting user.
    pub fn clone_revision(&self, parent: &Revision) -> RevisionDraft {
        parent.derive(self.actor())
    }

    /// Unsaved successor of the document's newest visible revision.
    pub fn clone_latest(&self, document_id: DocumentId) -> Result<RevisionDraft, RevisionError> {
        let latest = self
            .latest(document_id)
            .ok_or(RevisionError::NoRevisions(document_id))?;
        Ok(self.clone_revision(&latest))
    }

    /// Validate and persist a draft, storing new content first if given.
    ///
    /// New bytes whose SHA-256 equals the parent's digest are not kept: the
    /// revision reuses the parent's blob instead.
    pub fn commit(&self, mut draft: RevisionDraft, content: Content<'_>) -> Result<Revision, RevisionError> {
        draft.validate()?;
        self.ensure_unlocked(draft.document_id)?;
        let now = Utc::now();

        let written = match content {
            Content::Unchanged => {
                if draft.blob_name.is_empty() {
                    return Err(RevisionError::Validation(vec![
                        "Content is required for the first revision of a document".to_string(),
                    ]));
                }
                None
            }
            Content::Bytes(source) => {
                let slot = self.store.allocate(draft.document_id, &draft.name, now)?;
                let size = match self.store.write(&slot.path, source) {
                    Ok(size) => size,
                    Err(e) => {
                        self.store.remove(&slot.path);
                        return Err(e.into());
                    }
                };
                draft.digest = Some(self.store.digest(&slot.path));
                draft.blob_name = slot.name;
                draft.size = size;
                if draft.mime_type.as_deref().map_or(true, |m| m.trim().is_empty()) {
                    draft.mime_type =
                        Some(mime_for_name(&draft.name).unwrap_or(OCTET_STREAM).to_string());
                }
                Some(slot.path)
            }
        };

        let mut index = self.index();

        let mut duplicate = None;
        if let Some(path) = &written {
            if let Some(parent_blob) = self.reusable_blob(index.state(), &draft) {
                log::debug!("Content of {} duplicates blob {}", draft.name, parent_blob);
                draft.blob_name = parent_blob;
                duplicate = Some(path.clone());
            }
        }

        let result = index.transaction(|state| {
            check_source(state, &draft)?;
            Ok::<_, RevisionError>(state.insert(draft, now))
        });

        match result {
            Ok(revision) => {
                if let Some(path) = duplicate {
                    self.store.remove(&path);
                }
                log::info!(
                    "Committed revision {} of document {} (version {}, blob {})",
                    revision.id,
                    revision.document_id,
                    revision.version,
                    revision.blob_name
                );
                Ok(revision)
            }
            Err(e) => {
                if let Some(path) = written {
                    self.store.remove(&path);
                }
                Err(e)
            }
        }
    }

    /// Parent blob name, when the draft's fresh content is byte-identical to it
    /// and the parent's file still exists.
    fn reusable_blob(&self, state: &IndexState, draft: &RevisionDraft) -> Option<String> {
        let parent = state.get(draft.source_revision_id?)?;
        let digest = draft.digest.as_deref()?;
        if DigestKind::of(Some(digest)) != DigestKind::Sha256 || parent.digest.as_deref() != Some(digest) {
            return None;
        }

        let created = iter::once(parent.created_at)
            .chain(state.sharing_blob(&parent.blob_name).map(|r| r.created_at));
        self.store
            .find_blob(&parent.blob_name, created)
            .map(|_| parent.blob_name.clone())
    }

    /// Mark a revision deleted, keeping its row and chain position.
    ///
    /// Without `force`, the last visible revision of a document cannot be deleted.
    pub fn soft_delete(&self, id: RevisionId, force: bool) -> Result<Revision, RevisionError> {
        let actor = self.actor();
        let mut index = self.index();
        let revision = index
            .state()
            .get(id)
            .cloned()
            .ok_or(RevisionError::NotFound(id))?;
        self.ensure_unlocked(revision.document_id)?;

        let others_visible = index
            .state()
            .revisions_of(revision.document_id)
            .filter(|r| r.id != id && !r.is_deleted())
            .count();
        if !force && others_visible == 0 {
            return Err(RevisionError::LastRevision(revision.document_id));
        }

        let deleted = index.transaction(|state| {
            let revision = state.get_mut(id).ok_or(RevisionError::NotFound(id))?;
            revision.deleted = DeletedState::Deleted;
            revision.deleted_by = actor;
            revision.updated_at = Utc::now();
            Ok::<_, RevisionError>(revision.clone())
        })?;

        log::info!("Deleted revision {} of document {}", id, deleted.document_id);
        Ok(deleted)
    }

    /// Undo a soft delete.
    pub fn restore(&self, id: RevisionId) -> Result<Revision, RevisionError> {
        let restored = self.index().transaction(|state| {
            let revision = state.get_mut(id).ok_or(RevisionError::NotFound(id))?;
            revision.deleted = DeletedState::Active;
            revision.deleted_by = None;
            revision.updated_at = Utc::now();
            Ok::<_, RevisionError>(revision.clone())
        })?;

        log::info!("Restored revision {} of document {}", id, restored.document_id);
        Ok(restored)
    }

    /// Permanently remove a revision.
    ///
    /// Revisions derived from it are relinked to its own source, so the chain
    /// skips the removed node. With [`ReclaimPolicy::Eager`] the blob file is
    /// deleted once no revision anywhere references it; failing to delete it is
    /// logged and does not fail the purge.
    pub fn purge(&self, id: RevisionId, policy: ReclaimPolicy) -> Result<Revision, RevisionError> {
        let mut index = self.index();
        let revision = index
            .state()
            .get(id)
            .cloned()
            .ok_or(RevisionError::NotFound(id))?;
        self.ensure_unlocked(revision.document_id)?;

        let relinked = index.transaction(|state| {
            let children = state.children_of(id);
            for child in &children {
                if let Some(child) = state.get_mut(*child) {
                    child.source_revision_id = revision.source_revision_id;
                }
            }
            state.remove(id);
            Ok::<_, RevisionError>(children)
        })?;

        log::info!(
            "Purged revision {} of document {} ({} dependents relinked)",
            id,
            revision.document_id,
            relinked.len()
        );

        if policy == ReclaimPolicy::Eager {
            let created = iter::once(revision.created_at).chain(
                index
                    .state()
                    .older_than(&revision)
                    .into_iter()
                    .map(|r| r.created_at),
            );
            self.reclaim_blob(index.state(), &revision.blob_name, created);
        }

        Ok(revision)
    }

    /// Permanently remove every revision of a document.
    pub fn purge_document(&self, document_id: DocumentId, policy: ReclaimPolicy) -> Result<usize, RevisionError> {
        let mut index = self.index();
        self.ensure_unlocked(document_id)?;

        let removed: Vec<Revision> = index.transaction(|state| {
            let ids: Vec<RevisionId> = state.revisions_of(document_id).map(|r| r.id).collect();
            if ids.is_empty() {
                return Err(RevisionError::NoRevisions(document_id));
            }
            Ok(ids.into_iter().filter_map(|id| state.remove(id)).collect())
        })?;

        log::info!("Purged document {} ({} revisions)", document_id, removed.len());

        if policy == ReclaimPolicy::Eager {
            let mut seen = HashSet::new();
            for revision in &removed {
                if !seen.insert(revision.blob_name.as_str()) {
                    continue;
                }
                let created = removed
                    .iter()
                    .filter(|r| r.blob_name == revision.blob_name)
                    .map(|r| r.created_at);
                self.reclaim_blob(index.state(), &revision.blob_name, created);
            }
        }

        Ok(removed.len())
    }

    /// Delete a blob file if nothing references it. Must run with the index
    /// mutex held, after the removing transaction has been published.
    fn reclaim_blob<I>(&self, state: &IndexState, blob_name: &str, created: I) -> bool
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let references = state.blob_references(blob_name);
        if references > 0 {
            log::debug!("Blob {} still referenced by {} revisions", blob_name, references);
            return false;
        }

        match self.store.find_blob(blob_name, created) {
            Some(path) => self.store.remove(&path),
            None => {
                log::debug!("Blob {} has no file to reclaim", blob_name);
                false
            }
        }
    }

    /// Path of a revision's blob; with `search_if_missing`, older revisions of
    /// the document are tried when it has no file of its own.
    pub fn resolve(&self, id: RevisionId, search_if_missing: bool) -> Result<PathBuf, RevisionError> {
        let index = self.index();
        let revision = index.state().get(id).ok_or(RevisionError::NotFound(id))?;
        if search_if_missing {
            Ok(self.store.resolve(revision, index.state().older_than(revision)))
        } else {
            Ok(self.store.blob_path(revision))
        }
    }

    /// Open a revision's content for reading.
    pub fn open_content(&self, id: RevisionId) -> Result<File, RevisionError> {
        let path = self.resolve(id, true)?;
        Ok(self.store.open(&path)?)
    }

    /// Recompute the blob digest and compare it with the recorded one.
    pub fn verify(&self, id: RevisionId) -> Result<Verification, RevisionError> {
        let revision = self.get(id)?;
        let path = self.resolve(id, true)?;
        if !path.is_file() {
            return Ok(Verification::Missing(path));
        }

        match revision.digest_kind() {
            DigestKind::Sha256 => {
                let expected = revision.digest.unwrap_or_default();
                let actual = self.store.digest(&path);
                if actual == expected {
                    Ok(Verification::Match)
                } else {
                    log::warn!("Digest mismatch for revision {}: {} != {}", id, actual, expected);
                    Ok(Verification::Mismatch { expected, actual })
                }
            }
            kind => Ok(Verification::Unsupported(kind)),
        }
    }

    /// Open an approval cycle with `start`.
    pub fn start_workflow(&self, id: RevisionId, workflow: WorkflowRefId) -> Result<Revision, RevisionError> {
        self.update_workflow(id, |revision, actor, now| {
            workflow::start(revision, workflow, actor, now);
            Ok(())
        })
    }

    /// Open an approval cycle by direct assignment and notify the engine.
    pub fn assign_workflow(&self, id: RevisionId, workflow: WorkflowRefId) -> Result<Revision, RevisionError> {
        let revision = self.update_workflow(id, |revision, actor, now| {
            workflow::assign(revision, workflow, actor, now);
            Ok(())
        })?;
        self.collaborators.workflows.assign(workflow, id);
        Ok(revision)
    }

    /// Record the engine's decision on an open cycle.
    pub fn complete_workflow(&self, id: RevisionId, outcome: WorkflowState) -> Result<Revision, RevisionError> {
        self.update_workflow(id, |revision, _, _| workflow::complete(revision, outcome))
    }

    fn update_workflow<F>(&self, id: RevisionId, transition: F) -> Result<Revision, RevisionError>
    where
        F: FnOnce(&mut Revision, Option<UserId>, DateTime<Utc>) -> Result<(), WorkflowError>,
    {
        let actor = self.actor();
        let now = Utc::now();
        let revision = self.index().transaction(|state| {
            let revision = state.get_mut(id).ok_or(RevisionError::NotFound(id))?;
            transition(revision, actor, now)?;
            revision.updated_at = now;
            Ok::<_, RevisionError>(revision.clone())
        })?;

        log::info!("Revision {} workflow is now {}", id, revision.workflow.state);
        Ok(revision)
    }

    pub fn next_approvers(&self, id: RevisionId) -> Result<Vec<UserId>, RevisionError> {
        let revision = self.get(id)?;
        Ok(workflow::next_approvers(&revision, self.collaborators.workflows.as_ref()))
    }

    pub fn last_action_author(&self, id: RevisionId) -> Result<Option<StepAction>, RevisionError> {
        let revision = self.get(id)?;
        Ok(workflow::last_action_author(&revision, self.collaborators.workflows.as_ref()))
    }

    pub fn workflow_label(&self, id: RevisionId, with_name: bool) -> Result<String, RevisionError> {
        let revision = self.get(id)?;
        Ok(workflow::label(&revision, self.collaborators.workflows.as_ref(), with_name))
    }

    /// Log an access of a revision by the acting user.
    pub fn record_access(&self, id: RevisionId) -> Result<(), RevisionError> {
        let actor = self.actor();
        self.index().transaction(|state| {
            if state.get(id).is_none() {
                return Err(RevisionError::NotFound(id));
            }
            state.record_access(AccessEntry {
                revision_id: id,
                actor,
                at: Utc::now(),
            });
            Ok(())
        })
    }

    /// Per-actor access counts with first and last access times.
    pub fn access_summary(&self, id: RevisionId) -> Result<Vec<AccessSummary>, RevisionError> {
        let index = self.index();
        if index.state().get(id).is_none() {
            return Err(RevisionError::NotFound(id));
        }
        Ok(access::summarize(index.state().accesses_of(id)))
    }
}

/// The source link of a draft must name an existing revision of the same
/// document whose own chain is intact.
fn check_source(state: &IndexState, draft: &RevisionDraft) -> Result<(), RevisionError> {
    let Some(source_id) = draft.source_revision_id else {
        return Ok(());
    };
    let source = state.get(source_id).ok_or_else(|| {
        RevisionError::Integrity(format!("source revision {} does not exist", source_id))
    })?;
    if source.document_id != draft.document_id {
        return Err(RevisionError::Integrity(format!(
            "source revision {} belongs to document {}, not {}",
            source_id, source.document_id, draft.document_id
        )));
    }
    ancestors(state, source_id).map(|_| ())
}

/// Walk source links from `from`, newest first.
fn ancestors(state: &IndexState, from: RevisionId) -> Result<Vec<&Revision>, RevisionError> {
    let mut seen = HashSet::new();
    let mut chain = Vec::new();
    let mut cursor = Some(from);

    while let Some(id) = cursor {
        if !seen.insert(id) {
            return Err(RevisionError::Integrity(format!("cycle through revision {}", id)));
        }
        let revision = state
            .get(id)
            .ok_or_else(|| RevisionError::Integrity(format!("revision {} is missing from the chain", id)))?;
        chain.push(revision);
        cursor = revision.source_revision_id;
    }

    Ok(chain)
}
