//! Collaborators supplied by the host application
//!
//! Access control, locking and the workflow assignment engine live outside this
//! crate. They are consulted through the traits here; the trivial
//! implementations are enough for a standalone store.

use std::sync::Arc;

use uuid::Uuid;

use crate::revision::DocumentId;
use crate::workflow::{NoWorkflowEngine, WorkflowEngine};

/// Identity of a user acting on the store.
pub type UserId = Uuid;

/// Answers whether a document is locked against the acting user.
pub trait LockChecker: Send + Sync {
    fn is_locked_for(&self, document_id: DocumentId, actor: Option<UserId>) -> bool;
}

/// Supplies the user on whose behalf an operation runs (`None` for anonymous).
pub trait ActorProvider: Send + Sync {
    fn current(&self) -> Option<UserId>;
}

/// Nothing is ever locked.
pub struct NoLocks;

impl LockChecker for NoLocks {
    fn is_locked_for(&self, _document_id: DocumentId, _actor: Option<UserId>) -> bool {
        false
    }
}

/// Always acts as the same user.
#[derive(Clone, Copy, Debug)]
pub struct FixedActor(pub Option<UserId>);

impl ActorProvider for FixedActor {
    fn current(&self) -> Option<UserId> {
        self.0
    }
}

/// Bundle of host collaborators handed to [`crate::revision::RevisionChain`].
#[derive(Clone)]
pub struct Collaborators {
    pub locks: Arc<dyn LockChecker>,
    pub actors: Arc<dyn ActorProvider>,
    pub workflows: Arc<dyn WorkflowEngine>,
}

impl Collaborators {
    /// No locking, no workflow engine, a fixed acting user.
    pub fn standalone(actor: Option<UserId>) -> Self {
        Self {
            locks: Arc::new(NoLocks),
            actors: Arc::new(FixedActor(actor)),
            workflows: Arc::new(NoWorkflowEngine),
        }
    }
}
