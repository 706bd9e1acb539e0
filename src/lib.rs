// Revstore - Versioned document content store

pub mod collab;
pub mod config;
pub mod revision;
pub mod storage;
pub mod version;
pub mod workflow;

pub use collab::{ActorProvider, Collaborators, FixedActor, LockChecker, NoLocks, UserId};
pub use config::{ConfigError, StoreConfig};
pub use revision::{
    Content, DocumentId, ReclaimPolicy, Revision, RevisionChain, RevisionDraft, RevisionError,
    RevisionId, Verification,
};
pub use storage::{ContentStore, StorageError};
pub use version::{Version, VersionBump};
pub use workflow::{NoWorkflowEngine, WorkflowEngine, WorkflowRefId, WorkflowState};
