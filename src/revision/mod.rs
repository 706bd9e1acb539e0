//! Document revisions
//!
//! Every edit of a document produces a [`Revision`]. A revision points at a
//! physical blob by name (several revisions may share one blob) and at the
//! revision it was derived from, which forms the document's history chain.
//! [`RevisionChain`] owns creation, deletion and blob reclamation.

pub mod access;
pub mod chain;
pub mod index;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collab::UserId;
use crate::storage::{DigestKind, StorageError};
use crate::version::{Version, VersionBump};
use crate::workflow::{WorkflowError, WorkflowInfo, WorkflowRefId};

pub use access::{AccessEntry, AccessSummary};
pub use chain::{Content, ReclaimPolicy, RevisionChain, Verification};
pub use index::{IndexError, IndexState, RevisionIndex};

/// Longest accepted description, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 1024;

/// Characters a display name may not contain.
pub const INVALID_NAME_CHARACTERS: &[char] = &['/', '\\', '?', '"', ':', '<', '>'];

pub(crate) const OCTET_STREAM: &str = "application/octet-stream";

/// URI schemes for opening office documents in place.
const OFFICE_PROTOCOLS: &[(&str, &str)] = &[
    ("application/msword", "ms-word"),
    ("application/excel", "ms-excel"),
    ("application/vnd.ms-excel", "ms-excel"),
    ("application/vnd.ms-powerpoint", "ms-powerpoint"),
    ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", "ms-word"),
    ("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", "ms-excel"),
    ("application/vnd.openxmlformats-officedocument.presentationml.presentation", "ms-powerpoint"),
    ("application/vnd.openxmlformats-officedocument.presentationml.slideshow", "ms-powerpoint"),
    ("application/vnd.oasis.opendocument.spreadsheet", "ms-excel"),
    ("application/vnd.oasis.opendocument.text", "ms-word"),
    ("application/vnd.oasis.opendocument.presentation", "ms-powerpoint"),
];

const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xml", "application/xml"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("doc", "application/msword"),
    ("xls", "application/vnd.ms-excel"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RevisionId(pub u64);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeletedState {
    #[default]
    Active,
    Deleted,
}

/// Error types for revision operations
#[derive(Error, Debug)]
pub enum RevisionError {
    #[error("Document {0} is locked")]
    Locked(DocumentId),

    #[error("At least one revision of document {0} must be present")]
    LastRevision(DocumentId),

    #[error("Invalid revision: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Revision not found: {0}")]
    NotFound(RevisionId),

    #[error("Document {0} has no revisions")]
    NoRevisions(DocumentId),

    #[error("Revision chain integrity: {0}")]
    Integrity(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl RevisionError {
    /// Rejections meant for the user rather than operational failures.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RevisionError::Locked(_)
                | RevisionError::LastRevision(_)
                | RevisionError::Validation(_)
                | RevisionError::Workflow(_)
        )
    }
}

/// A persisted revision.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Revision {
    pub id: RevisionId,
    pub document_id: DocumentId,
    /// Revision this one was derived from; `None` for the root of a chain
    pub source_revision_id: Option<RevisionId>,

    /// Hex digest of the blob (32 chars MD5 or 64 chars SHA-256)
    pub digest: Option<String>,
    /// Physical file name, shared by revisions with unchanged content
    pub blob_name: String,
    pub size: u64,
    pub mime_type: Option<String>,

    pub title: String,
    /// Display file name
    pub name: String,
    pub description: Option<String>,
    pub comment: Option<String>,

    pub version: Version,

    pub deleted: DeletedState,
    pub deleted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<UserId>,

    pub workflow: WorkflowInfo,
}

impl Revision {
    pub fn is_deleted(&self) -> bool {
        self.deleted == DeletedState::Deleted
    }

    pub fn digest_kind(&self) -> DigestKind {
        DigestKind::of(self.digest.as_deref())
    }

    /// Derive an unsaved successor that initially shares this revision's blob.
    pub fn derive(&self, author: Option<UserId>) -> RevisionDraft {
        RevisionDraft {
            document_id: self.document_id,
            source_revision_id: Some(self.id),
            blob_name: self.blob_name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            title: self.title.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            comment: None,
            version: self.version,
            digest: self.digest.clone(),
            author,
            workflow_ref_id: self.workflow.workflow_ref_id,
        }
    }

    /// Expand a download name template.
    ///
    /// Tokens: `%t` title, `%f` name without extension, `%d` update time,
    /// `%v` version, `%i` document id, `%r` revision id. Each token is replaced
    /// at its first occurrence and the original extension is appended.
    pub fn formatted_name(&self, template: &str) -> String {
        if template.trim().is_empty() {
            return self.name.clone();
        }

        let (stem, extension) = match self.name.rfind('.') {
            Some(pos) => (&self.name[..pos], Some(&self.name[pos..])),
            None => (self.name.as_str(), None),
        };

        let mut formatted = template
            .replacen("%t", &self.title, 1)
            .replacen("%f", stem, 1)
            .replacen("%d", &self.updated_at.format("%Y%m%d%H%M%S").to_string(), 1)
            .replacen("%v", &self.version.to_string(), 1)
            .replacen("%i", &self.document_id.to_string(), 1)
            .replacen("%r", &self.id.to_string(), 1);
        if let Some(extension) = extension {
            formatted.push_str(extension);
        }
        formatted
    }

    /// Description and comment joined with ` / `, markup removed.
    pub fn tooltip(&self) -> String {
        let parts: Vec<&str> = [self.description.as_deref(), self.comment.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        strip_tags(&parts.join(" / "))
    }

    /// Stored MIME type, else a guess from the blob extension.
    pub fn detect_content_type(&self) -> String {
        if let Some(mime) = self.mime_type.as_deref().filter(|m| !m.trim().is_empty()) {
            return mime.to_string();
        }
        mime_for_name(&self.blob_name).unwrap_or(OCTET_STREAM).to_string()
    }

    /// Office URI scheme for opening this revision in place, if any.
    pub fn protocol(&self) -> Option<&'static str> {
        let mime = self.mime_type.as_deref()?;
        OFFICE_PROTOCOLS
            .iter()
            .find(|(m, _)| *m == mime)
            .map(|(_, protocol)| *protocol)
    }

    #[cfg(test)]
    pub(crate) fn sample(
        id: RevisionId,
        document_id: DocumentId,
        blob_name: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            document_id,
            source_revision_id: None,
            digest: None,
            blob_name: blob_name.to_string(),
            size: 0,
            mime_type: None,
            title: "Sample".to_string(),
            name: "sample.txt".to_string(),
            description: None,
            comment: None,
            version: Version::INITIAL,
            deleted: DeletedState::Active,
            deleted_by: None,
            created_at,
            updated_at: created_at,
            author: None,
            workflow: WorkflowInfo::default(),
        }
    }
}

/// An unsaved revision, either the root of a new document or derived from a
/// parent with [`Revision::derive`].
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionDraft {
    pub document_id: DocumentId,
    pub source_revision_id: Option<RevisionId>,
    pub blob_name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub title: String,
    pub name: String,
    pub description: Option<String>,
    pub comment: Option<String>,
    pub version: Version,
    pub digest: Option<String>,
    pub author: Option<UserId>,
    pub workflow_ref_id: Option<WorkflowRefId>,
}

impl RevisionDraft {
    /// First revision of a document. It has no blob until content is committed.
    pub fn new(document_id: DocumentId, name: &str, author: Option<UserId>) -> Self {
        Self {
            document_id,
            source_revision_id: None,
            blob_name: String::new(),
            size: 0,
            mime_type: None,
            title: filename_to_title(name),
            name: name.to_string(),
            description: None,
            comment: None,
            version: Version::INITIAL,
            digest: None,
            author,
            workflow_ref_id: None,
        }
    }

    pub fn increase_version(&mut self, bump: VersionBump) {
        self.version.increase(bump);
    }

    /// Check the descriptive fields, collecting every problem.
    pub fn validate(&self) -> Result<(), RevisionError> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push("Title cannot be blank".to_string());
        }
        if self.name.contains(INVALID_NAME_CHARACTERS) {
            errors.push(format!(
                "Name contains an invalid character ({})",
                INVALID_NAME_CHARACTERS.iter().collect::<String>()
            ));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > DESCRIPTION_MAX_CHARS {
                errors.push(format!(
                    "Description is too long (maximum is {} characters)",
                    DESCRIPTION_MAX_CHARS
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RevisionError::Validation(errors))
        }
    }

    pub(crate) fn into_revision(self, id: RevisionId, now: DateTime<Utc>) -> Revision {
        Revision {
            id,
            document_id: self.document_id,
            source_revision_id: self.source_revision_id,
            digest: self.digest,
            blob_name: self.blob_name,
            size: self.size,
            mime_type: self.mime_type,
            title: self.title,
            name: self.name,
            description: self.description,
            comment: self.comment,
            version: self.version,
            deleted: DeletedState::Active,
            deleted_by: None,
            created_at: now,
            updated_at: now,
            author: self.author,
            workflow: WorkflowInfo {
                workflow_ref_id: self.workflow_ref_id,
                ..WorkflowInfo::default()
            },
        }
    }
}

/// File name without its extension. Leading-dot names have no extension.
pub fn remove_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < filename.len() && !filename[..pos].ends_with('/') => {
            &filename[..pos]
        }
        _ => filename,
    }
}

/// Default title for an uploaded file: no extension, underscores as spaces.
pub fn filename_to_title(filename: &str) -> String {
    let mut title = String::new();
    let mut in_run = false;
    for c in remove_extension(filename).chars() {
        if c == '_' {
            if !in_run {
                title.push(' ');
            }
            in_run = true;
        } else {
            title.push(c);
            in_run = false;
        }
    }
    title
}

pub(crate) fn mime_for_name(name: &str) -> Option<&'static str> {
    let (_, extension) = name.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    EXTENSION_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

fn strip_tags(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => plain.push(c),
            _ => {}
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_revision() -> Revision {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let mut rev = Revision::sample(RevisionId(42), DocumentId(7), "240506070809_7_plan.odt", at);
        rev.title = "Plan".to_string();
        rev.name = "plan.v2.odt".to_string();
        rev.version = Version::new(1, 2);
        rev
    }

    #[test]
    fn test_formatted_name() {
        let rev = make_revision();
        assert_eq!(rev.formatted_name(""), "plan.v2.odt");
        assert_eq!(rev.formatted_name("%t-%v"), "Plan-1.2.odt");
        assert_eq!(rev.formatted_name("%f_%d"), "plan.v2_20240506070809.odt");
        assert_eq!(rev.formatted_name("%i-%r"), "7-42.odt");
        // Only the first occurrence of a token is substituted
        assert_eq!(rev.formatted_name("%t%t"), "Plan%t.odt");
    }

    #[test]
    fn test_formatted_name_without_extension() {
        let mut rev = make_revision();
        rev.name = "README".to_string();
        assert_eq!(rev.formatted_name("%f (%v)"), "README (1.2)");
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut draft = RevisionDraft::new(DocumentId(1), "ok.txt", None);
        assert!(draft.validate().is_ok());

        draft.title = "  ".to_string();
        draft.name = "bad:name?.txt".to_string();
        draft.description = Some("x".repeat(DESCRIPTION_MAX_CHARS + 1));
        match draft.validate() {
            Err(RevisionError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_description_limit_counts_characters() {
        let mut draft = RevisionDraft::new(DocumentId(1), "ok.txt", None);
        // 600 characters, 1200 bytes
        draft.description = Some("é".repeat(600));
        assert!(draft.validate().is_ok());

        draft.description = Some("é".repeat(DESCRIPTION_MAX_CHARS));
        assert!(draft.validate().is_ok());

        draft.description = Some("é".repeat(DESCRIPTION_MAX_CHARS + 1));
        assert!(matches!(draft.validate(), Err(RevisionError::Validation(_))));
    }

    #[test]
    fn test_derive_copies_metadata() {
        let mut parent = make_revision();
        parent.digest = Some("d".repeat(64));
        parent.comment = Some("first upload".to_string());
        parent.workflow.workflow_ref_id = Some(WorkflowRefId(3));
        let author = uuid::Uuid::new_v4();

        let draft = parent.derive(Some(author));
        assert_eq!(draft.source_revision_id, Some(parent.id));
        assert_eq!(draft.blob_name, parent.blob_name);
        assert_eq!(draft.digest, parent.digest);
        assert_eq!(draft.version, parent.version);
        assert_eq!(draft.workflow_ref_id, Some(WorkflowRefId(3)));
        assert_eq!(draft.author, Some(author));
        assert_eq!(draft.comment, None);
    }

    #[test]
    fn test_titles_and_extensions() {
        assert_eq!(remove_extension("a.txt"), "a");
        assert_eq!(remove_extension(".bashrc"), ".bashrc");
        assert_eq!(remove_extension("archive.tar.gz"), "archive.tar");
        assert_eq!(filename_to_title("my__big_report.pdf"), "my big report");
    }

    #[test]
    fn test_content_type_and_protocol() {
        let mut rev = make_revision();
        assert_eq!(rev.detect_content_type(), "application/vnd.oasis.opendocument.text");
        rev.blob_name = "noext".to_string();
        assert_eq!(rev.detect_content_type(), "application/octet-stream");
        rev.mime_type = Some("application/msword".to_string());
        assert_eq!(rev.detect_content_type(), "application/msword");
        assert_eq!(rev.protocol(), Some("ms-word"));
    }

    #[test]
    fn test_tooltip() {
        let mut rev = make_revision();
        assert_eq!(rev.tooltip(), "");
        rev.description = Some("<b>Quarterly</b> plan".to_string());
        rev.comment = Some("fixed typos".to_string());
        assert_eq!(rev.tooltip(), "Quarterly plan / fixed typos");
    }
}
