// src/bin/revstore.rs
//! Command line front end for a local revision store
//!
//! Run with: cargo run --bin revstore -- --help

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use revstore::revision::RevisionDraft;
use revstore::{
    Collaborators, Content, DocumentId, ReclaimPolicy, Revision, RevisionChain, RevisionId,
    StoreConfig, Verification, VersionBump, WorkflowRefId, WorkflowState,
};

#[derive(Parser)]
#[command(name = "revstore", version, about = "Versioned document content store")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep blobs and the index under this directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Acting user id
    #[arg(long, global = true)]
    user: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a file as the next revision of a document
    Put {
        file: PathBuf,

        /// Document to add to; a new document is created when omitted
        #[arg(long)]
        document: Option<u64>,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        comment: Option<String>,

        #[arg(long, value_enum, default_value_t = Bump::Minor)]
        bump: Bump,
    },
    /// List the revisions of a document
    Log {
        document: u64,

        /// Include deleted revisions
        #[arg(long)]
        all: bool,
    },
    /// Write a revision's content to stdout or a file
    Cat {
        revision: u64,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Soft delete a revision
    Delete {
        revision: u64,

        /// Allow deleting the last visible revision
        #[arg(long)]
        force: bool,
    },
    /// Undo a soft delete
    Restore { revision: u64 },
    /// Permanently remove a revision, or a whole document
    Purge {
        revision: Option<u64>,

        #[arg(long, conflicts_with = "revision")]
        document: Option<u64>,

        /// Delete blobs nothing references any more
        #[arg(long)]
        reclaim: bool,
    },
    /// Check a revision's blob against its recorded digest
    Verify { revision: u64 },
    /// Approval workflow of a revision
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Show who accessed a revision
    Access { revision: u64 },
}

#[derive(Subcommand)]
enum WorkflowAction {
    Start {
        revision: u64,
        #[arg(long)]
        workflow: u64,
    },
    Assign {
        revision: u64,
        #[arg(long)]
        workflow: u64,
    },
    Approve { revision: u64 },
    Reject { revision: u64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum Bump {
    Minor,
    Major,
    Keep,
}

impl From<Bump> for VersionBump {
    fn from(bump: Bump) -> Self {
        match bump {
            Bump::Minor => VersionBump::Minor,
            Bump::Major => VersionBump::Major,
            Bump::Keep => VersionBump::Keep,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let chain = RevisionChain::open(&config, Collaborators::standalone(cli.user))
        .context("failed to open revision store")?;

    match cli.command {
        Command::Put {
            file,
            document,
            name,
            title,
            description,
            comment,
            bump,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("file has no name")?,
            };
            let document_id = match document {
                Some(id) => DocumentId(id),
                None => next_document_id(&chain),
            };

            let mut draft = next_draft(&chain, document_id, &name, cli.user, bump.into())?;
            if let Some(title) = title {
                draft.title = title;
            }
            if description.is_some() {
                draft.description = description;
            }
            draft.comment = comment;

            let mut source = File::open(&file).with_context(|| format!("cannot read {}", file.display()))?;
            let revision = chain.commit(draft, Content::Bytes(&mut source))?;
            println!(
                "document {} revision {} version {} ({} bytes, {})",
                revision.document_id,
                revision.id,
                revision.version,
                revision.size,
                revision.digest.as_deref().unwrap_or("-")
            );
        }
        Command::Log { document, all } => {
            let revisions = chain.revisions_of(DocumentId(document));
            if revisions.is_empty() {
                bail!("document {} has no revisions", document);
            }
            for revision in revisions.iter().rev().filter(|r| all || !r.is_deleted()) {
                print_revision(revision);
            }
        }
        Command::Cat { revision, output } => {
            let id = RevisionId(revision);
            let mut source = chain.open_content(id)?;
            match output {
                Some(path) => {
                    let mut target = File::create(&path)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    io::copy(&mut source, &mut target)?;
                }
                None => {
                    io::copy(&mut source, &mut io::stdout().lock())?;
                }
            }
            chain.record_access(id)?;
        }
        Command::Delete { revision, force } => {
            let revision = chain.soft_delete(RevisionId(revision), force)?;
            println!("deleted revision {}", revision.id);
        }
        Command::Restore { revision } => {
            let revision = chain.restore(RevisionId(revision))?;
            println!("restored revision {}", revision.id);
        }
        Command::Purge {
            revision,
            document,
            reclaim,
        } => {
            let policy = if reclaim {
                ReclaimPolicy::Eager
            } else {
                config.reclaim_policy()
            };
            match (revision, document) {
                (Some(revision), _) => {
                    let purged = chain.purge(RevisionId(revision), policy)?;
                    println!("purged revision {} of document {}", purged.id, purged.document_id);
                }
                (None, Some(document)) => {
                    let count = chain.purge_document(DocumentId(document), policy)?;
                    println!("purged {} revisions of document {}", count, document);
                }
                (None, None) => bail!("give a revision or --document"),
            }
        }
        Command::Verify { revision } => match chain.verify(RevisionId(revision))? {
            Verification::Match => println!("ok"),
            Verification::Mismatch { expected, actual } => {
                bail!("digest mismatch: recorded {}, found {}", expected, actual)
            }
            Verification::Unsupported(kind) => {
                println!("cannot verify {} digest", kind.label().unwrap_or("unknown"))
            }
            Verification::Missing(path) => bail!("blob missing at {}", path.display()),
        },
        Command::Workflow { action } => {
            let revision = match action {
                WorkflowAction::Start { revision, workflow } => {
                    chain.start_workflow(RevisionId(revision), WorkflowRefId(workflow))?
                }
                WorkflowAction::Assign { revision, workflow } => {
                    chain.assign_workflow(RevisionId(revision), WorkflowRefId(workflow))?
                }
                WorkflowAction::Approve { revision } => {
                    chain.complete_workflow(RevisionId(revision), WorkflowState::Approved)?
                }
                WorkflowAction::Reject { revision } => {
                    chain.complete_workflow(RevisionId(revision), WorkflowState::Rejected)?
                }
            };
            println!(
                "revision {}: {}",
                revision.id,
                chain.workflow_label(revision.id, true)?
            );
        }
        Command::Access { revision } => {
            for summary in chain.access_summary(RevisionId(revision))? {
                let actor = summary
                    .actor
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "anonymous".to_string());
                println!(
                    "{}  {} accesses  first {}  last {}",
                    actor,
                    summary.count,
                    summary.first_at.format("%Y-%m-%d %H:%M:%S"),
                    summary.last_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }

    Ok(())
}

/// Configuration file first, then the data directory flag on top.
fn load_config(path: Option<&Path>, data_dir: Option<&Path>) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = data_dir {
        let base = StoreConfig::with_base_dir(dir);
        config.storage_root = base.storage_root;
        config.index_path = base.index_path;
    }
    Ok(config)
}

/// Draft for the next upload: a successor of the newest visible revision, or
/// the root of a document that has no revisions yet.
fn next_draft(
    chain: &RevisionChain,
    document_id: DocumentId,
    name: &str,
    user: Option<Uuid>,
    bump: VersionBump,
) -> Result<RevisionDraft> {
    if let Some(latest) = chain.latest(document_id) {
        let mut draft = chain.clone_revision(&latest);
        draft.increase_version(bump);
        draft.name = name.to_string();
        return Ok(draft);
    }

    if let Some(newest) = chain.revisions_of(document_id).last() {
        bail!(
            "every revision of document {} is deleted; restore one (e.g. revision {}) before adding another",
            document_id,
            newest.id
        );
    }
    Ok(RevisionDraft::new(document_id, name, user))
}

fn next_document_id(chain: &RevisionChain) -> DocumentId {
    let highest = chain.documents().into_iter().map(|d| d.0).max().unwrap_or(0);
    DocumentId(highest + 1)
}

fn print_revision(revision: &Revision) {
    let source = revision
        .source_revision_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let deleted = if revision.is_deleted() { " [deleted]" } else { "" };
    println!(
        "{:>6}  v{:<6} {}  from {:<6} {:<10} {}{}",
        revision.id.0,
        revision.version.to_string(),
        revision.created_at.format("%Y-%m-%d %H:%M:%S"),
        source,
        revision.workflow.state.title(),
        revision.name,
        deleted
    );
    let tooltip = revision.tooltip();
    if !tooltip.is_empty() {
        println!("        {}", tooltip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chain() -> (tempfile::TempDir, RevisionChain) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_base_dir(dir.path());
        let chain = RevisionChain::open(&config, Collaborators::standalone(None)).unwrap();
        (dir, chain)
    }

    fn upload(chain: &RevisionChain, document_id: DocumentId, bytes: &[u8]) -> Revision {
        let draft = next_draft(chain, document_id, "notes.txt", None, VersionBump::Minor).unwrap();
        chain.commit(draft, Content::Bytes(&mut &bytes[..])).unwrap()
    }

    #[test]
    fn test_next_draft_continues_history() {
        let (_dir, chain) = make_chain();
        let first = upload(&chain, DocumentId(1), b"one");
        assert_eq!(first.source_revision_id, None);

        let second = upload(&chain, DocumentId(1), b"two");
        assert_eq!(second.source_revision_id, Some(first.id));
        assert_eq!(second.version.to_string(), "0.2");
    }

    #[test]
    fn test_next_draft_refuses_fully_deleted_document() {
        let (_dir, chain) = make_chain();
        let first = upload(&chain, DocumentId(1), b"one");
        chain.soft_delete(first.id, true).unwrap();

        let err = next_draft(&chain, DocumentId(1), "notes.txt", None, VersionBump::Minor).unwrap_err();
        assert!(err.to_string().contains("restore"));
        assert_eq!(chain.revisions_of(DocumentId(1)).len(), 1);

        chain.restore(first.id).unwrap();
        let draft = next_draft(&chain, DocumentId(1), "notes.txt", None, VersionBump::Minor).unwrap();
        assert_eq!(draft.source_revision_id, Some(first.id));
    }

    #[test]
    fn test_next_document_id() {
        let (_dir, chain) = make_chain();
        assert_eq!(next_document_id(&chain), DocumentId(1));
        upload(&chain, DocumentId(7), b"x");
        assert_eq!(next_document_id(&chain), DocumentId(8));
    }
}
