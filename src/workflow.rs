//! Approval workflow state of a revision
//!
//! A cycle is opened either by `start` (state `WaitingForApproval`) or by a
//! direct `assign` (state `Assigned`); both record who opened it and when and
//! may be called in any state. The external [`WorkflowEngine`] decides who
//! approves next and reports the outcome, which is recorded here with
//! [`complete`] and only accepted while a cycle is open.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collab::UserId;
use crate::revision::{Revision, RevisionId};

/// Identifier of a workflow definition in the external engine.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct WorkflowRefId(pub u64);

impl fmt::Display for WorkflowRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WorkflowState {
    #[default]
    None,
    WaitingForApproval,
    Assigned,
    Approved,
    Rejected,
}

impl WorkflowState {
    /// A cycle is open and waiting on approvers.
    pub fn is_pending(&self) -> bool {
        matches!(self, WorkflowState::WaitingForApproval | WorkflowState::Assigned)
    }

    pub fn is_decided(&self) -> bool {
        matches!(self, WorkflowState::Approved | WorkflowState::Rejected)
    }

    pub fn title(&self) -> &'static str {
        match self {
            WorkflowState::None => "None",
            WorkflowState::WaitingForApproval => "Waiting for approval",
            WorkflowState::Assigned => "Assigned",
            WorkflowState::Approved => "Approved",
            WorkflowState::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Workflow fields carried by every revision.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WorkflowInfo {
    pub state: WorkflowState,
    pub workflow_ref_id: Option<WorkflowRefId>,
    pub started_by: Option<UserId>,
    pub started_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<UserId>,
    pub assigned_at: Option<DateTime<Utc>>,
}

/// The most recent action taken on one of a revision's workflow steps.
#[derive(Clone, Debug, PartialEq)]
pub struct StepAction {
    pub author: UserId,
    pub at: DateTime<Utc>,
}

/// External engine that owns workflow definitions and step assignments.
pub trait WorkflowEngine: Send + Sync {
    /// Display name of a workflow definition.
    fn name(&self, workflow: WorkflowRefId) -> Option<String>;

    /// Users expected to act next on this revision, in order.
    fn next_approvers(&self, workflow: WorkflowRefId, revision: RevisionId) -> Vec<UserId>;

    fn last_step_action(&self, revision: RevisionId) -> Option<StepAction>;

    /// Called when a revision is directly assigned to a workflow.
    fn assign(&self, workflow: WorkflowRefId, revision: RevisionId);
}

/// Engine with no definitions and no approvers.
pub struct NoWorkflowEngine;

impl WorkflowEngine for NoWorkflowEngine {
    fn name(&self, _workflow: WorkflowRefId) -> Option<String> {
        None
    }

    fn next_approvers(&self, _workflow: WorkflowRefId, _revision: RevisionId) -> Vec<UserId> {
        Vec::new()
    }

    fn last_step_action(&self, _revision: RevisionId) -> Option<StepAction> {
        None
    }

    fn assign(&self, _workflow: WorkflowRefId, _revision: RevisionId) {}
}

#[derive(Error, Debug, PartialEq)]
pub enum WorkflowError {
    #[error("Cannot move workflow from {from} to {to}")]
    InvalidTransition { from: WorkflowState, to: WorkflowState },
}

/// Open a cycle with `start`. Any current state is replaced, so an assigned
/// or already decided revision can be sent round again.
pub fn start(revision: &mut Revision, workflow: WorkflowRefId, actor: Option<UserId>, now: DateTime<Utc>) {
    let info = &mut revision.workflow;
    info.state = WorkflowState::WaitingForApproval;
    info.workflow_ref_id = Some(workflow);
    info.started_by = actor;
    info.started_at = Some(now);
}

/// Open a cycle by direct assignment.
pub fn assign(revision: &mut Revision, workflow: WorkflowRefId, actor: Option<UserId>, now: DateTime<Utc>) {
    let info = &mut revision.workflow;
    info.state = WorkflowState::Assigned;
    info.workflow_ref_id = Some(workflow);
    info.assigned_by = actor;
    info.assigned_at = Some(now);
}

/// Record the engine's decision on an open cycle.
pub fn complete(revision: &mut Revision, outcome: WorkflowState) -> Result<(), WorkflowError> {
    let from = revision.workflow.state;
    if !from.is_pending() || !outcome.is_decided() {
        return Err(WorkflowError::InvalidTransition { from, to: outcome });
    }
    revision.workflow.state = outcome;
    Ok(())
}

/// Who is expected to act next; empty unless a cycle is open.
pub fn next_approvers(revision: &Revision, engine: &dyn WorkflowEngine) -> Vec<UserId> {
    match revision.workflow.workflow_ref_id {
        Some(workflow) if revision.workflow.state.is_pending() => {
            engine.next_approvers(workflow, revision.id)
        }
        _ => Vec::new(),
    }
}

/// The last recorded step action once a cycle has been decided.
pub fn last_action_author(revision: &Revision, engine: &dyn WorkflowEngine) -> Option<StepAction> {
    if revision.workflow.workflow_ref_id.is_none() || !revision.workflow.state.is_decided() {
        return None;
    }
    engine.last_step_action(revision.id)
}

/// "<workflow name> - <state>" when `with_name` and the engine knows the name,
/// otherwise just the state title.
pub fn label(revision: &Revision, engine: &dyn WorkflowEngine, with_name: bool) -> String {
    let state = revision.workflow.state.title();
    let name = if with_name {
        revision.workflow.workflow_ref_id.and_then(|w| engine.name(w))
    } else {
        None
    };
    match name {
        Some(name) => format!("{} - {}", name, state),
        None => state.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::DocumentId;
    use uuid::Uuid;

    struct FakeEngine {
        approver: UserId,
        actor: UserId,
    }

    impl WorkflowEngine for FakeEngine {
        fn name(&self, workflow: WorkflowRefId) -> Option<String> {
            Some(format!("Review #{}", workflow))
        }

        fn next_approvers(&self, _workflow: WorkflowRefId, _revision: RevisionId) -> Vec<UserId> {
            vec![self.approver]
        }

        fn last_step_action(&self, _revision: RevisionId) -> Option<StepAction> {
            Some(StepAction {
                author: self.actor,
                at: Utc::now(),
            })
        }

        fn assign(&self, _workflow: WorkflowRefId, _revision: RevisionId) {}
    }

    fn make_revision() -> Revision {
        Revision::sample(RevisionId(1), DocumentId(1), "blob", Utc::now())
    }

    #[test]
    fn test_start_records_starter() {
        let mut rev = make_revision();
        let user = Uuid::new_v4();
        let now = Utc::now();
        start(&mut rev, WorkflowRefId(4), Some(user), now);

        assert_eq!(rev.workflow.state, WorkflowState::WaitingForApproval);
        assert_eq!(rev.workflow.workflow_ref_id, Some(WorkflowRefId(4)));
        assert_eq!(rev.workflow.started_by, Some(user));
        assert_eq!(rev.workflow.started_at, Some(now));
        assert!(rev.workflow.assigned_by.is_none());
    }

    #[test]
    fn test_assign_records_assigner() {
        let mut rev = make_revision();
        let user = Uuid::new_v4();
        assign(&mut rev, WorkflowRefId(4), Some(user), Utc::now());

        assert_eq!(rev.workflow.state, WorkflowState::Assigned);
        assert_eq!(rev.workflow.assigned_by, Some(user));
        assert!(rev.workflow.started_at.is_none());
    }

    #[test]
    fn test_transitions() {
        let mut rev = make_revision();
        assert!(complete(&mut rev, WorkflowState::Approved).is_err());

        start(&mut rev, WorkflowRefId(1), None, Utc::now());
        assert!(complete(&mut rev, WorkflowState::Assigned).is_err());

        complete(&mut rev, WorkflowState::Rejected).unwrap();
        assign(&mut rev, WorkflowRefId(1), None, Utc::now());
        complete(&mut rev, WorkflowState::Approved).unwrap();

        let err = complete(&mut rev, WorkflowState::Rejected).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                from: WorkflowState::Approved,
                to: WorkflowState::Rejected
            }
        );

        // A decided revision can be opened again
        start(&mut rev, WorkflowRefId(2), None, Utc::now());
        assert_eq!(rev.workflow.state, WorkflowState::WaitingForApproval);
        assert_eq!(rev.workflow.workflow_ref_id, Some(WorkflowRefId(2)));
    }

    #[test]
    fn test_assign_then_start() {
        let mut rev = make_revision();
        let assigner = Uuid::new_v4();
        let starter = Uuid::new_v4();

        assign(&mut rev, WorkflowRefId(5), Some(assigner), Utc::now());
        start(&mut rev, WorkflowRefId(5), Some(starter), Utc::now());

        assert_eq!(rev.workflow.state, WorkflowState::WaitingForApproval);
        assert_eq!(rev.workflow.assigned_by, Some(assigner));
        assert_eq!(rev.workflow.started_by, Some(starter));
        assert!(rev.workflow.assigned_at.is_some());
        assert!(rev.workflow.started_at.is_some());
    }

    #[test]
    fn test_engine_queries_follow_state() {
        let engine = FakeEngine {
            approver: Uuid::new_v4(),
            actor: Uuid::new_v4(),
        };
        let mut rev = make_revision();
        assert!(next_approvers(&rev, &engine).is_empty());
        assert!(last_action_author(&rev, &engine).is_none());

        start(&mut rev, WorkflowRefId(2), None, Utc::now());
        assert_eq!(next_approvers(&rev, &engine), vec![engine.approver]);
        assert!(last_action_author(&rev, &engine).is_none());

        complete(&mut rev, WorkflowState::Approved).unwrap();
        assert!(next_approvers(&rev, &engine).is_empty());
        assert_eq!(last_action_author(&rev, &engine).unwrap().author, engine.actor);
    }

    #[test]
    fn test_label() {
        let engine = FakeEngine {
            approver: Uuid::new_v4(),
            actor: Uuid::new_v4(),
        };
        let mut rev = make_revision();
        assert_eq!(label(&rev, &engine, true), "None");

        start(&mut rev, WorkflowRefId(7), None, Utc::now());
        assert_eq!(label(&rev, &engine, true), "Review #7 - Waiting for approval");
        assert_eq!(label(&rev, &engine, false), "Waiting for approval");
        assert_eq!(label(&rev, &NoWorkflowEngine, true), "Waiting for approval");
    }
}
