use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{Approval, ApprovalStatus, Submission, SubmissionId, SubmissionStatus};
use crate::forms::{FormId, FormSchema};

/// Storage for published form definitions.
pub trait FormRepository: Send + Sync {
    fn insert_form(&self, form: FormSchema) -> Result<FormSchema, RepositoryError>;
    fn update_form(&self, form: FormSchema) -> Result<FormSchema, RepositoryError>;
    fn fetch_form(&self, id: &FormId) -> Result<Option<FormSchema>, RepositoryError>;
}

/// Storage for submissions. `update` must reject a write whose base version is stale.
pub trait SubmissionRepository: Send + Sync {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError>;
    fn update(
        &self,
        submission: Submission,
        expected_version: u64,
    ) -> Result<Submission, RepositoryError>;
    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError>;
    fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, RepositoryError>;
    fn delete(&self, id: &SubmissionId) -> Result<(), RepositoryError>;
}

/// Storage for approval rows keyed by `(submission, step)`.
///
/// `decide` is a compare-and-set: it only replaces a row that is still open, so two
/// approvers racing on one step cannot both succeed.
pub trait ApprovalRepository: Send + Sync {
    fn insert_all(&self, approvals: Vec<Approval>) -> Result<(), RepositoryError>;
    fn for_submission(&self, id: &SubmissionId) -> Result<Vec<Approval>, RepositoryError>;
    fn decide(&self, approval: Approval) -> Result<Approval, RepositoryError>;
    fn delete_for(&self, id: &SubmissionId) -> Result<(), RepositoryError>;
}

/// Narrowing criteria for `SubmissionRepository::list`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<FormId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_approver: Option<String>,
}

impl SubmissionFilter {
    pub fn for_form(form_id: &FormId) -> Self {
        Self {
            form_id: Some(form_id.clone()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: SubmissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, submission: &Submission) -> bool {
        self.form_id
            .as_ref()
            .map_or(true, |form_id| &submission.form_id == form_id)
            && self
                .status
                .map_or(true, |status| submission.status == status)
            && self.current_approver.as_ref().map_or(true, |approver| {
                submission.current_approver.as_ref() == Some(approver)
            })
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record was modified concurrently")]
    StaleWrite,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for approver and submitter notices (e-mail, chat, etc.).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: WorkflowNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReviewRequested,
    ApprovalEscalated,
    SubmissionApproved,
    SubmissionRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNotification {
    pub kind: NotificationKind,
    pub submission_id: SubmissionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Read model returned to API callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub submission: Submission,
    pub status: &'static str,
    pub approvals: Vec<Approval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_step_label: Option<String>,
}

impl SubmissionView {
    pub fn new(submission: Submission, mut approvals: Vec<Approval>) -> Self {
        approvals.sort_by_key(|approval| approval.step);
        let pending_step_label = approvals
            .iter()
            .find(|approval| {
                approval.step == submission.approval_step
                    && approval.status.is_open()
                    && submission.status == SubmissionStatus::UnderReview
            })
            .map(|approval| approval.label.clone());

        Self {
            status: submission.status.label(),
            submission,
            approvals,
            pending_step_label,
        }
    }

    pub fn decided_steps(&self) -> usize {
        self.approvals
            .iter()
            .filter(|approval| {
                matches!(
                    approval.status,
                    ApprovalStatus::Approved | ApprovalStatus::Rejected
                )
            })
            .count()
    }
}
