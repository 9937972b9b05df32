use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forms::{FormData, FormId};

/// Identifier wrapper for stored submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

/// Who performed a transition. Identity resolution happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
        }
    }

    pub fn with_role(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Some(role.into()),
        }
    }
}

/// Lifecycle state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Archived,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Draft => "draft",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Archived => "archived",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Approved | SubmissionStatus::Rejected | SubmissionStatus::Archived
        )
    }
}

/// One entry in the append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: SubmissionStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub form_id: FormId,
    pub data: FormData,
    pub status: SubmissionStatus,
    pub status_history: Vec<StatusChange>,
    /// 1-based index of the current approval step; 0 before review starts.
    pub approval_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_approver: Option<String>,
    /// Seconds the submitter spent filling the form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<u32>,
    pub step_reached: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every mutation so stores can reject stale writes.
    pub version: u64,
}

impl Submission {
    pub(crate) fn record(
        &mut self,
        status: SubmissionStatus,
        at: DateTime<Utc>,
        by: Option<&Actor>,
    ) {
        self.status = status;
        self.status_history.push(StatusChange {
            status,
            at,
            by: by.map(|actor| actor.id.clone()),
        });
        self.touch(at);
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.version += 1;
    }

    /// Time of the first non-draft status, used as the submission timestamp.
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.status_history
            .iter()
            .find(|change| change.status == SubmissionStatus::Submitted)
            .map(|change| change.at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl ApprovalStatus {
    /// Pending and escalated rows still await a decision.
    pub const fn is_open(self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Escalated)
    }
}

/// Decision record for one `(submission, step)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub submission_id: SubmissionId,
    pub step: u32,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// When this step became the current one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

/// Caller-provided input for a new submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionInput {
    #[serde(default)]
    pub data: FormData,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_reached: Option<u32>,
}

/// Approve/reject payload recorded on the approval row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub actor: Actor,
    pub comments: Option<String>,
    /// Step the caller believes is current. A stale value fails instead of deciding a later step.
    pub step: Option<u32>,
}

impl Decision {
    pub fn by(actor: Actor) -> Self {
        Self {
            actor,
            comments: None,
            step: None,
        }
    }

    pub fn at_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}
