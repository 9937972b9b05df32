//! Submission state machine.
//!
//! Every function here is pure: it takes the current submission (and its approval rows) and
//! returns the next state plus the store writes and notices the caller must carry out. All
//! preconditions are checked before anything is mutated, so an `Err` leaves no partial state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::domain::{
    Actor, Approval, ApprovalStatus, Decision, Submission, SubmissionId, SubmissionInput,
    SubmissionStatus,
};
use super::repository::{NotificationKind, WorkflowNotification};
use crate::forms::{
    first_invalid_step, step_count, FormData, FormSchema, LockedFieldEdit, StepFailure,
};

/// Workflow precondition failures. None of these leave state modified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("submission {} has no pending approval at step {step}", .submission_id.0)]
    NoPendingApproval {
        submission_id: SubmissionId,
        step: u32,
    },
    #[error("form stopped accepting submissions at {closes_at}")]
    FormClosed { closes_at: DateTime<Utc> },
    #[error("form opens for submissions at {opens_at}")]
    FormNotYetOpen { opens_at: DateTime<Utc> },
    #[error("form is not accepting submissions")]
    FormInactive,
    #[error("form has reached its limit of {limit} submissions")]
    SubmissionLimitReached { limit: u32 },
    #[error(transparent)]
    FieldLocked(#[from] LockedFieldEdit),
    #[error("cannot {action} a submission in status {}", .from.label())]
    InvalidTransition {
        from: SubmissionStatus,
        action: &'static str,
    },
    #[error("step {} failed validation", .0.step)]
    Validation(StepFailure),
}

/// Store write or outbound notice produced by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEffect {
    CreateApprovals(Vec<Approval>),
    UpdateApproval(Approval),
    Notify(WorkflowNotification),
}

/// New submission state plus the effects needed to persist it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub submission: Submission,
    pub effects: Vec<WorkflowEffect>,
}

impl Transition {
    fn new(submission: Submission) -> Self {
        Self {
            submission,
            effects: Vec::new(),
        }
    }

    fn chain(mut self, next: Transition) -> Self {
        self.submission = next.submission;
        self.effects.extend(next.effects);
        self
    }

    pub fn approvals_created(&self) -> impl Iterator<Item = &Approval> {
        self.effects.iter().flat_map(|effect| match effect {
            WorkflowEffect::CreateApprovals(rows) => rows.as_slice(),
            _ => &[] as &[Approval],
        })
    }

    pub fn approvals_updated(&self) -> impl Iterator<Item = &Approval> {
        self.effects.iter().filter_map(|effect| match effect {
            WorkflowEffect::UpdateApproval(row) => Some(row),
            _ => None,
        })
    }

    pub fn notifications(&self) -> impl Iterator<Item = &WorkflowNotification> {
        self.effects.iter().filter_map(|effect| match effect {
            WorkflowEffect::Notify(notice) => Some(notice),
            _ => None,
        })
    }
}

/// Facts about the world a submit needs but the engine does not own.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub now: DateTime<Utc>,
    /// Non-draft submissions already stored for the form.
    pub existing_submissions: u32,
    pub actor: Option<Actor>,
}

impl SubmissionContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            existing_submissions: 0,
            actor: None,
        }
    }
}

/// Submit-time guards, in order: ceiling, opening time, closing time, active flag.
pub fn check_accepting(form: &FormSchema, ctx: &SubmissionContext) -> Result<(), WorkflowError> {
    let settings = &form.settings;
    if let Some(limit) = settings.max_submissions {
        if ctx.existing_submissions >= limit {
            return Err(WorkflowError::SubmissionLimitReached { limit });
        }
    }
    if let Some(opens_at) = settings.opens_at {
        if ctx.now < opens_at {
            return Err(WorkflowError::FormNotYetOpen { opens_at });
        }
    }
    if let Some(closes_at) = settings.closes_at {
        if ctx.now > closes_at {
            return Err(WorkflowError::FormClosed { closes_at });
        }
    }
    if !settings.is_active {
        return Err(WorkflowError::FormInactive);
    }
    Ok(())
}

/// Create a submission as a draft or as a final submit, entering review when the form needs it.
pub fn open_submission(
    form: &FormSchema,
    id: SubmissionId,
    input: SubmissionInput,
    ctx: &SubmissionContext,
) -> Result<Transition, WorkflowError> {
    check_accepting(form, ctx)?;

    let data = form.apply_logic(&input.data);
    if !input.is_draft {
        ensure_complete(form, &data)?;
    }

    let default_step = if input.is_draft { 1 } else { step_count(form) };
    let mut submission = Submission {
        id,
        form_id: form.id.clone(),
        data,
        status: SubmissionStatus::Draft,
        status_history: Vec::new(),
        approval_step: 0,
        current_approver: None,
        completion_time: input.completion_time,
        step_reached: input.step_reached.unwrap_or(default_step),
        created_at: ctx.now,
        updated_at: ctx.now,
        version: 0,
    };

    let status = if input.is_draft {
        SubmissionStatus::Draft
    } else {
        SubmissionStatus::Submitted
    };
    submission.record(status, ctx.now, ctx.actor.as_ref());
    debug!(submission = %submission.id.0, status = status.label(), "submission opened");

    enter_review_if_required(form, Transition::new(submission), ctx.now)
}

/// Replace a draft's data without changing its status.
pub fn save_draft(
    form: &FormSchema,
    submission: &Submission,
    data: FormData,
    now: DateTime<Utc>,
) -> Result<Submission, WorkflowError> {
    if submission.status != SubmissionStatus::Draft {
        return Err(WorkflowError::InvalidTransition {
            from: submission.status,
            action: "edit",
        });
    }
    let mut next = submission.clone();
    next.data = form.apply_logic(&data);
    next.touch(now);
    Ok(next)
}

/// `Draft -> Submitted`, with the same guards and validation as a direct submit.
pub fn submit_draft(
    form: &FormSchema,
    submission: &Submission,
    data: Option<FormData>,
    ctx: &SubmissionContext,
) -> Result<Transition, WorkflowError> {
    if submission.status != SubmissionStatus::Draft {
        return Err(WorkflowError::InvalidTransition {
            from: submission.status,
            action: "submit",
        });
    }
    check_accepting(form, ctx)?;

    let source = data.unwrap_or_else(|| submission.data.clone());
    let data = form.apply_logic(&source);
    ensure_complete(form, &data)?;

    let mut next = submission.clone();
    next.data = data;
    next.step_reached = next.step_reached.max(step_count(form));
    next.record(SubmissionStatus::Submitted, ctx.now, ctx.actor.as_ref());

    enter_review_if_required(form, Transition::new(next), ctx.now)
}

fn ensure_complete(form: &FormSchema, data: &FormData) -> Result<(), WorkflowError> {
    match first_invalid_step(form, data) {
        Some(failure) => Err(WorkflowError::Validation(failure)),
        None => Ok(()),
    }
}

fn enter_review_if_required(
    form: &FormSchema,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if transition.submission.status == SubmissionStatus::Submitted && form.needs_review() {
        let review = begin_review(form, &transition.submission, now)?;
        return Ok(transition.chain(review));
    }
    Ok(transition)
}

/// `Submitted -> UnderReview`: one pending row per chain step, step 1 current.
pub fn begin_review(
    form: &FormSchema,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if submission.status != SubmissionStatus::Submitted || !form.needs_review() {
        return Err(WorkflowError::InvalidTransition {
            from: submission.status,
            action: "start review of",
        });
    }

    let mut chain = form.approval_chain.clone();
    chain.sort_by_key(|entry| entry.step);

    let approvals: Vec<Approval> = chain
        .iter()
        .enumerate()
        .map(|(index, entry)| Approval {
            submission_id: submission.id.clone(),
            step: entry.step,
            label: entry.label.clone(),
            approver_role: entry.approver_role.clone(),
            approver_id: entry.approver_id.clone(),
            status: ApprovalStatus::Pending,
            comments: None,
            decided_by: None,
            decided_at: None,
            activated_at: (index == 0).then_some(now),
            escalated_at: None,
        })
        .collect();

    let Some(first) = chain.first() else {
        return Err(WorkflowError::InvalidTransition {
            from: submission.status,
            action: "start review of",
        });
    };
    let mut next = submission.clone();
    next.approval_step = first.step;
    next.current_approver = first.approver();
    next.record(SubmissionStatus::UnderReview, now, None);

    let notice = notification(
        NotificationKind::ReviewRequested,
        &next,
        next.current_approver.clone(),
        [("step", first.label.clone())],
    );

    Ok(Transition {
        submission: next,
        effects: vec![
            WorkflowEffect::CreateApprovals(approvals),
            WorkflowEffect::Notify(notice),
        ],
    })
}

fn open_row<'a>(
    submission: &Submission,
    approvals: &'a [Approval],
    decision: &Decision,
) -> Result<&'a Approval, WorkflowError> {
    let step = decision.step.unwrap_or(submission.approval_step);
    let missing = || WorkflowError::NoPendingApproval {
        submission_id: submission.id.clone(),
        step,
    };

    if submission.status != SubmissionStatus::UnderReview || step != submission.approval_step {
        return Err(missing());
    }
    approvals
        .iter()
        .find(|row| row.step == step && row.status.is_open())
        .ok_or_else(missing)
}

fn decided(
    row: &Approval,
    status: ApprovalStatus,
    decision: &Decision,
    now: DateTime<Utc>,
) -> Approval {
    let mut row = row.clone();
    row.status = status;
    row.decided_by = Some(decision.actor.id.clone());
    row.decided_at = Some(now);
    row.comments = decision.comments.clone();
    row
}

/// Approve the current step, advancing to the next pending step or finishing as `Approved`.
pub fn approve(
    submission: &Submission,
    approvals: &[Approval],
    decision: &Decision,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    let current = open_row(submission, approvals, decision)?;
    let mut effects = vec![WorkflowEffect::UpdateApproval(decided(
        current,
        ApprovalStatus::Approved,
        decision,
        now,
    ))];

    let following = approvals
        .iter()
        .filter(|row| row.step > current.step && row.status == ApprovalStatus::Pending)
        .min_by_key(|row| row.step);

    let mut next = submission.clone();
    match following {
        Some(row) => {
            let mut activated = row.clone();
            activated.activated_at = Some(now);
            next.approval_step = row.step;
            next.current_approver = row
                .approver_id
                .clone()
                .or_else(|| row.approver_role.clone());
            next.record(SubmissionStatus::UnderReview, now, Some(&decision.actor));
            effects.push(WorkflowEffect::UpdateApproval(activated));
            effects.push(WorkflowEffect::Notify(notification(
                NotificationKind::ReviewRequested,
                &next,
                next.current_approver.clone(),
                [("step", row.label.clone())],
            )));
        }
        None => {
            next.current_approver = None;
            next.record(SubmissionStatus::Approved, now, Some(&decision.actor));
            effects.push(WorkflowEffect::Notify(notification(
                NotificationKind::SubmissionApproved,
                &next,
                None,
                [("approved_by", decision.actor.id.clone())],
            )));
        }
    }

    debug!(
        submission = %next.id.0,
        step = current.step,
        status = next.status.label(),
        "approval recorded"
    );
    Ok(Transition {
        submission: next,
        effects,
    })
}

/// Reject the current step. Remaining steps are skipped and the submission is final.
pub fn reject(
    submission: &Submission,
    approvals: &[Approval],
    decision: &Decision,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    let current = open_row(submission, approvals, decision)?;

    let mut next = submission.clone();
    next.current_approver = None;
    next.record(SubmissionStatus::Rejected, now, Some(&decision.actor));

    let mut details = vec![("rejected_by", decision.actor.id.clone())];
    if let Some(comments) = &decision.comments {
        details.push(("comments", comments.clone()));
    }
    let notice = notification(NotificationKind::SubmissionRejected, &next, None, details);

    debug!(submission = %next.id.0, step = current.step, "submission rejected");
    Ok(Transition {
        submission: next,
        effects: vec![
            WorkflowEffect::UpdateApproval(decided(
                current,
                ApprovalStatus::Rejected,
                decision,
                now,
            )),
            WorkflowEffect::Notify(notice),
        ],
    })
}

/// Administrative archive from any state. Archived submissions have no outgoing transition.
pub fn archive(
    submission: &Submission,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if submission.status == SubmissionStatus::Archived {
        return Err(WorkflowError::InvalidTransition {
            from: submission.status,
            action: "archive",
        });
    }
    let mut next = submission.clone();
    next.current_approver = None;
    next.record(SubmissionStatus::Archived, now, Some(actor));
    Ok(Transition::new(next))
}

/// Hand an overdue step to its escalation target. `None` when nothing is due.
///
/// The caller's scheduler decides how often to ask; the engine only compares timestamps.
pub fn escalate(
    form: &FormSchema,
    submission: &Submission,
    approvals: &[Approval],
    now: DateTime<Utc>,
) -> Option<Transition> {
    if submission.status != SubmissionStatus::UnderReview {
        return None;
    }
    let rule = form
        .approval_step(submission.approval_step)?
        .escalation
        .as_ref()?;
    let row = approvals.iter().find(|row| {
        row.step == submission.approval_step && row.status == ApprovalStatus::Pending
    })?;
    let due = row
        .activated_at?
        .checked_add_signed(Duration::hours(i64::from(rule.after_hours)))?;
    if now < due {
        return None;
    }

    let mut escalated = row.clone();
    escalated.status = ApprovalStatus::Escalated;
    escalated.escalated_at = Some(now);

    let mut next = submission.clone();
    if let Some(target) = rule.target() {
        next.current_approver = Some(target);
    }
    next.touch(now);

    let notice = notification(
        NotificationKind::ApprovalEscalated,
        &next,
        next.current_approver.clone(),
        [("step", row.label.clone())],
    );
    Some(Transition {
        submission: next,
        effects: vec![
            WorkflowEffect::UpdateApproval(escalated),
            WorkflowEffect::Notify(notice),
        ],
    })
}

fn notification<'a>(
    kind: NotificationKind,
    submission: &Submission,
    recipient: Option<String>,
    details: impl IntoIterator<Item = (&'a str, String)>,
) -> WorkflowNotification {
    let mut map: BTreeMap<String, String> = details
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    map.insert("form_id".to_string(), submission.form_id.0.clone());
    WorkflowNotification {
        kind,
        submission_id: submission.id.clone(),
        recipient,
        details: map,
    }
}
