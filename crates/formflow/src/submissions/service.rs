use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Actor, Approval, Decision, Submission, SubmissionId, SubmissionInput, SubmissionStatus,
};
use super::export::{export_table, write_csv};
use super::lifecycle::{self, SubmissionContext, Transition, WorkflowEffect, WorkflowError};
use super::repository::{
    ApprovalRepository, FormRepository, NotificationPublisher, RepositoryError,
    SubmissionFilter, SubmissionRepository, SubmissionView,
};
use crate::forms::{
    step_count, step_label, validate_step, visible_fields, FormData, FormId, FormSchema,
    RuleWarning, SchemaViolation, StepValidation,
};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Service composing the form store, submission store, lifecycle engine, and notifier.
pub struct SubmissionService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Clock,
}

static SUBMISSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_submission_id() -> SubmissionId {
    let id = SUBMISSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SubmissionId(format!("sub-{id:06}"))
}

/// Result of publishing a form: the stored schema plus non-fatal rule warnings.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedForm {
    pub form: FormSchema,
    pub warnings: Vec<RuleWarning>,
}

/// What a renderer needs after each keystroke: prefilled data, visibility, step errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvaluation {
    pub data: FormData,
    pub step: u32,
    pub step_count: u32,
    pub step_label: String,
    pub visible_fields: Vec<String>,
    pub validation: StepValidation,
}

/// Per-submission result of a bulk operation. Failures never roll back successes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<SubmissionId>,
    pub failed: BTreeMap<String, String>,
}

impl<S, N> SubmissionService<S, N>
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self::with_clock(store, notifier, Arc::new(Utc::now))
    }

    pub fn with_clock(store: Arc<S>, notifier: Arc<N>, clock: Clock) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Check, normalize, and store a form. Locked fields are frozen once submissions exist.
    pub fn publish_form(&self, form: FormSchema) -> Result<PublishedForm, SubmissionServiceError> {
        let form = form.normalized();
        form.check_publishable()?;
        let warnings = form.lint();
        for warning in &warnings {
            warn!(form = %form.id.0, ?warning, "conditional rule will degrade at runtime");
        }

        let stored = match self.store.fetch_form(&form.id)? {
            Some(previous) => {
                let referenced = !self.store.list(&SubmissionFilter::for_form(&form.id))?.is_empty();
                if referenced {
                    FormSchema::check_locked_edits(&previous, &form)
                        .map_err(WorkflowError::from)?;
                }
                self.store.update_form(form)?
            }
            None => self.store.insert_form(form)?,
        };

        info!(form = %stored.id.0, fields = stored.fields.len(), "form published");
        Ok(PublishedForm {
            form: stored,
            warnings,
        })
    }

    pub fn form(&self, id: &FormId) -> Result<FormSchema, SubmissionServiceError> {
        Ok(self.store.fetch_form(id)?.ok_or(RepositoryError::NotFound)?)
    }

    /// Apply logic rules and report visibility and validation for one step, without storing.
    pub fn evaluate(
        &self,
        form_id: &FormId,
        data: &FormData,
        step: Option<u32>,
    ) -> Result<LiveEvaluation, SubmissionServiceError> {
        let form = self.form(form_id)?;
        let data = form.apply_logic(data);
        let total = step_count(&form);
        let step = step.unwrap_or(1).clamp(1, total);

        let visible = visible_fields(&form, step, &data)
            .into_iter()
            .map(|field| field.name.clone())
            .collect();
        let validation = validate_step(&form, step, &data);

        Ok(LiveEvaluation {
            step,
            step_count: total,
            step_label: step_label(&form, step),
            visible_fields: visible,
            validation,
            data,
        })
    }

    /// Create a draft or final submission.
    pub fn submit(
        &self,
        form_id: &FormId,
        input: SubmissionInput,
        actor: Option<Actor>,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let form = self.form(form_id)?;
        let ctx = self.context(&form, actor)?;
        let transition = lifecycle::open_submission(&form, next_submission_id(), input, &ctx)?;
        let stored = self.commit(None, transition)?;
        info!(submission = %stored.id.0, status = stored.status.label(), "submission stored");
        self.get(&stored.id)
    }

    pub fn save_draft(
        &self,
        id: &SubmissionId,
        data: FormData,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let submission = self.submission(id)?;
        let form = self.form(&submission.form_id)?;
        let next = lifecycle::save_draft(&form, &submission, data, self.now())?;
        self.store.update(next, submission.version)?;
        self.get(id)
    }

    pub fn submit_draft(
        &self,
        id: &SubmissionId,
        data: Option<FormData>,
        actor: Option<Actor>,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let submission = self.submission(id)?;
        let form = self.form(&submission.form_id)?;
        let ctx = self.context(&form, actor)?;
        let transition = lifecycle::submit_draft(&form, &submission, data, &ctx)?;
        self.commit(Some(submission.version), transition)?;
        self.get(id)
    }

    pub fn approve(
        &self,
        id: &SubmissionId,
        decision: Decision,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        self.decide(id, decision, lifecycle::approve)
    }

    pub fn reject(
        &self,
        id: &SubmissionId,
        decision: Decision,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        self.decide(id, decision, lifecycle::reject)
    }

    fn decide(
        &self,
        id: &SubmissionId,
        decision: Decision,
        transition: impl Fn(
            &Submission,
            &[Approval],
            &Decision,
            DateTime<Utc>,
        ) -> Result<Transition, WorkflowError>,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let submission = self.submission(id)?;
        let approvals = self.store.for_submission(id)?;
        let next = transition(&submission, &approvals, &decision, self.now())?;

        // A lost race on either write means another decision already landed.
        self.commit(Some(submission.version), next)
            .map_err(|err| match err {
                SubmissionServiceError::Repository(RepositoryError::StaleWrite) => {
                    WorkflowError::NoPendingApproval {
                        submission_id: id.clone(),
                        step: decision.step.unwrap_or(submission.approval_step),
                    }
                    .into()
                }
                other => other,
            })?;
        self.get(id)
    }

    pub fn archive(
        &self,
        id: &SubmissionId,
        actor: &Actor,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let submission = self.submission(id)?;
        let transition = lifecycle::archive(&submission, actor, self.now())?;
        self.commit(Some(submission.version), transition)?;
        self.get(id)
    }

    pub fn get(&self, id: &SubmissionId) -> Result<SubmissionView, SubmissionServiceError> {
        let submission = self.submission(id)?;
        let approvals = self.store.for_submission(id)?;
        Ok(SubmissionView::new(submission, approvals))
    }

    /// Submissions currently waiting on `approver`.
    pub fn awaiting(&self, approver: &str) -> Result<Vec<SubmissionView>, SubmissionServiceError> {
        let filter = SubmissionFilter {
            status: Some(SubmissionStatus::UnderReview),
            current_approver: Some(approver.to_string()),
            ..SubmissionFilter::default()
        };
        self.store
            .list(&filter)?
            .into_iter()
            .map(|submission| self.get(&submission.id))
            .collect()
    }

    pub fn bulk_archive(&self, ids: &[SubmissionId], actor: &Actor) -> BulkOutcome {
        self.bulk(ids, |id| self.archive(id, actor).map(|_| ()))
    }

    pub fn bulk_delete(&self, ids: &[SubmissionId]) -> BulkOutcome {
        self.bulk(ids, |id| {
            self.submission(id)?;
            self.store.delete(id)?;
            self.store.delete_for(id)?;
            Ok(())
        })
    }

    fn bulk(
        &self,
        ids: &[SubmissionId],
        apply: impl Fn(&SubmissionId) -> Result<(), SubmissionServiceError>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in ids {
            match apply(id) {
                Ok(()) => outcome.succeeded.push(id.clone()),
                Err(err) => {
                    warn!(submission = %id.0, error = %err, "bulk operation skipped submission");
                    outcome.failed.insert(id.0.clone(), err.to_string());
                }
            }
        }
        outcome
    }

    /// Escalate every overdue review step. Meant to be driven by an external scheduler.
    pub fn sweep_escalations(&self) -> Result<usize, SubmissionServiceError> {
        let now = self.now();
        let under_review = self
            .store
            .list(&SubmissionFilter::default().with_status(SubmissionStatus::UnderReview))?;

        let mut forms: BTreeMap<FormId, FormSchema> = BTreeMap::new();
        let mut escalated = 0;
        for submission in under_review {
            if !forms.contains_key(&submission.form_id) {
                let form = self.form(&submission.form_id)?;
                forms.insert(submission.form_id.clone(), form);
            }
            let Some(form) = forms.get(&submission.form_id) else {
                continue;
            };

            let approvals = self.store.for_submission(&submission.id)?;
            if let Some(transition) = lifecycle::escalate(form, &submission, &approvals, now) {
                match self.commit(Some(submission.version), transition) {
                    Ok(_) => escalated += 1,
                    Err(SubmissionServiceError::Repository(RepositoryError::StaleWrite)) => {
                        warn!(submission = %submission.id.0, "escalation lost a race; retrying next sweep");
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        if escalated > 0 {
            info!(escalated, "escalation sweep finished");
        }
        Ok(escalated)
    }

    pub fn export_csv<W: io::Write>(
        &self,
        form_id: &FormId,
        writer: W,
    ) -> Result<(), SubmissionServiceError> {
        let form = self.form(form_id)?;
        let mut submissions = self.store.list(&SubmissionFilter::for_form(form_id))?;
        submissions.retain(|submission| submission.status != SubmissionStatus::Draft);
        submissions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        write_csv(&export_table(&form, &submissions), writer)?;
        Ok(())
    }

    fn submission(&self, id: &SubmissionId) -> Result<Submission, SubmissionServiceError> {
        Ok(self.store.fetch(id)?.ok_or(RepositoryError::NotFound)?)
    }

    fn context(
        &self,
        form: &FormSchema,
        actor: Option<Actor>,
    ) -> Result<SubmissionContext, SubmissionServiceError> {
        let filter = SubmissionFilter::for_form(&form.id);
        let existing = self
            .store
            .list(&filter)?
            .iter()
            .filter(|submission| submission.status != SubmissionStatus::Draft)
            .count();
        Ok(SubmissionContext {
            now: self.now(),
            existing_submissions: u32::try_from(existing).unwrap_or(u32::MAX),
            actor,
        })
    }

    /// Persist a transition: the submission first (version-checked), then approval rows,
    /// then notices. Notification failures are logged, never surfaced.
    fn commit(
        &self,
        base_version: Option<u64>,
        transition: Transition,
    ) -> Result<Submission, SubmissionServiceError> {
        let Transition {
            submission,
            effects,
        } = transition;

        let stored = match base_version {
            None => self.store.insert(submission)?,
            Some(version) => self.store.update(submission, version)?,
        };

        let mut notices = Vec::new();
        for effect in effects {
            match effect {
                WorkflowEffect::CreateApprovals(rows) => self.store.insert_all(rows)?,
                WorkflowEffect::UpdateApproval(row) => {
                    self.store.decide(row)?;
                }
                WorkflowEffect::Notify(notice) => notices.push(notice),
            }
        }

        for notice in notices {
            if let Err(err) = self.notifier.publish(notice) {
                warn!(submission = %stored.id.0, error = %err, "notification not delivered");
            }
        }
        Ok(stored)
    }
}

/// Error raised by the submission service.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Schema(#[from] SchemaViolation),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("export failed: {0}")]
    Export(#[from] csv::Error),
}
