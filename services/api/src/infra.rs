use formflow::forms::{FormId, FormSchema};
use formflow::submissions::{
    Approval, ApprovalRepository, FormRepository, NotificationError, NotificationPublisher,
    RepositoryError, Submission, SubmissionFilter, SubmissionId, SubmissionRepository,
    WorkflowNotification,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local store backing forms, submissions, and approval rows.
#[derive(Default, Clone)]
pub(crate) struct InMemoryStore {
    forms: Arc<Mutex<HashMap<FormId, FormSchema>>>,
    submissions: Arc<Mutex<HashMap<SubmissionId, Submission>>>,
    approvals: Arc<Mutex<HashMap<(SubmissionId, u32), Approval>>>,
}

impl FormRepository for InMemoryStore {
    fn insert_form(&self, form: FormSchema) -> Result<FormSchema, RepositoryError> {
        let mut guard = self.forms.lock().expect("form mutex poisoned");
        if guard.contains_key(&form.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    fn update_form(&self, form: FormSchema) -> Result<FormSchema, RepositoryError> {
        let mut guard = self.forms.lock().expect("form mutex poisoned");
        if guard.contains_key(&form.id) {
            guard.insert(form.id.clone(), form.clone());
            Ok(form)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_form(&self, id: &FormId) -> Result<Option<FormSchema>, RepositoryError> {
        let guard = self.forms.lock().expect("form mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

impl SubmissionRepository for InMemoryStore {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError> {
        let mut guard = self.submissions.lock().expect("submission mutex poisoned");
        if guard.contains_key(&submission.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn update(
        &self,
        submission: Submission,
        expected_version: u64,
    ) -> Result<Submission, RepositoryError> {
        let mut guard = self.submissions.lock().expect("submission mutex poisoned");
        match guard.get(&submission.id) {
            None => Err(RepositoryError::NotFound),
            Some(stored) if stored.version != expected_version => Err(RepositoryError::StaleWrite),
            Some(_) => {
                guard.insert(submission.id.clone(), submission.clone());
                Ok(submission)
            }
        }
    }

    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        let guard = self.submissions.lock().expect("submission mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, RepositoryError> {
        let guard = self.submissions.lock().expect("submission mutex poisoned");
        Ok(guard
            .values()
            .filter(|submission| filter.matches(submission))
            .cloned()
            .collect())
    }

    fn delete(&self, id: &SubmissionId) -> Result<(), RepositoryError> {
        let mut guard = self.submissions.lock().expect("submission mutex poisoned");
        guard.remove(id).map(|_| ()).ok_or(RepositoryError::NotFound)
    }
}

impl ApprovalRepository for InMemoryStore {
    fn insert_all(&self, approvals: Vec<Approval>) -> Result<(), RepositoryError> {
        let mut guard = self.approvals.lock().expect("approval mutex poisoned");
        if approvals
            .iter()
            .any(|row| guard.contains_key(&(row.submission_id.clone(), row.step)))
        {
            return Err(RepositoryError::Conflict);
        }
        for approval in approvals {
            guard.insert((approval.submission_id.clone(), approval.step), approval);
        }
        Ok(())
    }

    fn for_submission(&self, id: &SubmissionId) -> Result<Vec<Approval>, RepositoryError> {
        let guard = self.approvals.lock().expect("approval mutex poisoned");
        let mut rows: Vec<Approval> = guard
            .values()
            .filter(|approval| &approval.submission_id == id)
            .cloned()
            .collect();
        rows.sort_by_key(|approval| approval.step);
        Ok(rows)
    }

    fn decide(&self, approval: Approval) -> Result<Approval, RepositoryError> {
        let mut guard = self.approvals.lock().expect("approval mutex poisoned");
        let key = (approval.submission_id.clone(), approval.step);
        match guard.get(&key) {
            None => Err(RepositoryError::NotFound),
            Some(stored) if !stored.status.is_open() => Err(RepositoryError::StaleWrite),
            Some(_) => {
                guard.insert(key, approval.clone());
                Ok(approval)
            }
        }
    }

    fn delete_for(&self, id: &SubmissionId) -> Result<(), RepositoryError> {
        let mut guard = self.approvals.lock().expect("approval mutex poisoned");
        guard.retain(|(submission_id, _), _| submission_id != id);
        Ok(())
    }
}

/// Logs notices instead of delivering them; a mail or chat relay replaces this in production.
#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifier {
    events: Arc<Mutex<Vec<WorkflowNotification>>>,
}

impl NotificationPublisher for InMemoryNotifier {
    fn publish(&self, notification: WorkflowNotification) -> Result<(), NotificationError> {
        info!(
            kind = ?notification.kind,
            submission = %notification.submission_id.0,
            recipient = notification.recipient.as_deref().unwrap_or("-"),
            "workflow notification"
        );
        let mut guard = self.events.lock().expect("notifier mutex poisoned");
        guard.push(notification);
        Ok(())
    }
}

#[cfg(test)]
impl InMemoryNotifier {
    pub(crate) fn events(&self) -> Vec<WorkflowNotification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}
