use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::forms::{
    ApprovalStep, EscalationRule, FieldSchema, FieldType, FieldValidations, FormData, FormId,
    FormSchema, SubmissionSettings,
};
use crate::submissions::domain::{Approval, Submission, SubmissionId};
use crate::submissions::repository::{
    ApprovalRepository, FormRepository, NotificationError, NotificationPublisher,
    RepositoryError, SubmissionFilter, SubmissionRepository, WorkflowNotification,
};
use crate::submissions::{submission_router, SubmissionService};

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).single().expect("valid time")
}

pub(super) fn hours_later(hours: i64) -> DateTime<Utc> {
    start() + Duration::hours(hours)
}

/// Single-step admission form: a required `age` of at least 5.
pub(super) fn admission_form() -> FormSchema {
    FormSchema {
        id: FormId("admission".to_string()),
        title: "Admission".to_string(),
        fields: vec![
            FieldSchema::new("student", "Student name", FieldType::Text)
                .required()
                .on_step(1, 1),
            FieldSchema::new("age", "Age", FieldType::Number)
                .required()
                .on_step(1, 2)
                .with_validations(FieldValidations {
                    min: Some(5.0),
                    ..FieldValidations::default()
                }),
        ],
        logic_rules: Vec::new(),
        is_multi_step: false,
        step_labels: Vec::new(),
        requires_approval: false,
        approval_chain: Vec::new(),
        settings: SubmissionSettings::default(),
    }
}

/// Admission form routed through HOD then PRINCIPAL; the HOD step escalates after 48 hours.
pub(super) fn reviewed_form() -> FormSchema {
    let mut hod = ApprovalStep::for_role(1, "HOD", "Head of department");
    hod.escalation = Some(EscalationRule {
        after_hours: 48,
        escalate_to_role: Some("VICE_PRINCIPAL".to_string()),
        escalate_to_id: None,
    });

    FormSchema {
        id: FormId("reviewed".to_string()),
        requires_approval: true,
        approval_chain: vec![
            ApprovalStep::for_role(2, "PRINCIPAL", "Principal"),
            hod,
        ],
        ..admission_form()
    }
}

pub(super) fn data(age: Value) -> FormData {
    let mut data = FormData::new();
    data.insert("student".to_string(), json!("Ada"));
    data.insert("age".to_string(), age);
    data
}

pub(super) type TestService = SubmissionService<MemoryStore, MemoryNotifier>;

pub(super) fn build_service() -> (TestService, Arc<MemoryStore>, Arc<MemoryNotifier>) {
    build_service_at(Arc::new(Mutex::new(start())))
}

/// Service whose clock reads the shared cell, so tests can move time forward.
pub(super) fn build_service_at(
    now: Arc<Mutex<DateTime<Utc>>>,
) -> (TestService, Arc<MemoryStore>, Arc<MemoryNotifier>) {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let clock = Arc::new(move || *now.lock().expect("clock mutex poisoned"));
    let service = SubmissionService::with_clock(store.clone(), notifier.clone(), clock);
    (service, store, notifier)
}

#[derive(Default, Clone)]
pub(super) struct MemoryStore {
    forms: Arc<Mutex<HashMap<FormId, FormSchema>>>,
    submissions: Arc<Mutex<HashMap<SubmissionId, Submission>>>,
    approvals: Arc<Mutex<HashMap<(SubmissionId, u32), Approval>>>,
}

impl FormRepository for MemoryStore {
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
        guard.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    fn fetch_form(&self, id: &FormId) -> Result<Option<FormSchema>, RepositoryError> {
        let guard = self.forms.lock().expect("form mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

impl SubmissionRepository for MemoryStore {
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

impl ApprovalRepository for MemoryStore {
    fn insert_all(&self, approvals: Vec<Approval>) -> Result<(), RepositoryError> {
        let mut guard = self.approvals.lock().expect("approval mutex poisoned");
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

#[derive(Default, Clone)]
pub(super) struct MemoryNotifier {
    events: Arc<Mutex<Vec<WorkflowNotification>>>,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<WorkflowNotification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn publish(&self, notification: WorkflowNotification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct OfflineNotifier;

impl NotificationPublisher for OfflineNotifier {
    fn publish(&self, _notification: WorkflowNotification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay down".to_string()))
    }
}

pub(super) struct UnavailableStore;

impl FormRepository for UnavailableStore {
    fn insert_form(&self, _form: FormSchema) -> Result<FormSchema, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_form(&self, _form: FormSchema) -> Result<FormSchema, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_form(&self, _id: &FormId) -> Result<Option<FormSchema>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl SubmissionRepository for UnavailableStore {
    fn insert(&self, _submission: Submission) -> Result<Submission, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(
        &self,
        _submission: Submission,
        _expected_version: u64,
    ) -> Result<Submission, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _filter: &SubmissionFilter) -> Result<Vec<Submission>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn delete(&self, _id: &SubmissionId) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl ApprovalRepository for UnavailableStore {
    fn insert_all(&self, _approvals: Vec<Approval>) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn for_submission(&self, _id: &SubmissionId) -> Result<Vec<Approval>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn decide(&self, _approval: Approval) -> Result<Approval, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn delete_for(&self, _id: &SubmissionId) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn router_with_service(service: TestService) -> axum::Router {
    submission_router(Arc::new(service))
}
