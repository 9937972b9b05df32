use chrono::{DateTime, Duration, TimeZone, Utc};
use formflow::forms::{FormData, FormSchema};
use formflow::submissions::lifecycle::{self, SubmissionContext, Transition};
use formflow::submissions::{
    Actor, Approval, ApprovalStatus, Decision, SubmissionId, SubmissionInput, SubmissionStatus,
    WorkflowError,
};
use serde_json::json;

fn enrollment_form() -> FormSchema {
    let raw = include_str!("fixtures/enrollment_form.json");
    serde_json::from_str::<FormSchema>(raw)
        .expect("fixture parses")
        .normalized()
}

fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0)
        .single()
        .expect("valid time")
}

fn complete_data() -> FormData {
    [
        ("student_name", json!("Ada Lovelace")),
        ("age", json!(10)),
        ("parent_email", json!("parent@example.org")),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

fn rows_after(mut rows: Vec<Approval>, transition: &Transition) -> Vec<Approval> {
    rows.extend(transition.approvals_created().cloned());
    for updated in transition.approvals_updated() {
        if let Some(row) = rows.iter_mut().find(|row| row.step == updated.step) {
            *row = updated.clone();
        }
    }
    rows
}

#[test]
fn enrollment_runs_through_escalation_to_approval() {
    let form = enrollment_form();
    let ctx = SubmissionContext {
        now: opened_at(),
        existing_submissions: 3,
        actor: Some(Actor::new("parent-7")),
    };
    let input = SubmissionInput {
        data: complete_data(),
        completion_time: Some(310),
        ..SubmissionInput::default()
    };

    let opened = lifecycle::open_submission(&form, SubmissionId("sub-e2e".into()), input, &ctx)
        .expect("complete data submits");
    let rows = rows_after(Vec::new(), &opened);
    assert_eq!(opened.submission.status, SubmissionStatus::UnderReview);
    assert_eq!(opened.submission.data.get("country"), Some(&json!("IN")));
    assert_eq!(opened.submission.step_reached, 2);

    let overdue = opened_at() + Duration::hours(49);
    let escalated = lifecycle::escalate(&form, &opened.submission, &rows, overdue)
        .expect("hod step is overdue");
    let rows = rows_after(rows, &escalated);
    assert_eq!(rows[0].status, ApprovalStatus::Escalated);
    assert_eq!(
        escalated.submission.current_approver.as_deref(),
        Some("VICE_PRINCIPAL")
    );

    let vp = Decision::by(Actor::with_role("u-vp", "VICE_PRINCIPAL")).at_step(1);
    let advanced = lifecycle::approve(&escalated.submission, &rows, &vp, overdue)
        .expect("escalation target decides");
    let rows = rows_after(rows, &advanced);
    assert_eq!(advanced.submission.current_approver.as_deref(), Some("PRINCIPAL"));

    let principal = Decision::by(Actor::with_role("u-p", "PRINCIPAL")).at_step(2);
    let done = lifecycle::approve(&advanced.submission, &rows, &principal, overdue)
        .expect("principal decides");
    let rows = rows_after(rows, &done);

    assert_eq!(done.submission.status, SubmissionStatus::Approved);
    assert!(rows.iter().all(|row| row.status == ApprovalStatus::Approved));
    assert_eq!(done.submission.status_history.len(), 4);
    assert_eq!(done.submission.submitted_at(), Some(opened_at()));
}

#[test]
fn incomplete_enrollment_reports_the_failing_step() {
    let form = enrollment_form();
    let mut data = complete_data();
    data.remove("parent_email");

    let ctx = SubmissionContext::at(opened_at());
    let input = SubmissionInput {
        data,
        ..SubmissionInput::default()
    };
    match lifecycle::open_submission(&form, SubmissionId("sub-bad".into()), input, &ctx) {
        Err(WorkflowError::Validation(failure)) => {
            assert_eq!(failure.step, 2);
            assert!(failure.errors.contains_key("parent_email"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn full_form_refuses_new_submissions() {
    let form = enrollment_form();
    let ctx = SubmissionContext {
        now: opened_at(),
        existing_submissions: 200,
        actor: None,
    };
    let input = SubmissionInput {
        data: complete_data(),
        ..SubmissionInput::default()
    };
    match lifecycle::open_submission(&form, SubmissionId("sub-late".into()), input, &ctx) {
        Err(WorkflowError::SubmissionLimitReached { limit }) => assert_eq!(limit, 200),
        other => panic!("expected limit reached, got {other:?}"),
    }
}
