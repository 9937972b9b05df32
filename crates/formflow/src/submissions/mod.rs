//! Submission records, the status/approval state machine, and the service and HTTP surface
//! that drive it over pluggable stores.

pub mod domain;
pub mod export;
pub mod lifecycle;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    Actor, Approval, ApprovalStatus, Decision, StatusChange, Submission, SubmissionId,
    SubmissionInput, SubmissionStatus,
};
pub use export::{export_table, write_csv, ExportTable};
pub use lifecycle::{SubmissionContext, Transition, WorkflowEffect, WorkflowError};
pub use repository::{
    ApprovalRepository, FormRepository, NotificationError, NotificationKind,
    NotificationPublisher, RepositoryError, SubmissionFilter, SubmissionRepository,
    SubmissionView, WorkflowNotification,
};
pub use router::submission_router;
pub use service::{
    BulkOutcome, LiveEvaluation, PublishedForm, SubmissionService, SubmissionServiceError,
};
