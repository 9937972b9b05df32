use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{Actor, Decision, SubmissionId, SubmissionInput};
use super::lifecycle::WorkflowError;
use super::repository::{
    ApprovalRepository, FormRepository, NotificationPublisher, RepositoryError,
    SubmissionRepository,
};
use super::service::{SubmissionService, SubmissionServiceError};
use crate::forms::{FormData, FormId, FormSchema};

/// Router builder exposing form publishing, live evaluation, and the submission workflow.
pub fn submission_router<S, N>(service: Arc<SubmissionService<S, N>>) -> Router
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route("/api/v1/forms", post(publish_handler::<S, N>))
        .route("/api/v1/forms/:form_id", get(form_handler::<S, N>))
        .route(
            "/api/v1/forms/:form_id/evaluate",
            post(evaluate_handler::<S, N>),
        )
        .route(
            "/api/v1/forms/:form_id/submissions",
            post(create_handler::<S, N>),
        )
        .route("/api/v1/forms/:form_id/export", get(export_handler::<S, N>))
        .route(
            "/api/v1/submissions/bulk/archive",
            post(bulk_archive_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/bulk/delete",
            post(bulk_delete_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:id",
            get(submission_handler::<S, N>).put(save_draft_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:id/submit",
            post(submit_draft_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:id/approve",
            post(approve_handler::<S, N>),
        )
        .route("/api/v1/submissions/:id/reject", post(reject_handler::<S, N>))
        .route(
            "/api/v1/submissions/:id/archive",
            post(archive_handler::<S, N>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EvaluateRequest {
    #[serde(default)]
    pub data: FormData,
    #[serde(default)]
    pub step: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRequest {
    #[serde(flatten)]
    pub input: SubmissionInput,
    #[serde(default)]
    pub actor: Option<Actor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SaveDraftRequest {
    #[serde(default)]
    pub data: FormData,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitDraftRequest {
    #[serde(default)]
    pub data: Option<FormData>,
    #[serde(default)]
    pub actor: Option<Actor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    pub actor: Actor,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub step: Option<u32>,
}

impl From<DecisionRequest> for Decision {
    fn from(request: DecisionRequest) -> Self {
        Decision {
            actor: request.actor,
            comments: request.comments,
            step: request.step,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArchiveRequest {
    pub actor: Actor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkRequest {
    pub ids: Vec<SubmissionId>,
    #[serde(default)]
    pub actor: Option<Actor>,
}

pub(crate) fn error_response(error: SubmissionServiceError) -> Response {
    let (status, payload) = match &error {
        SubmissionServiceError::Workflow(WorkflowError::Validation(failure)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": error.to_string(),
                "step": failure.step,
                "errors": failure.errors,
            }),
        ),
        SubmissionServiceError::Schema(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": error.to_string() }),
        ),
        SubmissionServiceError::Workflow(_)
        | SubmissionServiceError::Repository(RepositoryError::Conflict)
        | SubmissionServiceError::Repository(RepositoryError::StaleWrite) => (
            StatusCode::CONFLICT,
            json!({ "error": error.to_string() }),
        ),
        SubmissionServiceError::Repository(RepositoryError::NotFound) => (
            StatusCode::NOT_FOUND,
            json!({ "error": error.to_string() }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": error.to_string() }),
        ),
    };
    (status, axum::Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, SubmissionServiceError>,
) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn publish_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    axum::Json(form): axum::Json<FormSchema>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(StatusCode::CREATED, service.publish_form(form))
}

pub(crate) async fn form_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(form_id): Path<String>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(StatusCode::OK, service.form(&FormId(form_id)))
}

pub(crate) async fn evaluate_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(form_id): Path<String>,
    axum::Json(request): axum::Json<EvaluateRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::OK,
        service.evaluate(&FormId(form_id), &request.data, request.step),
    )
}

pub(crate) async fn create_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(form_id): Path<String>,
    axum::Json(request): axum::Json<CreateRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::CREATED,
        service.submit(&FormId(form_id), request.input, request.actor),
    )
}

pub(crate) async fn export_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(form_id): Path<String>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let mut buffer = Vec::new();
    match service.export_csv(&FormId(form_id.clone()), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{form_id}-submissions.csv\""),
                ),
            ],
            buffer,
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submission_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(id): Path<String>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(StatusCode::OK, service.get(&SubmissionId(id)))
}

pub(crate) async fn save_draft_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<SaveDraftRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::OK,
        service.save_draft(&SubmissionId(id), request.data),
    )
}

pub(crate) async fn submit_draft_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<SubmitDraftRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::OK,
        service.submit_draft(&SubmissionId(id), request.data, request.actor),
    )
}

pub(crate) async fn approve_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<DecisionRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::OK,
        service.approve(&SubmissionId(id), request.into()),
    )
}

pub(crate) async fn reject_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<DecisionRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::OK,
        service.reject(&SubmissionId(id), request.into()),
    )
}

pub(crate) async fn archive_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    Path(id): Path<String>,
    axum::Json(request): axum::Json<ArchiveRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    respond(
        StatusCode::OK,
        service.archive(&SubmissionId(id), &request.actor),
    )
}

pub(crate) async fn bulk_archive_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    axum::Json(request): axum::Json<BulkRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let Some(actor) = request.actor else {
        let payload = json!({ "error": "bulk archive requires an actor" });
        return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
    };
    let outcome = service.bulk_archive(&request.ids, &actor);
    (StatusCode::OK, axum::Json(outcome)).into_response()
}

pub(crate) async fn bulk_delete_handler<S, N>(
    State(service): State<Arc<SubmissionService<S, N>>>,
    axum::Json(request): axum::Json<BulkRequest>,
) -> Response
where
    S: FormRepository + SubmissionRepository + ApprovalRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome = service.bulk_delete(&request.ids);
    (StatusCode::OK, axum::Json(outcome)).into_response()
}
