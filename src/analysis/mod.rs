use axum::{
    Json, Router,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;
use uuid::Uuid;

pub mod dispatcher;
pub mod normalizer;
pub mod reaper;
pub mod reconciler;
pub mod watch;

use crate::{
    store::{AnalysisStatus, AnalysisStore, NewSubmission, SubmissionRecord, WeakTopicRecord},
    web::{ApiMessage, AppState, json_error},
};

use self::reconciler::AnalysisOutcome;

pub fn router<S: AnalysisStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/api/analysis/submissions", post(create_submission::<S>))
        .route("/api/analysis/submissions/:id", get(submission_status::<S>))
        .route(
            "/api/analysis/submissions/:id/analyze",
            post(trigger_analysis::<S>),
        )
        .route("/api/analysis/submissions/:id/wait", get(await_status::<S>))
        .route(
            "/api/analysis/submissions/:id/weak-topics",
            get(list_weak_topics::<S>),
        )
        .route(
            "/api/analysis/submissions/:id/reapply",
            post(reapply_result::<S>),
        )
        .route("/api/webhook/analysis", post(receive_webhook::<S>))
}

/// Result report as delivered by the worker, over the webhook or inline in
/// the dispatch reply. Everything except the submission id is optional and
/// independently defaultable; key spellings are tolerated in both camel and
/// snake case.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    #[serde(default, alias = "submission_id")]
    pub submission_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub feedback: Option<Value>,
    #[serde(default, alias = "weak_topics")]
    pub weak_topics: Option<Value>,
}

impl WorkerReport {
    /// Whether this report carries anything worth reconciling.
    pub fn has_result(&self) -> bool {
        self.feedback.is_some()
            || matches!(&self.weak_topics, Some(Value::Array(items)) if !items.is_empty())
    }
}

/// Turn a worker report into one reconcilable outcome.
///
/// When a report carries both an explicit `weakTopics` array and a
/// `feedback` blob that itself normalizes to topics, the explicit array
/// wins and the blob is only retained for display; normalizing both would
/// duplicate the same run's topics.
pub fn resolve_outcome(report: &WorkerReport) -> AnalysisOutcome {
    let topics = match &report.weak_topics {
        Some(Value::Array(items)) if !items.is_empty() => normalizer::normalize_topic_list(items),
        _ => normalizer::normalize_feedback(report.feedback.as_ref()),
    };

    AnalysisOutcome {
        status: terminal_status(report.status.as_deref()),
        topics,
        feedback: report.feedback.as_ref().map(normalizer::retained_feedback),
    }
}

fn terminal_status(reported: Option<&str>) -> AnalysisStatus {
    match reported {
        Some("failed") => AnalysisStatus::Failed,
        _ => AnalysisStatus::Completed,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubmissionRequest {
    assignment_id: Uuid,
    student_id: Uuid,
    #[serde(default)]
    content_text: Option<String>,
    #[serde(default)]
    file_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionView {
    submission_id: Uuid,
    assignment_id: Uuid,
    student_id: Uuid,
    analysis_status: AnalysisStatus,
    ai_feedback: Option<Value>,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SubmissionRecord> for SubmissionView {
    fn from(record: SubmissionRecord) -> Self {
        Self {
            submission_id: record.id,
            assignment_id: record.assignment_id,
            student_id: record.student_id,
            analysis_status: record.analysis_status,
            ai_feedback: record.ai_feedback,
            submitted_at: record.submitted_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchResponse {
    submission_id: Uuid,
    analysis_status: AnalysisStatus,
    detail: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WeakTopicView {
    topic_name: String,
    confidence_score: f64,
    ai_explanation: String,
}

impl From<WeakTopicRecord> for WeakTopicView {
    fn from(record: WeakTopicRecord) -> Self {
        Self {
            topic_name: record.topic_name,
            confidence_score: record.confidence_score,
            ai_explanation: record.ai_explanation,
        }
    }
}

async fn create_submission<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateSubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionView>), (StatusCode, Json<ApiMessage>)> {
    let record = state
        .store()
        .create_submission(NewSubmission {
            assignment_id: request.assignment_id,
            student_id: request.student_id,
            content_text: request.content_text,
            file_url: request.file_url,
        })
        .await
        .map_err(internal_error)?;

    Ok((StatusCode::CREATED, Json(record.into())))
}

async fn submission_status<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    AxumPath(submission_id): AxumPath<Uuid>,
) -> Result<Json<SubmissionView>, (StatusCode, Json<ApiMessage>)> {
    let submission = load_submission(&state, submission_id).await?;
    Ok(Json(submission.into()))
}

async fn trigger_analysis<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    AxumPath(submission_id): AxumPath<Uuid>,
) -> Result<Json<DispatchResponse>, (StatusCode, Json<ApiMessage>)> {
    let submission = load_submission(&state, submission_id).await?;

    let disposition =
        dispatcher::dispatch(state.store(), state.worker(), state.settings(), submission)
            .await
            .map_err(|err| {
                error!(?err, %submission_id, "analysis dispatch failed");
                json_error(StatusCode::BAD_GATEWAY, "analysis dispatch failed")
            })?;

    let current = load_submission(&state, submission_id).await?;

    Ok(Json(DispatchResponse {
        submission_id,
        analysis_status: current.analysis_status,
        detail: disposition.describe(),
    }))
}

async fn await_status<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    AxumPath(submission_id): AxumPath<Uuid>,
) -> Result<Json<SubmissionView>, (StatusCode, Json<ApiMessage>)> {
    let settings = state.settings();
    let submission = watch::await_terminal(
        state.store(),
        submission_id,
        settings.watch_interval,
        settings.watch_budget,
    )
    .await
    .map_err(internal_error)?
    .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "submission not found"))?;

    Ok(Json(submission.into()))
}

async fn list_weak_topics<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    AxumPath(submission_id): AxumPath<Uuid>,
) -> Result<Json<Vec<WeakTopicView>>, (StatusCode, Json<ApiMessage>)> {
    let submission = load_submission(&state, submission_id).await?;

    let topics = state
        .store()
        .weak_topics(submission.student_id, submission.assignment_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(topics.into_iter().map(WeakTopicView::from).collect()))
}

/// Manual re-application of a raw worker result, the administrative
/// counterpart of the webhook. The path id wins over any submission id
/// embedded in the body.
async fn reapply_result<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    AxumPath(submission_id): AxumPath<Uuid>,
    Json(report): Json<WorkerReport>,
) -> Result<Json<SubmissionView>, (StatusCode, Json<ApiMessage>)> {
    load_submission(&state, submission_id).await?;

    let outcome = resolve_outcome(&report);
    reconciler::apply_result(state.store(), submission_id, &outcome)
        .await
        .map_err(internal_error)?;

    let current = load_submission(&state, submission_id).await?;
    Ok(Json(current.into()))
}

async fn receive_webhook<S: AnalysisStore>(
    State(state): State<AppState<S>>,
    Json(body): Json<Value>,
) -> Response {
    let report: WorkerReport = match serde_json::from_value(body) {
        Ok(report) => report,
        Err(err) => {
            return webhook_error(
                StatusCode::BAD_REQUEST,
                format!("malformed webhook payload: {err}"),
            );
        }
    };

    let Some(submission_id) = report.submission_id else {
        return webhook_error(
            StatusCode::BAD_REQUEST,
            "missing submissionId in request body".to_string(),
        );
    };

    match state.store().submission(submission_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return webhook_error(
                StatusCode::NOT_FOUND,
                format!("unknown submission {submission_id}"),
            );
        }
        Err(err) => {
            error!(?err, %submission_id, "failed to load submission for webhook");
            return webhook_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to process webhook".to_string(),
            );
        }
    }

    let outcome = resolve_outcome(&report);
    match reconciler::apply_result(state.store(), submission_id, &outcome).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(err) => {
            // apply_result has already driven the submission to `failed`.
            error!(?err, %submission_id, "failed to apply webhook analysis result");
            webhook_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to process webhook".to_string(),
            )
        }
    }
}

async fn load_submission<S: AnalysisStore>(
    state: &AppState<S>,
    submission_id: Uuid,
) -> Result<SubmissionRecord, (StatusCode, Json<ApiMessage>)> {
    state
        .store()
        .submission(submission_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "submission not found"))
}

fn webhook_error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "internal error in analysis module");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
