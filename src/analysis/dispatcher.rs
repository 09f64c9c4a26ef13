use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, warn};

use crate::{
    config::AnalysisSettings,
    store::{AnalysisStatus, AnalysisStore, SubmissionRecord},
    worker::{AnalysisRequest, WorkerClient},
};

use super::{
    WorkerReport, reaper,
    reconciler::{self, AnalysisOutcome},
};

/// How a dispatch attempt ended from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDisposition {
    /// Request accepted by the worker; a webhook callback is expected.
    Dispatched,
    /// The worker answered the dispatch request with an inline result,
    /// which has already been reconciled.
    InlineCompleted,
    /// Full analysis was not possible; a placeholder result was applied.
    Degraded,
}

impl DispatchDisposition {
    pub fn describe(&self) -> &'static str {
        match self {
            DispatchDisposition::Dispatched => "analysis dispatched; awaiting worker callback",
            DispatchDisposition::InlineCompleted => "analysis completed from inline worker reply",
            DispatchDisposition::Degraded => "analysis degraded; required documents unavailable",
        }
    }
}

/// Initiate analysis for one submission. Re-dispatching an in-flight
/// submission starts an independent attempt; the replace semantics of
/// reconciliation keep concurrent attempts from corrupting each other.
pub async fn dispatch<S: AnalysisStore>(
    store: &S,
    worker: &WorkerClient,
    settings: &AnalysisSettings,
    submission: SubmissionRecord,
) -> Result<DispatchDisposition> {
    let submission_id = submission.id;

    // Flip the status before any network traffic so a UI observing the
    // record reflects progress even while the worker call is slow.
    store
        .set_status(submission_id, AnalysisStatus::Processing)
        .await
        .context("failed to mark submission processing")?;

    if !worker.is_configured() {
        return degrade(store, &submission, "analysis worker is not configured").await;
    }

    let assignment_pdf_url = store
        .assignment_file_url(submission.assignment_id)
        .await
        .context("failed to resolve assignment reference file")?;

    let Some(assignment_pdf_url) = assignment_pdf_url else {
        return degrade(store, &submission, "assignment reference file is unavailable").await;
    };
    let Some(student_submission_pdf_url) = submission.file_url.clone() else {
        return degrade(store, &submission, "submission file is unavailable").await;
    };

    let request = AnalysisRequest {
        submission_id,
        student_id: submission.student_id,
        assignment_id: submission.assignment_id,
        assignment_pdf_url,
        student_submission_pdf_url,
        direct_analysis: true,
        callback_url: settings.callback_url.clone(),
    };

    let reply = match worker.request_analysis(&request).await {
        Ok(reply) => reply,
        Err(err) => {
            // Transport failure must not leave the submission in `processing`.
            if let Err(status_err) = store.set_status(submission_id, AnalysisStatus::Failed).await
            {
                error!(?status_err, %submission_id, "failed to mark submission failed after dispatch error");
            }
            return Err(err).context("analysis worker dispatch failed");
        }
    };

    // The bounded wait runs whether or not the reply carried a result; it
    // no-ops once a terminal status lands.
    reaper::schedule_check(store.clone(), submission_id, settings.dispatch_timeout);

    if let Ok(report) = serde_json::from_value::<WorkerReport>(reply) {
        if report.has_result() {
            let outcome = super::resolve_outcome(&report);
            reconciler::apply_result(store, submission_id, &outcome)
                .await
                .context("failed to apply inline analysis reply")?;
            return Ok(DispatchDisposition::InlineCompleted);
        }
    }

    Ok(DispatchDisposition::Dispatched)
}

async fn degrade<S: AnalysisStore>(
    store: &S,
    submission: &SubmissionRecord,
    reason: &'static str,
) -> Result<DispatchDisposition> {
    warn!(submission_id = %submission.id, reason, "falling back to degraded analysis");

    let outcome = AnalysisOutcome {
        status: AnalysisStatus::Completed,
        topics: Vec::new(),
        feedback: Some(json!({
            "summary": "Automated analysis was skipped.",
            "reason": reason,
            "weakTopics": [],
        })),
    };

    reconciler::apply_result(store, submission.id, &outcome)
        .await
        .context("failed to apply degraded analysis result")?;

    Ok(DispatchDisposition::Degraded)
}
