use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::store::{AnalysisStatus, AnalysisStore};

use super::normalizer::CanonicalTopic;

/// One normalized analysis result, ready to be applied to storage.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Terminal status this result drives the submission to.
    pub status: AnalysisStatus,
    pub topics: Vec<CanonicalTopic>,
    /// Normalized feedback blob retained on the submission for display.
    pub feedback: Option<Value>,
}

/// Apply one analysis result to the submission and weak-topic stores.
///
/// This is the only write path for analysis results; the webhook receiver,
/// the dispatcher's inline-reply path, and the manual reapply endpoint all
/// delegate here. A non-empty topic list replaces the pair's stored set
/// wholesale, which is what makes repeated application idempotent.
pub async fn apply_result<S: AnalysisStore>(
    store: &S,
    submission_id: Uuid,
    outcome: &AnalysisOutcome,
) -> Result<()> {
    let submission = store
        .submission(submission_id)
        .await
        .context("failed to load submission for reconciliation")?
        .ok_or_else(|| anyhow!("submission {submission_id} not found"))?;

    if !outcome.topics.is_empty() {
        if let Err(err) = store
            .replace_weak_topics(submission.student_id, submission.assignment_id, &outcome.topics)
            .await
        {
            mark_failed_best_effort(store, submission_id).await;
            return Err(err).context("failed to replace weak topics");
        }
    }

    if let Err(err) = store
        .finalize(submission_id, outcome.status, outcome.feedback.as_ref())
        .await
    {
        // The topic replace may already be durable; a terminal status is
        // still required so the submission cannot sit in `processing`.
        mark_failed_best_effort(store, submission_id).await;
        return Err(err).context("failed to finalize submission after analysis");
    }

    Ok(())
}

async fn mark_failed_best_effort<S: AnalysisStore>(store: &S, submission_id: Uuid) {
    if let Err(err) = store.set_status(submission_id, AnalysisStatus::Failed).await {
        error!(?err, %submission_id, "failed to mark submission failed after reconciliation error");
    }
}
