use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::store::{AnalysisStore, SubmissionRecord};

/// Short-poll the store until the submission reaches a terminal status or
/// the budget lapses, whichever comes first. Returns the last observed
/// record (`None` when the submission does not exist) and never mutates
/// state; this is the read-only dashboard wait, decoupled from the
/// reconciliation paths.
pub async fn await_terminal<S: AnalysisStore>(
    store: &S,
    submission_id: Uuid,
    interval: Duration,
    budget: Duration,
) -> Result<Option<SubmissionRecord>> {
    let deadline = Instant::now() + budget;

    loop {
        let Some(submission) = store.submission(submission_id).await? else {
            return Ok(None);
        };

        if submission.analysis_status.is_terminal() {
            return Ok(Some(submission));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(Some(submission));
        }

        sleep(interval.min(deadline - now)).await;
    }
}
