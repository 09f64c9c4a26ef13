use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::AnalysisSettings,
    store::{AnalysisStatus, AnalysisStore},
};

/// One-shot stuck-state check scheduled at dispatch time. If the submission
/// is still `processing` when the timer fires, neither the webhook nor an
/// inline reply ever arrived; the submission is forced to `completed`. A
/// permanently stuck "processing" badge is a worse user-facing failure than
/// a silently incomplete "completed" one, so this is deliberate leniency,
/// not a correctness guarantee. A webhook arriving later still overwrites
/// the forced result.
pub fn schedule_check<S: AnalysisStore>(store: S, submission_id: Uuid, timeout: Duration) {
    tokio::spawn(async move {
        sleep(timeout).await;

        match store
            .set_status_if_processing(submission_id, AnalysisStatus::Completed)
            .await
        {
            Ok(true) => {
                warn!(%submission_id, "worker never reported back; forcing completed status");
            }
            Ok(false) => {}
            Err(err) => {
                error!(?err, %submission_id, "stuck-state check failed");
            }
        }
    });
}

/// Periodic sweep covering submissions whose one-shot check was lost, e.g.
/// when the process restarted between dispatch and timer expiry.
pub fn spawn_sweeper<S: AnalysisStore>(store: S, settings: AnalysisSettings) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = run_sweep(&store, settings.dispatch_timeout).await {
                error!(?err, "stuck-submission sweep failed");
            }
            sleep(settings.sweep_interval).await;
        }
    });
}

pub async fn run_sweep<S: AnalysisStore>(store: &S, timeout: Duration) -> Result<u64> {
    let age = chrono::Duration::from_std(timeout)
        .context("dispatch timeout is out of range for a sweep cutoff")?;
    let cutoff = Utc::now() - age;

    let stuck = store
        .stuck_processing(cutoff)
        .await
        .context("failed to list stuck submissions")?;

    let mut forced = 0_u64;
    for submission_id in stuck {
        match store
            .set_status_if_processing(submission_id, AnalysisStatus::Completed)
            .await
        {
            Ok(true) => {
                warn!(%submission_id, "sweep forced stuck submission to completed");
                forced += 1;
            }
            Ok(false) => {}
            Err(err) => {
                error!(?err, %submission_id, "sweep failed to force stuck submission");
            }
        }
    }

    if forced > 0 {
        info!(forced, "stuck-submission sweep completed");
    }

    Ok(forced)
}
