//! Scenario tests for the analysis pipeline: dispatch, reconciliation,
//! stuck-state handling, and the orderings they can interleave in.

use std::time::Duration;

use axum::{Json, Router, routing::post};
use classroom_ai::{
    analysis::{
        WorkerReport,
        dispatcher::{self, DispatchDisposition},
        normalizer::CanonicalTopic,
        reaper,
        reconciler::{self, AnalysisOutcome},
        resolve_outcome, watch,
    },
    config::AnalysisSettings,
    store::{AnalysisStatus, AnalysisStore, MemoryStore, NewSubmission, SubmissionRecord},
    worker::WorkerClient,
};
use serde_json::{Value, json};
use uuid::Uuid;

async fn seeded_store(
    submission_file: Option<&str>,
    assignment_file: Option<&str>,
) -> (MemoryStore, SubmissionRecord) {
    let store = MemoryStore::new();
    let assignment_id = Uuid::new_v4();
    store.put_assignment(assignment_id, assignment_file.map(String::from));

    let submission = store
        .create_submission(NewSubmission {
            assignment_id,
            student_id: Uuid::new_v4(),
            content_text: Some("my answers".to_string()),
            file_url: submission_file.map(String::from),
        })
        .await
        .expect("seed submission");

    (store, submission)
}

fn topic(name: &str, score: f64, explanation: &str) -> CanonicalTopic {
    CanonicalTopic {
        name: name.to_string(),
        score,
        explanation: explanation.to_string(),
    }
}

fn completed_outcome(topics: Vec<CanonicalTopic>) -> AnalysisOutcome {
    AnalysisOutcome {
        status: AnalysisStatus::Completed,
        topics,
        feedback: None,
    }
}

async fn topic_names(store: &MemoryStore, submission: &SubmissionRecord) -> Vec<String> {
    store
        .weak_topics(submission.student_id, submission.assignment_id)
        .await
        .expect("weak topics")
        .into_iter()
        .map(|row| row.topic_name)
        .collect()
}

/// A port that was bound and released, so connecting to it is refused.
async fn refused_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    format!("http://{addr}/analyze")
}

/// Minimal stand-in for the analysis worker, answering every dispatch with
/// the given JSON body.
async fn spawn_fake_worker(reply: Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake worker");
    let addr = listener.local_addr().expect("fake worker addr");

    let app = Router::new().route(
        "/analyze",
        post(move || {
            let reply = reply.clone();
            async move { Json(reply) }
        }),
    );

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake worker serve");
    });

    format!("http://{addr}/analyze")
}

#[tokio::test]
async fn transport_failure_drives_submission_to_failed() {
    let (store, submission) = seeded_store(Some("https://files/sub.pdf"), Some("https://files/asg.pdf")).await;
    let worker = WorkerClient::new(Some(refused_endpoint().await));
    let settings = AnalysisSettings::default();

    let result = dispatcher::dispatch(&store, &worker, &settings, submission.clone()).await;
    assert!(result.is_err());

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Failed);
    assert!(topic_names(&store, &submission).await.is_empty());
}

#[tokio::test]
async fn unconfigured_worker_takes_degraded_path() {
    let (store, submission) = seeded_store(Some("https://files/sub.pdf"), Some("https://files/asg.pdf")).await;
    let worker = WorkerClient::new(None);
    let settings = AnalysisSettings::default();

    let disposition = dispatcher::dispatch(&store, &worker, &settings, submission.clone())
        .await
        .expect("degraded dispatch");
    assert_eq!(disposition, DispatchDisposition::Degraded);

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Completed);
    let feedback = current.ai_feedback.expect("degraded feedback blob");
    assert_eq!(feedback["reason"], "analysis worker is not configured");
    assert!(topic_names(&store, &submission).await.is_empty());
}

#[tokio::test]
async fn missing_submission_file_takes_degraded_path() {
    let (store, submission) = seeded_store(None, Some("https://files/asg.pdf")).await;
    let worker = WorkerClient::new(Some("http://127.0.0.1:1/analyze".to_string()));
    let settings = AnalysisSettings::default();

    let disposition = dispatcher::dispatch(&store, &worker, &settings, submission.clone())
        .await
        .expect("degraded dispatch");
    assert_eq!(disposition, DispatchDisposition::Degraded);

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Completed);
}

#[tokio::test]
async fn inline_worker_reply_is_reconciled_immediately() {
    let (store, submission) = seeded_store(Some("https://files/sub.pdf"), Some("https://files/asg.pdf")).await;
    let endpoint = spawn_fake_worker(json!({
        "feedback": { "weakTopics": [{ "name": "Fractions", "score": 2, "explanation": "mixed up denominators" }] },
    }))
    .await;
    let worker = WorkerClient::new(Some(endpoint));
    let settings = AnalysisSettings::default();

    let disposition = dispatcher::dispatch(&store, &worker, &settings, submission.clone())
        .await
        .expect("inline dispatch");
    assert_eq!(disposition, DispatchDisposition::InlineCompleted);

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Completed);
    assert_eq!(topic_names(&store, &submission).await, vec!["Fractions"]);
}

#[tokio::test]
async fn worker_ack_without_result_leaves_submission_processing() {
    let (store, submission) = seeded_store(Some("https://files/sub.pdf"), Some("https://files/asg.pdf")).await;
    let endpoint = spawn_fake_worker(json!({ "accepted": true })).await;
    let worker = WorkerClient::new(Some(endpoint));
    let settings = AnalysisSettings::default();

    let disposition = dispatcher::dispatch(&store, &worker, &settings, submission.clone())
        .await
        .expect("dispatch");
    assert_eq!(disposition, DispatchDisposition::Dispatched);

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Processing);
}

#[tokio::test]
async fn reconciliation_replaces_instead_of_merging() {
    let (store, submission) = seeded_store(None, None).await;

    let first = completed_outcome(vec![
        topic("Scheduling", 2.0, "confused preemption"),
        topic("Paging", 1.0, "wrong page sizes"),
    ]);
    reconciler::apply_result(&store, submission.id, &first)
        .await
        .unwrap();

    let second = completed_outcome(vec![topic("Deadlocks", 1.0, "missing conditions")]);
    reconciler::apply_result(&store, submission.id, &second)
        .await
        .unwrap();

    assert_eq!(topic_names(&store, &submission).await, vec!["Deadlocks"]);
}

#[tokio::test]
async fn applying_the_same_result_twice_is_idempotent() {
    let (store, submission) = seeded_store(None, None).await;

    let outcome = completed_outcome(vec![
        topic("Scheduling", 2.0, "confused preemption"),
        topic("Paging", 1.0, "wrong page sizes"),
    ]);
    reconciler::apply_result(&store, submission.id, &outcome)
        .await
        .unwrap();
    reconciler::apply_result(&store, submission.id, &outcome)
        .await
        .unwrap();

    let rows = store
        .weak_topics(submission.student_id, submission.assignment_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(topic_names(&store, &submission).await, vec!["Scheduling", "Paging"]);

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Completed);
}

#[tokio::test]
async fn empty_topic_list_keeps_previous_topics() {
    let (store, submission) = seeded_store(None, None).await;

    let first = completed_outcome(vec![topic("Paging", 1.0, "wrong page sizes")]);
    reconciler::apply_result(&store, submission.id, &first)
        .await
        .unwrap();

    let failure_without_topics = AnalysisOutcome {
        status: AnalysisStatus::Failed,
        topics: Vec::new(),
        feedback: None,
    };
    reconciler::apply_result(&store, submission.id, &failure_without_topics)
        .await
        .unwrap();

    assert_eq!(topic_names(&store, &submission).await, vec!["Paging"]);
    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn timeout_forces_completion_and_late_webhook_overwrites_it() {
    let (store, submission) = seeded_store(None, None).await;
    store
        .set_status(submission.id, AnalysisStatus::Processing)
        .await
        .unwrap();

    reaper::schedule_check(store.clone(), submission.id, Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(31)).await;

    let forced = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(forced.analysis_status, AnalysisStatus::Completed);
    assert!(forced.ai_feedback.is_none());

    // The real result arrives after the forced completion and must win.
    let report: WorkerReport = serde_json::from_value(json!({
        "submissionId": submission.id,
        "feedback": { "weakTopics": [{ "name": "Deadlocks", "score": 1, "explanation": "real result" }] },
    }))
    .unwrap();
    reconciler::apply_result(&store, submission.id, &resolve_outcome(&report))
        .await
        .unwrap();

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Completed);
    assert!(current.ai_feedback.is_some());
    assert_eq!(topic_names(&store, &submission).await, vec!["Deadlocks"]);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_a_no_op_once_a_terminal_status_landed() {
    let (store, submission) = seeded_store(None, None).await;
    store
        .set_status(submission.id, AnalysisStatus::Failed)
        .await
        .unwrap();

    reaper::schedule_check(store.clone(), submission.id, Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(31)).await;

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Failed);
}

#[tokio::test]
async fn status_never_regresses_from_terminal_without_a_new_dispatch() {
    let (store, submission) = seeded_store(None, None).await;
    store
        .set_status(submission.id, AnalysisStatus::Completed)
        .await
        .unwrap();

    let changed = store
        .set_status_if_processing(submission.id, AnalysisStatus::Completed)
        .await
        .unwrap();
    assert!(!changed);

    let current = store.submission(submission.id).await.unwrap().unwrap();
    assert_eq!(current.analysis_status, AnalysisStatus::Completed);
}

#[tokio::test]
async fn sweep_forces_only_stuck_processing_submissions() {
    let (store, stuck) = seeded_store(None, None).await;
    store
        .set_status(stuck.id, AnalysisStatus::Processing)
        .await
        .unwrap();

    let settled = store
        .create_submission(NewSubmission {
            assignment_id: stuck.assignment_id,
            student_id: Uuid::new_v4(),
            content_text: None,
            file_url: None,
        })
        .await
        .unwrap();
    store
        .set_status(settled.id, AnalysisStatus::Failed)
        .await
        .unwrap();

    // Let the wall clock move past the processing flips above.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let forced = reaper::run_sweep(&store, Duration::from_secs(0)).await.unwrap();
    assert_eq!(forced, 1);

    let stuck_now = store.submission(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck_now.analysis_status, AnalysisStatus::Completed);
    let settled_now = store.submission(settled.id).await.unwrap().unwrap();
    assert_eq!(settled_now.analysis_status, AnalysisStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn watcher_returns_once_a_terminal_status_is_observed() {
    let (store, submission) = seeded_store(None, None).await;
    store
        .set_status(submission.id, AnalysisStatus::Processing)
        .await
        .unwrap();

    let background = store.clone();
    let submission_id = submission.id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        background
            .set_status(submission_id, AnalysisStatus::Completed)
            .await
            .unwrap();
    });

    let observed = watch::await_terminal(
        &store,
        submission.id,
        Duration::from_secs(3),
        Duration::from_secs(60),
    )
    .await
    .unwrap()
    .expect("submission exists");

    assert_eq!(observed.analysis_status, AnalysisStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn watcher_gives_up_after_its_budget() {
    let (store, submission) = seeded_store(None, None).await;
    store
        .set_status(submission.id, AnalysisStatus::Processing)
        .await
        .unwrap();

    let observed = watch::await_terminal(
        &store,
        submission.id,
        Duration::from_secs(3),
        Duration::from_secs(60),
    )
    .await
    .unwrap()
    .expect("submission exists");

    // Still non-terminal: the watcher reports what it saw and stops polling.
    assert_eq!(observed.analysis_status, AnalysisStatus::Processing);
}
