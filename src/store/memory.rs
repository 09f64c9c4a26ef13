use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::analysis::normalizer::CanonicalTopic;

use super::{
    AnalysisStatus, AnalysisStore, NewSubmission, SubmissionRecord, WeakTopicRecord,
};

/// In-memory [`AnalysisStore`] with the same observable behavior as the
/// Postgres implementation. The test suites run against this; there is no
/// database available at test time.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    submissions: HashMap<Uuid, SubmissionRecord>,
    weak_topics: Vec<WeakTopicRecord>,
    assignments: HashMap<Uuid, Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an assignment reference file. Assignment management itself is
    /// outside the pipeline; tests and fixtures seed this directly.
    pub fn put_assignment(&self, assignment_id: Uuid, file_url: Option<String>) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.assignments.insert(assignment_id, file_url);
    }
}

impl AnalysisStore for MemoryStore {
    async fn create_submission(&self, new: NewSubmission) -> Result<SubmissionRecord> {
        let now = Utc::now();
        let record = SubmissionRecord {
            id: Uuid::new_v4(),
            assignment_id: new.assignment_id,
            student_id: new.student_id,
            content_text: new.content_text,
            file_url: new.file_url,
            analysis_status: AnalysisStatus::Pending,
            ai_feedback: None,
            submitted_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.submissions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn submission(&self, id: Uuid) -> Result<Option<SubmissionRecord>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.submissions.get(&id).cloned())
    }

    async fn assignment_file_url(&self, assignment_id: Uuid) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.assignments.get(&assignment_id).cloned().flatten())
    }

    async fn set_status(&self, id: Uuid, status: AnalysisStatus) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let submission = inner
            .submissions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("submission {id} not found"))?;
        submission.analysis_status = status;
        submission.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status_if_processing(&self, id: Uuid, status: AnalysisStatus) -> Result<bool> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let Some(submission) = inner.submissions.get_mut(&id) else {
            return Ok(false);
        };
        if submission.analysis_status != AnalysisStatus::Processing {
            return Ok(false);
        }
        submission.analysis_status = status;
        submission.updated_at = Utc::now();
        Ok(true)
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: AnalysisStatus,
        feedback: Option<&Value>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let submission = inner
            .submissions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("submission {id} not found"))?;
        submission.analysis_status = status;
        if let Some(feedback) = feedback {
            submission.ai_feedback = Some(feedback.clone());
        }
        submission.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_weak_topics(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
        topics: &[CanonicalTopic],
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .weak_topics
            .retain(|row| !(row.student_id == student_id && row.assignment_id == assignment_id));

        let now = Utc::now();
        for topic in topics {
            inner.weak_topics.push(WeakTopicRecord {
                id: Uuid::new_v4(),
                student_id,
                assignment_id,
                topic_name: topic.name.clone(),
                confidence_score: topic.score,
                ai_explanation: topic.explanation.clone(),
                created_at: now,
            });
        }
        Ok(())
    }

    async fn weak_topics(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<Vec<WeakTopicRecord>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .weak_topics
            .iter()
            .filter(|row| row.student_id == student_id && row.assignment_id == assignment_id)
            .cloned()
            .collect())
    }

    async fn stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .submissions
            .values()
            .filter(|row| {
                row.analysis_status == AnalysisStatus::Processing && row.updated_at < older_than
            })
            .map(|row| row.id)
            .collect())
    }
}
