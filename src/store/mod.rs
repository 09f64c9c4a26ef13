use std::future::Future;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

use crate::analysis::normalizer::CanonicalTopic;

pub mod memory;

pub use memory::MemoryStore;

/// Lifecycle of a submission's AI analysis. Stored as lower-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AnalysisStatus::Pending),
            "processing" => Some(AnalysisStatus::Processing),
            "completed" => Some(AnalysisStatus::Completed),
            "failed" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses are never overwritten by the stuck-state check.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

impl Serialize for AnalysisStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub content_text: Option<String>,
    pub file_url: Option<String>,
    pub analysis_status: AnalysisStatus,
    pub ai_feedback: Option<Value>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub content_text: Option<String>,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WeakTopicRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub assignment_id: Uuid,
    pub topic_name: String,
    pub confidence_score: f64,
    pub ai_explanation: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence seam of the analysis pipeline. The relational store is an
/// external collaborator, so every call path goes through this trait; the
/// Postgres implementation backs the running service and the in-memory one
/// backs the test suites.
pub trait AnalysisStore: Clone + Send + Sync + 'static {
    fn create_submission(
        &self,
        new: NewSubmission,
    ) -> impl Future<Output = Result<SubmissionRecord>> + Send;

    fn submission(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<SubmissionRecord>>> + Send;

    fn assignment_file_url(
        &self,
        assignment_id: Uuid,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set_status(
        &self,
        id: Uuid,
        status: AnalysisStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Conditional update used by the stuck-state check: only flips the
    /// status when the submission is still `processing`. Returns whether a
    /// row changed.
    fn set_status_if_processing(
        &self,
        id: Uuid,
        status: AnalysisStatus,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Terminal write of one analysis result: status plus, when present, the
    /// normalized feedback blob retained for display.
    fn finalize(
        &self,
        id: Uuid,
        status: AnalysisStatus,
        feedback: Option<&Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Wholesale replacement of the weak-topic set for one
    /// (student, assignment) pair. Never a merge.
    fn replace_weak_topics(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
        topics: &[CanonicalTopic],
    ) -> impl Future<Output = Result<()>> + Send;

    fn weak_topics(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> impl Future<Output = Result<Vec<WeakTopicRecord>>> + Send;

    /// Submissions that have sat in `processing` since before the cutoff.
    fn stuck_processing(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Uuid>>> + Send;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: Uuid,
    assignment_id: Uuid,
    student_id: Uuid,
    content_text: Option<String>,
    file_url: Option<String>,
    analysis_status: String,
    ai_feedback: Option<Value>,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct WeakTopicRow {
    id: Uuid,
    student_id: Uuid,
    assignment_id: Uuid,
    topic_name: String,
    confidence_score: f64,
    ai_explanation: String,
    created_at: DateTime<Utc>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self { pool })
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }
}

impl AnalysisStore for PgStore {
    async fn create_submission(&self, new: NewSubmission) -> Result<SubmissionRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO submissions (id, assignment_id, student_id, content_text, file_url, analysis_status, submitted_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
        )
        .bind(id)
        .bind(new.assignment_id)
        .bind(new.student_id)
        .bind(&new.content_text)
        .bind(&new.file_url)
        .bind(AnalysisStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to insert submission")?;

        Ok(SubmissionRecord {
            id,
            assignment_id: new.assignment_id,
            student_id: new.student_id,
            content_text: new.content_text,
            file_url: new.file_url,
            analysis_status: AnalysisStatus::Pending,
            ai_feedback: None,
            submitted_at: now,
            updated_at: now,
        })
    }

    async fn submission(&self, id: Uuid) -> Result<Option<SubmissionRecord>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            "SELECT id, assignment_id, student_id, content_text, file_url, analysis_status, ai_feedback, submitted_at, updated_at
             FROM submissions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load submission")?;

        row.map(record_from_row).transpose()
    }

    async fn assignment_file_url(&self, assignment_id: Uuid) -> Result<Option<String>> {
        let url: Option<Option<String>> =
            sqlx::query_scalar("SELECT file_url FROM assignments WHERE id = $1")
                .bind(assignment_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to load assignment file URL")?;

        Ok(url.flatten())
    }

    async fn set_status(&self, id: Uuid, status: AnalysisStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE submissions SET analysis_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .context("failed to update submission status")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("submission {id} not found"));
        }
        Ok(())
    }

    async fn set_status_if_processing(&self, id: Uuid, status: AnalysisStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE submissions SET analysis_status = $2, updated_at = NOW()
             WHERE id = $1 AND analysis_status = $3",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(AnalysisStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .context("failed to conditionally update submission status")?;

        Ok(result.rows_affected() > 0)
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: AnalysisStatus,
        feedback: Option<&Value>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE submissions
             SET analysis_status = $2, ai_feedback = COALESCE($3, ai_feedback), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(feedback)
        .execute(&self.pool)
        .await
        .context("failed to finalize submission")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("submission {id} not found"));
        }
        Ok(())
    }

    async fn replace_weak_topics(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
        topics: &[CanonicalTopic],
    ) -> Result<()> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .context("failed to open weak-topic transaction")?;

        sqlx::query("DELETE FROM student_weak_topics WHERE student_id = $1 AND assignment_id = $2")
            .bind(student_id)
            .bind(assignment_id)
            .execute(&mut *transaction)
            .await
            .context("failed to delete previous weak topics")?;

        for topic in topics {
            sqlx::query(
                "INSERT INTO student_weak_topics (id, student_id, assignment_id, topic_name, confidence_score, ai_explanation)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(assignment_id)
            .bind(&topic.name)
            .bind(topic.score)
            .bind(&topic.explanation)
            .execute(&mut *transaction)
            .await
            .context("failed to insert weak topic")?;
        }

        transaction
            .commit()
            .await
            .context("failed to commit weak-topic replacement")?;

        Ok(())
    }

    async fn weak_topics(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<Vec<WeakTopicRecord>> {
        let rows = sqlx::query_as::<_, WeakTopicRow>(
            "SELECT id, student_id, assignment_id, topic_name, confidence_score, ai_explanation, created_at
             FROM student_weak_topics
             WHERE student_id = $1 AND assignment_id = $2
             ORDER BY created_at, topic_name",
        )
        .bind(student_id)
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load weak topics")?;

        Ok(rows
            .into_iter()
            .map(|row| WeakTopicRecord {
                id: row.id,
                student_id: row.student_id,
                assignment_id: row.assignment_id,
                topic_name: row.topic_name,
                confidence_score: row.confidence_score,
                ai_explanation: row.ai_explanation,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM submissions WHERE analysis_status = $1 AND updated_at < $2",
        )
        .bind(AnalysisStatus::Processing.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .context("failed to query stuck submissions")?;

        Ok(ids)
    }
}

fn record_from_row(row: SubmissionRow) -> Result<SubmissionRecord> {
    let analysis_status = AnalysisStatus::parse(&row.analysis_status)
        .ok_or_else(|| anyhow!("unknown analysis status stored: {}", row.analysis_status))?;

    Ok(SubmissionRecord {
        id: row.id,
        assignment_id: row.assignment_id,
        student_id: row.student_id,
        content_text: row.content_text,
        file_url: row.file_url,
        analysis_status,
        ai_feedback: row.ai_feedback,
        submitted_at: row.submitted_at,
        updated_at: row.updated_at,
    })
}
