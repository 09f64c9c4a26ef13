use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound payload for one analysis request. Exists only for the duration
/// of a dispatch call; nothing here is persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub submission_id: Uuid,
    pub student_id: Uuid,
    pub assignment_id: Uuid,
    pub assignment_pdf_url: String,
    pub student_submission_pdf_url: String,
    pub direct_analysis: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// HTTP client for the external analysis worker.
///
/// The worker normally reports results asynchronously through the webhook
/// receiver, but some scenario configurations answer the dispatch request
/// with an inline body; [`WorkerClient::request_analysis`] hands that body
/// back verbatim so the caller can decide whether it is a result.
#[derive(Clone)]
pub struct WorkerClient {
    http: Client,
    endpoint: Option<String>,
}

impl WorkerClient {
    pub fn new(endpoint: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self { http, endpoint }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Send one analysis request and return whatever body the worker
    /// answered with: `Value::Null` when the reply was empty, the decoded
    /// JSON when it parsed, and a JSON string otherwise. Worker replies are
    /// not contractually JSON.
    pub async fn request_analysis(&self, request: &AnalysisRequest) -> Result<Value> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            bail!("analysis worker endpoint is not configured");
        };

        let response = self
            .http
            .post(endpoint)
            .json(request)
            .send()
            .await
            .context("failed to reach analysis worker")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read analysis worker response body")?;

        if !status.is_success() {
            let preview = if text.len() > 500 { &text[..500] } else { &text };
            bail!("analysis worker returned status {status}: {preview}");
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
