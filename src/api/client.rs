//! `WorkflowApi` trait and the `HttpWorkflowClient` implementation.
//!
//! The engine only ever talks to the workflow service through
//! [`WorkflowApi`], so tests drive it with an in-memory double and the
//! binary hands it an [`HttpWorkflowClient`] built from [`ServerConfig`].

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::envelope::{ApiEnvelope, ErrorCode};
use super::types::{
    ContactList, FieldUpdate, InvoiceSummary, LineItemList, StepResult, StepTransition,
    SubmissionResult, WorkflowInit, WorkflowSummary,
};
use crate::config::ServerConfig;
use crate::entity::ReferenceEntity;
use crate::workflow::{ContactDraft, StepId, WorkflowKind};

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors returned by the workflow service or the transport underneath it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("workflow request timed out")]
    Timeout,

    /// The response body was not the expected JSON.
    #[error("failed to parse workflow response: {0}")]
    Parse(String),

    /// The service answered with `success: false`.
    #[error("{message}")]
    Remote {
        code: ErrorCode,
        message: String,
        field: Option<String>,
    },

    /// `success: true` but no `data` member.
    #[error("workflow response carried no data")]
    MissingData,
}

impl ApiError {
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            ApiError::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowApi trait
// ---------------------------------------------------------------------------

/// The remote operations a workflow session needs.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn WorkflowApi>`.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn start_workflow(&self, kind: WorkflowKind) -> Result<WorkflowInit, ApiError>;

    /// Upload one recording for `step` and get back the transcript and the
    /// fields parsed from it.
    async fn process_step(
        &self,
        kind: WorkflowKind,
        session_id: &str,
        step: &StepId,
        audio: &Path,
    ) -> Result<StepResult, ApiError>;

    async fn confirm_step(
        &self,
        kind: WorkflowKind,
        session_id: &str,
    ) -> Result<StepTransition, ApiError>;

    async fn go_to_step(
        &self,
        kind: WorkflowKind,
        session_id: &str,
        step: &StepId,
    ) -> Result<StepTransition, ApiError>;

    async fn update_field(
        &self,
        kind: WorkflowKind,
        session_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<FieldUpdate, ApiError>;

    async fn get_summary(
        &self,
        kind: WorkflowKind,
        session_id: &str,
    ) -> Result<WorkflowSummary, ApiError>;

    async fn submit(&self, kind: WorkflowKind, session_id: &str)
        -> Result<SubmissionResult, ApiError>;

    /// Reference contacts for matching a spoken contact name.
    async fn list_contacts(&self) -> Result<Vec<ReferenceEntity>, ApiError>;

    /// Invoice only: keep the pending line item and ask for another.
    async fn add_another_item(&self, session_id: &str) -> Result<StepTransition, ApiError>;

    /// Invoice only: keep the pending line item and move to review.
    async fn proceed_to_review(&self, session_id: &str) -> Result<StepTransition, ApiError>;

    /// Invoice only: keep the pending line item, then either stay on the
    /// line-item step for another (`add_another`) or move to review.
    async fn confirm_line_item(
        &self,
        session_id: &str,
        add_another: bool,
    ) -> Result<StepTransition, ApiError>;

    /// Invoice only: drop the confirmed item at `index`.  Out-of-range
    /// indices leave the list as it is.
    async fn clear_line_item(&self, session_id: &str, index: usize)
        -> Result<LineItemList, ApiError>;

    /// Invoice only: drop every confirmed item and the pending one.
    async fn clear_all_line_items(&self, session_id: &str) -> Result<LineItemList, ApiError>;
}

// ---------------------------------------------------------------------------
// HttpWorkflowClient
// ---------------------------------------------------------------------------

/// Talks to the workflow service over HTTPS.
///
/// Every request carries `Accept: application/json`; the bearer token is
/// attached only when one is configured.
pub struct HttpWorkflowClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpWorkflowClient {
    /// Build a client from config.  The per-request timeout comes from
    /// `config.timeout_secs`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token().filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, kind: WorkflowKind, path: &str) -> String {
        format!("{}{}{}", self.base_url, kind.route_prefix(), path)
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(url))
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(url))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send `req` and unwrap the response envelope.
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        match serde_json::from_slice::<ApiEnvelope<T>>(&body) {
            Ok(envelope) => envelope.into_result(),
            Err(_) if !status.is_success() => Err(ApiError::Request(format!("HTTP {status}"))),
            Err(e) => Err(ApiError::Parse(e.to_string())),
        }
    }

    async fn session_post<T: DeserializeOwned>(
        &self,
        kind: WorkflowKind,
        path: &str,
        session_id: &str,
    ) -> Result<T, ApiError> {
        let req = self
            .post(self.url(kind, path))
            .form(&[("session_id", session_id)]);
        self.send(req).await
    }
}

/// Form encoding of a field value: strings go as-is, anything else as JSON.
fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn form_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl WorkflowApi for HttpWorkflowClient {
    async fn start_workflow(&self, kind: WorkflowKind) -> Result<WorkflowInit, ApiError> {
        log::debug!("api: starting {kind:?} workflow");
        self.send(self.get(self.url(kind, "/new"))).await
    }

    async fn process_step(
        &self,
        kind: WorkflowKind,
        session_id: &str,
        step: &StepId,
        audio: &Path,
    ) -> Result<StepResult, ApiError> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| ApiError::Request(format!("cannot read {}: {e}", audio.display())))?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording.wav")
            .to_string();
        log::debug!("api: uploading {} bytes for step {step}", bytes.len());

        let part = Part::bytes(bytes).file_name(file_name).mime_str("audio/wav")?;
        let form = Form::new()
            .part("audio_file", part)
            .text("step", step.to_string())
            .text("session_id", session_id.to_string());

        self.send(self.post(self.url(kind, "/step")).multipart(form)).await
    }

    async fn confirm_step(
        &self,
        kind: WorkflowKind,
        session_id: &str,
    ) -> Result<StepTransition, ApiError> {
        self.session_post(kind, "/confirm-step", session_id).await
    }

    async fn go_to_step(
        &self,
        kind: WorkflowKind,
        session_id: &str,
        step: &StepId,
    ) -> Result<StepTransition, ApiError> {
        let req = self
            .post(self.url(kind, "/go-to-step"))
            .form(&[("step", step.as_str()), ("session_id", session_id)]);
        self.send(req).await
    }

    async fn update_field(
        &self,
        kind: WorkflowKind,
        session_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<FieldUpdate, ApiError> {
        let encoded = form_value(value);
        let req = self.post(self.url(kind, "/update-field")).form(&[
            ("field_name", field),
            ("field_value", encoded.as_str()),
            ("session_id", session_id),
        ]);
        self.send(req).await
    }

    async fn get_summary(
        &self,
        kind: WorkflowKind,
        session_id: &str,
    ) -> Result<WorkflowSummary, ApiError> {
        let req = self
            .get(self.url(kind, "/summary"))
            .query(&[("session_id", session_id)]);
        let data: Value = self.send(req).await?;

        let summary = match kind {
            WorkflowKind::Contact => {
                serde_json::from_value::<ContactDraft>(data).map(WorkflowSummary::Contact)
            }
            WorkflowKind::Invoice => {
                serde_json::from_value::<InvoiceSummary>(data).map(WorkflowSummary::Invoice)
            }
        };
        summary.map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn submit(
        &self,
        kind: WorkflowKind,
        session_id: &str,
    ) -> Result<SubmissionResult, ApiError> {
        log::info!("api: submitting {kind:?} session {session_id}");
        let req = self
            .post(self.url(kind, "/submit-to-xero"))
            .form(&[("session_id", session_id)]);
        self.send(req).await
    }

    async fn list_contacts(&self) -> Result<Vec<ReferenceEntity>, ApiError> {
        let list: ContactList = self
            .send(self.get(self.url(WorkflowKind::Invoice, "/contacts")))
            .await?;
        Ok(list.contacts)
    }

    async fn add_another_item(&self, session_id: &str) -> Result<StepTransition, ApiError> {
        self.session_post(WorkflowKind::Invoice, "/add-another-item", session_id)
            .await
    }

    async fn proceed_to_review(&self, session_id: &str) -> Result<StepTransition, ApiError> {
        self.session_post(WorkflowKind::Invoice, "/proceed-to-review", session_id)
            .await
    }

    async fn confirm_line_item(
        &self,
        session_id: &str,
        add_another: bool,
    ) -> Result<StepTransition, ApiError> {
        let req = self
            .post(self.url(WorkflowKind::Invoice, "/confirm-line-item"))
            .form(&[("session_id", session_id), ("add_another", form_bool(add_another))]);
        self.send(req).await
    }

    async fn clear_line_item(
        &self,
        session_id: &str,
        index: usize,
    ) -> Result<LineItemList, ApiError> {
        let index = index.to_string();
        let req = self
            .post(self.url(WorkflowKind::Invoice, "/clear-line-item"))
            .form(&[("session_id", session_id), ("item_index", index.as_str())]);
        self.send(req).await
    }

    async fn clear_all_line_items(&self, session_id: &str) -> Result<LineItemList, ApiError> {
        self.session_post(WorkflowKind::Invoice, "/clear-all-line-items", session_id)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
