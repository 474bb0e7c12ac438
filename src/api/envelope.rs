//! The uniform `{success, data, error}` response envelope.
//!
//! Every workflow endpoint wraps its payload the same way:
//!
//! ```text
//! { "success": true,  "data": { ... } }
//! { "success": false, "error": { "code": "SESSION_EXPIRED", "message": "...", "field": null } }
//! ```
//!
//! [`ApiEnvelope::into_result`] collapses that into a `Result`, classifying
//! the error code into an [`ErrorCode`] so callers never string-match codes.

use serde::Deserialize;
use serde_json::Value;

use super::client::ApiError;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Error classes the engine distinguishes.  All of them are handled the same
/// way (surface the message, keep local state), but the class is useful for
/// logging and for deciding whether a fresh session is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The session is unknown to the server or has expired.
    Session,
    /// Input failed validation; see the error's `field`.
    Validation,
    Transcription,
    Parsing,
    /// Credentials are missing or rejected.
    Auth,
    /// Any other workflow failure, with the raw code preserved.
    Workflow(String),
}

impl ErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "SESSION_EXPIRED" | "SESSION_NOT_FOUND" => ErrorCode::Session,
            "VALIDATION_ERROR" | "INVALID_DATA" | "INVALID_STEP" | "NO_LINE_ITEMS" => {
                ErrorCode::Validation
            }
            "TRANSCRIPTION_ERROR" => ErrorCode::Transcription,
            "PARSING_ERROR" | "PROCESSING_ERROR" => ErrorCode::Parsing,
            "AUTH_REQUIRED" | "AUTH_EXPIRED" | "INVALID_TOKEN" => ErrorCode::Auth,
            other => ErrorCode::Workflow(other.to_string()),
        }
    }

    /// `true` when retrying on the same session cannot succeed.
    pub fn requires_new_session(&self) -> bool {
        matches!(self, ErrorCode::Session)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The `error` member of a failed envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.success {
            let detail = self.error.unwrap_or_else(|| ApiErrorDetail {
                code: "UNKNOWN".into(),
                message: "request failed".into(),
                field: None,
                details: None,
            });
            return Err(ApiError::Remote {
                code: ErrorCode::from_code(&detail.code),
                message: detail.message,
                field: detail.field,
            });
        }
        self.data.ok_or(ApiError::MissingData)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
