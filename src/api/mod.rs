//! Client side of the remote workflow service.
//!
//! * [`WorkflowApi`]: async trait the engine is written against.
//! * [`HttpWorkflowClient`]: `reqwest` implementation.
//! * [`ApiEnvelope`] / [`ErrorCode`]: the `{success, data, error}` wrapper.
//! * Payload types for each endpoint.

pub mod client;
pub mod envelope;
pub mod types;

pub use client::{ApiError, HttpWorkflowClient, WorkflowApi};
pub use envelope::{ApiEnvelope, ApiErrorDetail, ErrorCode};
pub use types::{
    ContactList, FieldUpdate, InvoiceSummary, LineItemList, StepResult, StepTransition,
    SubmissionResult, SummaryLine, WorkflowInit, WorkflowSummary,
};
