//! Payloads of the workflow service, as carried in the envelope's `data`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::ReferenceEntity;
use crate::workflow::{ContactDraft, InvoiceTotals, LineItem, StepId};

fn default_true() -> bool {
    true
}

/// Response to "start workflow": a fresh server session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowInit {
    pub session_id: String,
    pub current_step: StepId,
    #[serde(default)]
    pub step_prompt: String,
    #[serde(default)]
    pub completed_steps: Vec<StepId>,
    /// Server-side step list; empty means "use the built-in one".
    #[serde(default)]
    pub workflow_steps: Vec<StepId>,
    #[serde(default)]
    pub workflow_data: Option<Map<String, Value>>,
}

/// Response to "process step": what was heard and what was extracted.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StepResult {
    #[serde(default)]
    pub step: Option<StepId>,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub parsed_data: Map<String, Value>,
    #[serde(default = "default_true")]
    pub requires_confirmation: bool,
    /// `None` when the server did not report completion; the local set is
    /// then left as it is.
    #[serde(default)]
    pub completed_steps: Option<Vec<StepId>>,
}

/// Response to "confirm", "go to step" and the invoice line-item moves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepTransition {
    pub current_step: StepId,
    #[serde(default)]
    pub step_prompt: String,
    pub completed_steps: Vec<StepId>,
    #[serde(default)]
    pub workflow_data: Option<Map<String, Value>>,
    /// Confirmed invoice items, sent by the moves that change the list.
    #[serde(default)]
    pub line_items: Option<Vec<LineItem>>,
}

/// Response to the invoice "clear line item" moves: the list that remains.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineItemList {
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub item_count: usize,
}

/// Response to "update field".
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldUpdate {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    pub updated: bool,
}

/// Response to "submit": the entity created in the accounting system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    #[serde(alias = "invoice_id", alias = "contact_id")]
    pub entity_id: String,
    /// Human-readable number, e.g. `INV-0042`.
    #[serde(default, alias = "invoice_number")]
    pub number: Option<String>,
    #[serde(default, alias = "online_invoice_url")]
    pub external_url: Option<String>,
}

/// Response to "list contacts".
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContactList {
    #[serde(default)]
    pub contacts: Vec<ReferenceEntity>,
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// An invoice line as returned in a summary, with its computed total.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryLine {
    #[serde(flatten)]
    pub item: LineItem,
    pub line_total: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceSummary {
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub line_items: Vec<SummaryLine>,
    #[serde(flatten)]
    pub totals: InvoiceTotals,
}

/// Read-only draft snapshot from "get summary".
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowSummary {
    Contact(ContactDraft),
    Invoice(InvoiceSummary),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
