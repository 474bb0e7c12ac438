//! Step identifiers and per-kind workflow definitions.
//!
//! Steps are data, not states: each [`WorkflowKind`] ships an ordered list of
//! step identifiers bracketed by the sentinel steps `welcome`, `review`,
//! `final_submit` and `complete`.  The server may send its own list when a
//! session starts; [`WorkflowDefinition::with_steps`] lets that override the
//! built-in one.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StepId
// ---------------------------------------------------------------------------

/// Opaque step identifier as used on the wire (e.g. `"contact_name"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub const WELCOME: &'static str = "welcome";
    pub const REVIEW: &'static str = "review";
    pub const FINAL_SUBMIT: &'static str = "final_submit";
    pub const COMPLETE: &'static str = "complete";
    pub const LINE_ITEM: &'static str = "line_item";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the non-voice bookkeeping steps.
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::WELCOME | Self::REVIEW | Self::FINAL_SUBMIT | Self::COMPLETE
        )
    }

    pub fn is_complete(&self) -> bool {
        self.0 == Self::COMPLETE
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for StepId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ---------------------------------------------------------------------------
// WorkflowKind
// ---------------------------------------------------------------------------

/// The kinds of entity a workflow can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Contact,
    Invoice,
}

impl Default for WorkflowKind {
    fn default() -> Self {
        Self::Contact
    }
}

impl WorkflowKind {
    /// Route prefix on the workflow service.
    pub fn route_prefix(&self) -> &'static str {
        match self {
            WorkflowKind::Contact => "/contact",
            WorkflowKind::Invoice => "/invoice",
        }
    }

    /// Built-in ordered step list.
    pub fn default_steps(&self) -> &'static [&'static str] {
        match self {
            WorkflowKind::Contact => &[
                "welcome",
                "name",
                "email",
                "address",
                "review",
                "final_submit",
                "complete",
            ],
            WorkflowKind::Invoice => &[
                "welcome",
                "contact_name",
                "due_date",
                "line_item",
                "review",
                "final_submit",
                "complete",
            ],
        }
    }

    /// Fallback voice prompt, used when the server sends an empty one.
    pub fn default_prompt(&self, step: &StepId) -> &'static str {
        match (self, step.as_str()) {
            (WorkflowKind::Contact, "welcome") => "Let's add a new contact.",
            (WorkflowKind::Invoice, "welcome") => "Let's create a new invoice.",
            (WorkflowKind::Contact, "name") | (WorkflowKind::Invoice, "contact_name") => {
                "Please say the contact's full name or organization name."
            }
            (_, "email") => "Please say the contact's email address.",
            (_, "address") => {
                "Please say the full address including street, city, and postal code."
            }
            (_, "due_date") => "Please say the due date for the invoice.",
            (_, "line_item") => {
                "Please describe the line item: what it is, quantity, price, and VAT rate."
            }
            (WorkflowKind::Contact, "review") => "Review the contact details below.",
            (WorkflowKind::Invoice, "review") => "Review the invoice details below.",
            (_, "final_submit") => "Ready to submit.",
            (WorkflowKind::Contact, "complete") => "Contact created successfully!",
            (WorkflowKind::Invoice, "complete") => "Invoice created successfully!",
            _ => "",
        }
    }

    /// Human-readable step title for progress displays.
    pub fn step_title(&self, step: &StepId) -> String {
        let known = match step.as_str() {
            "name" | "contact_name" => Some("Contact Name"),
            "email" => Some("Email Address"),
            "address" => Some("Contact Address"),
            "due_date" => Some("Due Date"),
            "line_item" => Some("Line Item"),
            "review" => Some("Review Details"),
            "final_submit" => Some("Final Confirmation"),
            _ => None,
        };
        match known {
            Some(title) => title.to_string(),
            None => title_case(step.as_str()),
        }
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" => Ok(Self::Contact),
            "invoice" => Ok(Self::Invoice),
            other => Err(format!("unknown workflow kind: {other}")),
        }
    }
}

fn title_case(id: &str) -> String {
    id.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A workflow kind together with the ordered step list in force for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    kind: WorkflowKind,
    steps: Vec<StepId>,
}

impl WorkflowDefinition {
    /// Definition using the kind's built-in step list.
    pub fn for_kind(kind: WorkflowKind) -> Self {
        let steps = kind.default_steps().iter().map(|s| StepId::from(*s)).collect();
        Self { kind, steps }
    }

    /// Definition with an explicit step list.  An empty list falls back to the
    /// built-in one.
    pub fn with_steps(kind: WorkflowKind, steps: Vec<StepId>) -> Self {
        if steps.is_empty() {
            return Self::for_kind(kind);
        }
        Self { kind, steps }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    pub fn contains(&self, step: &StepId) -> bool {
        self.steps.contains(step)
    }

    pub fn position(&self, step: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| s == step)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
