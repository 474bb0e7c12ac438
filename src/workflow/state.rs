//! Workflow state machine and shared session state.
//!
//! [`WorkflowStateMachine`] is pure data transformation: it never performs
//! I/O and none of its operations fail.  The orchestrator performs the remote
//! call, then feeds the response in here; failures are reported through
//! [`set_error`](WorkflowStateMachine::set_error).
//!
//! [`SharedWorkflow`] is `Arc<Mutex<WorkflowStateMachine>>`, shared between
//! the orchestrator and whatever renders the session.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use super::draft::{Draft, DraftFieldError, LineItem};
use super::navigator::{NavigationState, StepNavigator};
use super::reconcile::StepResultReconciler;
use super::step::{StepId, WorkflowDefinition, WorkflowKind};
use crate::api::{StepResult, StepTransition, SubmissionResult, WorkflowInit};

// ---------------------------------------------------------------------------
// WorkflowPhase
// ---------------------------------------------------------------------------

/// Lifecycle of one workflow session.
///
/// ```text
/// Uninitialized ──initialize──▶ Active ──begin_submit──▶ Submitting
///                                  ▲                       ├─complete_submit─▶ Completed
///                                  │                       └─fail_submit─────▶ Error
///                                  └──────────── begin_submit (retry) ◀────────┘
/// any phase ──reset──▶ Uninitialized
/// ```
///
/// The step the user is on is data (`Session::current_step`), not a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowPhase {
    #[default]
    Uninitialized,
    Active,
    Submitting,
    Completed,
    Error,
}

impl WorkflowPhase {
    /// A short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowPhase::Uninitialized => "Not started",
            WorkflowPhase::Active => "In progress",
            WorkflowPhase::Submitting => "Submitting",
            WorkflowPhase::Completed => "Completed",
            WorkflowPhase::Error => "Error",
        }
    }
}

/// Status of the session as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Error,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One in-progress workflow instance, keyed by `session_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    /// Always a member of the definition's step list.
    pub current_step: StepId,
    /// Server order, verbatim.
    pub completed_steps: Vec<StepId>,
    pub step_prompt: String,
    pub draft: Draft,
    pub status: SessionStatus,
}

// ---------------------------------------------------------------------------
// WorkflowStateMachine
// ---------------------------------------------------------------------------

pub struct WorkflowStateMachine {
    phase: WorkflowPhase,
    definition: WorkflowDefinition,
    session: Option<Session>,
    reconciler: StepResultReconciler,

    /// Latest unconfirmed step result; cleared by `confirm_step`.
    step_result: Option<StepResult>,
    submission: Option<SubmissionResult>,

    loading: bool,
    error: Option<String>,
}

impl WorkflowStateMachine {
    pub fn new(kind: WorkflowKind) -> Self {
        Self {
            phase: WorkflowPhase::Uninitialized,
            definition: WorkflowDefinition::for_kind(kind),
            session: None,
            reconciler: StepResultReconciler::new(),
            step_result: None,
            submission: None,
            loading: false,
            error: None,
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Build the session from a "start workflow" response.
    ///
    /// Returns `false` (and leaves the machine untouched) when a session
    /// already exists; `reset` must come first.  A start response naming a
    /// step outside the step list is rejected through `set_error`.
    pub fn initialize(&mut self, init: &WorkflowInit) -> bool {
        if self.phase != WorkflowPhase::Uninitialized {
            log::warn!(
                "workflow: ignoring duplicate initialize for session {}",
                init.session_id
            );
            return false;
        }

        let kind = self.definition.kind();
        let definition = WorkflowDefinition::with_steps(kind, init.workflow_steps.clone());
        if !definition.contains(&init.current_step) {
            self.set_error(Some(format!(
                "server started on unknown step `{}`",
                init.current_step
            )));
            return false;
        }

        let mut draft = Draft::empty(kind);
        if let Some(data) = &init.workflow_data {
            self.reconciler.merge_snapshot(&mut draft, data);
        }

        let step_prompt = prompt_or_default(kind, &init.current_step, &init.step_prompt);
        log::info!(
            "workflow: session {} started on step {}",
            init.session_id,
            init.current_step
        );

        self.definition = definition;
        self.session = Some(Session {
            session_id: init.session_id.clone(),
            current_step: init.current_step.clone(),
            completed_steps: init.completed_steps.clone(),
            step_prompt,
            draft,
            status: SessionStatus::InProgress,
        });
        self.phase = WorkflowPhase::Active;
        self.loading = false;
        self.error = None;
        true
    }

    /// Merge a processed utterance into the draft.
    ///
    /// Parsed fields overwrite, absent fields are kept.  On an invoice's
    /// `line_item` step the flat item fields become the pending line item.
    /// The server's completed-step list replaces the local one when present.
    /// The current step never changes here.
    pub fn apply_step_result(&mut self, result: StepResult) {
        let Some(session) = self.session.as_mut() else {
            log::warn!("workflow: step result arrived without a session");
            return;
        };

        let line_item_step = result
            .step
            .as_ref()
            .unwrap_or(&session.current_step)
            .as_str()
            == StepId::LINE_ITEM;
        match session.draft.as_invoice_mut() {
            Some(invoice) if line_item_step => {
                let mut rest = result.parsed_data.clone();
                if let Err(e) = invoice.stage_line_item(&mut rest) {
                    log::warn!("workflow: {e}");
                }
                self.reconciler.merge_parsed(&mut session.draft, &rest);
            }
            _ => {
                self.reconciler
                    .merge_parsed(&mut session.draft, &result.parsed_data);
            }
        }
        if let Some(completed) = &result.completed_steps {
            session.completed_steps = completed.clone();
        }

        log::debug!(
            "workflow: step {} heard {:?} ({} fields)",
            session.current_step,
            result.transcript,
            result.parsed_data.len()
        );
        self.step_result = Some(result);
        self.error = None;
    }

    /// Authoritative advance: adopt the server's current step, completed
    /// steps and prompt, and drop the transient step result.
    ///
    /// Returns `false` when there is no session or the server named a step
    /// outside the step list; in the latter case the error is set.
    pub fn confirm_step(&mut self, transition: &StepTransition) -> bool {
        if self.session.is_none() {
            log::warn!("workflow: confirm arrived without a session");
            return false;
        }
        if !self.definition.contains(&transition.current_step) {
            self.set_error(Some(format!(
                "server moved to unknown step `{}`",
                transition.current_step
            )));
            return false;
        }

        let kind = self.definition.kind();
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        session.current_step = transition.current_step.clone();
        session.completed_steps = transition.completed_steps.clone();
        session.step_prompt =
            prompt_or_default(kind, &transition.current_step, &transition.step_prompt);
        if let (Some(items), Some(invoice)) =
            (&transition.line_items, session.draft.as_invoice_mut())
        {
            invoice.commit_line_items(items.clone());
        }
        if let Some(data) = &transition.workflow_data {
            self.reconciler.merge_snapshot(&mut session.draft, data);
        }
        if session.current_step.is_complete() {
            session.status = SessionStatus::Completed;
        }

        log::debug!("workflow: now on step {}", session.current_step);
        self.step_result = None;
        self.error = None;
        true
    }

    /// Optimistic local edit.  The caller issues the remote update and
    /// reverts with [`restore_draft_field`](Self::restore_draft_field) if it
    /// fails; nothing here rolls back on its own.
    pub fn update_draft_field(&mut self, updates: &Map<String, Value>) -> Vec<DraftFieldError> {
        match self.session.as_mut() {
            Some(session) => self.reconciler.apply_local_edit(&mut session.draft, updates),
            None => {
                log::warn!("workflow: edit without a session");
                Vec::new()
            }
        }
    }

    /// The server accepted the edit of `field`; snapshots may overwrite it
    /// again.
    pub fn acknowledge_field(&mut self, field: &str) {
        self.reconciler.acknowledge(field);
    }

    /// Put `field` back to `previous` (unset when `None`) and forget the
    /// pending edit.
    pub fn restore_draft_field(&mut self, field: &str, previous: Option<Value>) {
        self.reconciler.acknowledge(field);
        if let Some(session) = self.session.as_mut() {
            let value = previous.unwrap_or(Value::Null);
            if let Err(e) = session.draft.set_field(field, &value) {
                log::warn!("workflow: could not restore draft field: {e}");
            }
        }
    }

    /// Adopt the item list left after a clear.  `keep_pending` leaves the
    /// item awaiting confirmation in place.
    pub fn apply_line_items(&mut self, items: Vec<LineItem>, keep_pending: bool) {
        let Some(invoice) = self
            .session
            .as_mut()
            .and_then(|s| s.draft.as_invoice_mut())
        else {
            log::warn!("workflow: line items without an invoice session");
            return;
        };
        if keep_pending {
            invoice.line_items = items;
        } else {
            invoice.commit_line_items(items);
        }
        self.error = None;
    }

    /// Apply a server snapshot of the draft; pending local edits win.
    pub fn reconcile_snapshot(&mut self, snapshot: &Map<String, Value>) {
        if let Some(session) = self.session.as_mut() {
            self.reconciler.merge_snapshot(&mut session.draft, snapshot);
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Set or clear the error message.  Loading is cleared either way.
    pub fn set_error(&mut self, message: Option<String>) {
        if let Some(msg) = &message {
            log::error!("workflow error: {msg}");
        }
        self.error = message;
        self.loading = false;
    }

    /// Enter `Submitting`.  Allowed from `Active`, and from `Error` to retry.
    pub fn begin_submit(&mut self) -> bool {
        if self.session.is_none()
            || !matches!(self.phase, WorkflowPhase::Active | WorkflowPhase::Error)
        {
            log::warn!("workflow: cannot submit from {:?}", self.phase);
            return false;
        }
        self.phase = WorkflowPhase::Submitting;
        self.loading = true;
        self.error = None;
        true
    }

    pub fn complete_submit(&mut self, result: SubmissionResult) {
        let kind = self.definition.kind();
        let complete = StepId::from(StepId::COMPLETE);
        let has_complete_step = self.definition.contains(&complete);

        if let Some(session) = self.session.as_mut() {
            session.status = SessionStatus::Completed;
            if has_complete_step {
                session.step_prompt = kind.default_prompt(&complete).to_string();
                session.current_step = complete;
            }
        }

        log::info!("workflow: submitted as {}", result.entity_id);
        self.submission = Some(result);
        self.phase = WorkflowPhase::Completed;
        self.step_result = None;
        self.loading = false;
        self.error = None;
    }

    pub fn fail_submit(&mut self, message: String) {
        if let Some(session) = self.session.as_mut() {
            session.status = SessionStatus::Error;
        }
        self.phase = WorkflowPhase::Error;
        self.set_error(Some(message));
    }

    /// Discard the session and return to `Uninitialized`.
    pub fn reset(&mut self) {
        *self = Self::new(self.definition.kind());
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn kind(&self) -> WorkflowKind {
        self.definition.kind()
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn current_step(&self) -> Option<&StepId> {
        self.session.as_ref().map(|s| &s.current_step)
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.session.as_ref().map(|s| &s.draft)
    }

    /// Current value of one draft field.
    pub fn field_value(&self, field: &str) -> Option<Value> {
        self.draft().and_then(|d| d.get(field))
    }

    pub fn step_result(&self) -> Option<&StepResult> {
        self.step_result.as_ref()
    }

    /// Transcript of the unconfirmed utterance, if any.
    pub fn transcript(&self) -> Option<&str> {
        self.step_result.as_ref().map(|r| r.transcript.as_str())
    }

    pub fn submission(&self) -> Option<&SubmissionResult> {
        self.submission.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn navigation(&self) -> NavigationState {
        match &self.session {
            Some(s) => StepNavigator::new(self.definition.steps())
                .state(&s.current_step, &s.completed_steps),
            None => NavigationState::default(),
        }
    }
}

fn prompt_or_default(kind: WorkflowKind, step: &StepId, prompt: &str) -> String {
    if prompt.trim().is_empty() {
        kind.default_prompt(step).to_string()
    } else {
        prompt.to_string()
    }
}

// ---------------------------------------------------------------------------
// SharedWorkflow
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`WorkflowStateMachine`].
///
/// Lock for a short critical section; do **not** hold the lock across
/// `.await` points.
pub type SharedWorkflow = Arc<Mutex<WorkflowStateMachine>>;

pub fn new_shared_workflow(kind: WorkflowKind) -> SharedWorkflow {
    Arc::new(Mutex::new(WorkflowStateMachine::new(kind)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
