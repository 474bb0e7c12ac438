//! Step-based workflow engine.
//!
//! * [`WorkflowStateMachine`]: pure session state and its transitions.
//! * [`WorkflowOrchestrator`]: runs remote calls and feeds the results in.
//! * [`StepNavigator`]: back/forward rules over the step list.
//! * [`StepResultReconciler`]: merges server field values into the draft.
//! * [`Draft`] / [`ContactDraft`] / [`InvoiceDraft`]: typed drafts.
//! * [`WorkflowKind`] / [`WorkflowDefinition`] / [`StepId`]: step lists.

pub mod draft;
pub mod navigator;
pub mod reconcile;
pub mod runner;
pub mod state;
pub mod step;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use draft::{
    ContactDraft, Draft, DraftFieldError, InvoiceDraft, InvoiceTotals, LineItem, VatRate,
};
pub use navigator::{NavigationState, StepNavigator};
pub use reconcile::StepResultReconciler;
pub use runner::{ContactResolution, WorkflowError, WorkflowOrchestrator};
pub use state::{
    new_shared_workflow, Session, SessionStatus, SharedWorkflow, WorkflowPhase,
    WorkflowStateMachine,
};
pub use step::{StepId, WorkflowDefinition, WorkflowKind};
