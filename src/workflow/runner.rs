//! Workflow orchestrator: performs the remote calls and feeds the
//! responses into the shared [`WorkflowStateMachine`].
//!
//! # Flow
//!
//! ```text
//! start()                → GET  {p}/new            → initialize
//! process_recording(a)   → POST {p}/step           → apply_step_result
//! confirm()              → POST {p}/confirm-step   → confirm_step
//! go_back / go_forward   → POST {p}/go-to-step     → confirm_step
//! add_another_item()     → POST /invoice/add-another-item       → confirm_step
//! confirm_line_item(b)   → POST /invoice/confirm-line-item      → confirm_step
//! clear_line_item(i)     → POST /invoice/clear-line-item        → apply_line_items
//! clear_all_line_items() → POST /invoice/clear-all-line-items   → apply_line_items
//! update_field(f, v)     → update_draft_field, POST {p}/update-field
//!                            ├─ Ok  → acknowledge_field
//!                            └─ Err → restore_draft_field
//! submit()               → begin_submit, POST {p}/submit-to-xero
//!                            → complete_submit | fail_submit
//! ```
//!
//! Only one remote call may be outstanding at a time; an overlapping call is
//! rejected with [`WorkflowError::RequestInFlight`] and changes nothing.
//! Every remote failure lands in the state machine's error field with
//! loading cleared, and the prior state is otherwise left as it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use super::draft::DraftFieldError;
use super::navigator::StepNavigator;
use super::state::{SharedWorkflow, WorkflowStateMachine};
use super::step::{StepId, WorkflowKind};
use crate::api::{
    ApiError, LineItemList, StepResult, StepTransition, SubmissionResult, WorkflowApi,
    WorkflowSummary,
};
use crate::capture::{CaptureArtifact, CaptureError};
use crate::entity::{EntityMatcher, ReferenceEntity};

// ---------------------------------------------------------------------------
// WorkflowError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no workflow session has been started")]
    NotInitialized,

    /// `start` while a session is open; abandon it first.
    #[error("session {0} is already open")]
    AlreadyStarted(String),

    /// Another remote call is still outstanding.
    #[error("another request is still in progress")]
    RequestInFlight,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("cannot navigate: {0}")]
    Navigation(String),

    #[error(transparent)]
    Field(#[from] DraftFieldError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("recording too short ({0:.1} s), hold the key a little longer")]
    RecordingTooShort(f32),
}

/// Outcome of matching a spoken contact name against the reference list.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactResolution {
    /// The contact was found and written into the draft.
    Matched(ReferenceEntity),
    /// Nothing matched; the user should pick one of these by hand.
    NotFound { candidates: Vec<ReferenceEntity> },
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Identifies the session a remote call acts on.
struct SessionRef {
    kind: WorkflowKind,
    session_id: String,
    current_step: StepId,
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// Drives one workflow session against a [`WorkflowApi`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voice_workflow::api::HttpWorkflowClient;
/// use voice_workflow::config::AppConfig;
/// use voice_workflow::workflow::{new_shared_workflow, WorkflowOrchestrator};
///
/// # async fn example() -> Result<(), voice_workflow::workflow::WorkflowError> {
/// let config = AppConfig::default();
/// let state = new_shared_workflow(config.workflow.kind);
/// let api = Arc::new(HttpWorkflowClient::from_config(&config.server));
///
/// let orchestrator = WorkflowOrchestrator::new(api, state);
/// orchestrator.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct WorkflowOrchestrator {
    api: Arc<dyn WorkflowApi>,
    state: SharedWorkflow,
    in_flight: AtomicBool,
    min_recording: Duration,
}

impl WorkflowOrchestrator {
    pub fn new(api: Arc<dyn WorkflowApi>, state: SharedWorkflow) -> Self {
        Self {
            api,
            state,
            in_flight: AtomicBool::new(false),
            min_recording: Duration::ZERO,
        }
    }

    /// Recordings shorter than `min` are rejected before upload.
    pub fn with_min_recording(mut self, min: Duration) -> Self {
        self.min_recording = min;
        self
    }

    pub fn state(&self) -> SharedWorkflow {
        Arc::clone(&self.state)
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Open a new session on the server.  Fails without a remote call while
    /// a session is already open.
    pub async fn start(&self) -> Result<(), WorkflowError> {
        let _guard = self.begin()?;
        let kind = {
            let mut st = self.lock();
            if let Some(id) = st.session_id() {
                log::warn!("workflow: start ignored, session {id} is open");
                return Err(WorkflowError::AlreadyStarted(id.to_string()));
            }
            st.set_loading(true);
            st.kind()
        };

        let init = match self.api.start_workflow(kind).await {
            Ok(init) => init,
            Err(e) => return self.fail(e),
        };

        let mut st = self.lock();
        if st.initialize(&init) {
            return Ok(());
        }
        st.set_loading(false);
        match st.error() {
            Some(msg) => Err(WorkflowError::Navigation(msg.to_string())),
            None => Ok(()),
        }
    }

    /// Throw the session away locally.
    pub fn abandon(&self) {
        log::info!("workflow: session abandoned");
        self.lock().reset();
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Upload a finished recording for the current step.
    pub async fn process_recording(
        &self,
        artifact: &CaptureArtifact,
    ) -> Result<StepResult, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.session_ref()?;
        if artifact.duration < self.min_recording {
            let secs = artifact.duration.as_secs_f32();
            let err = WorkflowError::RecordingTooShort(secs);
            self.lock().set_error(Some(err.to_string()));
            return Err(err);
        }
        self.lock().set_loading(true);

        match self
            .api
            .process_step(
                session.kind,
                &session.session_id,
                &session.current_step,
                &artifact.path,
            )
            .await
        {
            Ok(result) => {
                let mut st = self.lock();
                st.apply_step_result(result.clone());
                st.set_loading(false);
                Ok(result)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Accept the current step's result and let the server advance.
    pub async fn confirm(&self) -> Result<StepId, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.session_ref()?;
        self.lock().set_loading(true);

        match self.api.confirm_step(session.kind, &session.session_id).await {
            Ok(transition) => self.apply_transition(transition),
            Err(e) => self.fail(e),
        }
    }

    pub async fn go_back(&self) -> Result<StepId, WorkflowError> {
        let target = {
            let st = self.lock();
            let session = st.session().ok_or(WorkflowError::NotInitialized)?;
            StepNavigator::new(st.definition().steps())
                .previous(&session.current_step)
                .cloned()
                .ok_or_else(|| WorkflowError::Navigation("already on the first step".into()))?
        };
        self.go_to(target).await
    }

    pub async fn go_forward(&self) -> Result<StepId, WorkflowError> {
        let target = {
            let st = self.lock();
            let session = st.session().ok_or(WorkflowError::NotInitialized)?;
            StepNavigator::new(st.definition().steps())
                .next(&session.current_step, &session.completed_steps)
                .cloned()
                .ok_or_else(|| {
                    WorkflowError::Navigation(format!(
                        "step `{}` has not been completed",
                        session.current_step
                    ))
                })?
        };
        self.go_to(target).await
    }

    /// Jump to `target`: any earlier step, or the next one when going
    /// forward is allowed.
    pub async fn go_to(&self, target: StepId) -> Result<StepId, WorkflowError> {
        self.check_reachable(&target)?;

        let _guard = self.begin()?;
        let session = self.session_ref()?;
        self.lock().set_loading(true);

        match self
            .api
            .go_to_step(session.kind, &session.session_id, &target)
            .await
        {
            Ok(transition) => self.apply_transition(transition),
            Err(e) => self.fail(e),
        }
    }

    fn check_reachable(&self, target: &StepId) -> Result<(), WorkflowError> {
        let st = self.lock();
        let session = st.session().ok_or(WorkflowError::NotInitialized)?;
        let definition = st.definition();

        let Some(to) = definition.position(target) else {
            return Err(WorkflowError::Navigation(format!("unknown step `{target}`")));
        };
        let from = definition.position(&session.current_step).unwrap_or(0);
        let next = StepNavigator::new(definition.steps())
            .next(&session.current_step, &session.completed_steps);

        if to < from || next == Some(target) {
            Ok(())
        } else {
            Err(WorkflowError::Navigation(format!(
                "step `{target}` is not reachable from `{}`",
                session.current_step
            )))
        }
    }

    // -----------------------------------------------------------------------
    // Draft edits
    // -----------------------------------------------------------------------

    /// Edit one draft field: applied locally at once, then sent to the
    /// server.  A failed send puts the previous value back.
    ///
    /// Returns whether the server reported the field as updated.
    pub async fn update_field(&self, field: &str, value: Value) -> Result<bool, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.session_ref()?;

        let previous = {
            let mut st = self.lock();
            let previous = st.field_value(field);
            let mut updates = Map::new();
            updates.insert(field.to_string(), value.clone());
            if let Some(rejected) = st.update_draft_field(&updates).into_iter().next() {
                st.set_error(Some(rejected.to_string()));
                return Err(rejected.into());
            }
            st.set_loading(true);
            previous
        };

        match self
            .api
            .update_field(session.kind, &session.session_id, field, &value)
            .await
        {
            Ok(update) => {
                let mut st = self.lock();
                if update.updated {
                    st.acknowledge_field(field);
                } else {
                    log::warn!("workflow: server left `{field}` unchanged, reverting");
                    st.restore_draft_field(field, previous);
                }
                st.set_loading(false);
                Ok(update.updated)
            }
            Err(e) => {
                self.lock().restore_draft_field(field, previous);
                self.fail(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    /// Match a spoken contact name against the server's contacts.  A match
    /// is written into the draft as `contact_id` and `contact_name`.
    pub async fn resolve_contact(&self, spoken: &str) -> Result<ContactResolution, WorkflowError> {
        let contacts = {
            let _guard = self.begin()?;
            self.session_ref()?;
            self.lock().set_loading(true);
            match self.api.list_contacts().await {
                Ok(contacts) => contacts,
                Err(e) => return self.fail(e),
            }
        };
        self.lock().set_loading(false);

        let matched = EntityMatcher::new(&contacts).find(spoken).cloned();
        match matched {
            Some(entity) => {
                log::info!("workflow: `{spoken}` matched contact {}", entity.name);
                self.select_contact(&entity).await?;
                Ok(ContactResolution::Matched(entity))
            }
            None => {
                log::info!("workflow: no contact matches `{spoken}`");
                Ok(ContactResolution::NotFound {
                    candidates: contacts,
                })
            }
        }
    }

    /// Write a chosen contact into the draft.
    pub async fn select_contact(&self, entity: &ReferenceEntity) -> Result<(), WorkflowError> {
        self.update_field("contact_id", Value::String(entity.id.clone()))
            .await?;
        self.update_field("contact_name", Value::String(entity.name.clone()))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invoice line items
    // -----------------------------------------------------------------------

    pub async fn add_another_item(&self) -> Result<StepId, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.invoice_session_ref()?;
        self.lock().set_loading(true);

        match self.api.add_another_item(&session.session_id).await {
            Ok(transition) => self.apply_transition(transition),
            Err(e) => self.fail(e),
        }
    }

    pub async fn proceed_to_review(&self) -> Result<StepId, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.invoice_session_ref()?;
        self.lock().set_loading(true);

        match self.api.proceed_to_review(&session.session_id).await {
            Ok(transition) => self.apply_transition(transition),
            Err(e) => self.fail(e),
        }
    }

    /// Keep the pending item, then stay for another (`add_another`) or go
    /// to review.
    pub async fn confirm_line_item(&self, add_another: bool) -> Result<StepId, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.invoice_session_ref()?;
        self.lock().set_loading(true);

        match self
            .api
            .confirm_line_item(&session.session_id, add_another)
            .await
        {
            Ok(transition) => self.apply_transition(transition),
            Err(e) => self.fail(e),
        }
    }

    /// Remove the confirmed item at `index` (zero-based).  The pending item
    /// is kept.  Returns the number of confirmed items left.
    pub async fn clear_line_item(&self, index: usize) -> Result<usize, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.invoice_session_ref()?;
        self.lock().set_loading(true);

        match self.api.clear_line_item(&session.session_id, index).await {
            Ok(list) => Ok(self.apply_line_items(list, true)),
            Err(e) => self.fail(e),
        }
    }

    /// Remove every item, the pending one included.
    pub async fn clear_all_line_items(&self) -> Result<usize, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.invoice_session_ref()?;
        self.lock().set_loading(true);

        match self.api.clear_all_line_items(&session.session_id).await {
            Ok(list) => Ok(self.apply_line_items(list, false)),
            Err(e) => self.fail(e),
        }
    }

    // -----------------------------------------------------------------------
    // Summary / submit
    // -----------------------------------------------------------------------

    pub async fn refresh_summary(&self) -> Result<WorkflowSummary, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.session_ref()?;
        self.lock().set_loading(true);

        match self.api.get_summary(session.kind, &session.session_id).await {
            Ok(summary) => {
                self.lock().set_loading(false);
                Ok(summary)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Create the entity in the accounting system.
    pub async fn submit(&self) -> Result<SubmissionResult, WorkflowError> {
        let _guard = self.begin()?;
        let session = self.session_ref()?;
        if !self.lock().begin_submit() {
            return Err(WorkflowError::Navigation(
                "the workflow is not ready to submit".into(),
            ));
        }

        match self.api.submit(session.kind, &session.session_id).await {
            Ok(result) => {
                self.lock().complete_submit(result.clone());
                Ok(result)
            }
            Err(e) => {
                self.lock().fail_submit(e.to_string());
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, WorkflowStateMachine> {
        self.state.lock().unwrap()
    }

    fn begin(&self) -> Result<InFlight<'_>, WorkflowError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| {
                log::debug!("workflow: rejecting overlapping request");
                WorkflowError::RequestInFlight
            })
    }

    fn session_ref(&self) -> Result<SessionRef, WorkflowError> {
        let st = self.lock();
        let session = st.session().ok_or(WorkflowError::NotInitialized)?;
        Ok(SessionRef {
            kind: st.kind(),
            session_id: session.session_id.clone(),
            current_step: session.current_step.clone(),
        })
    }

    fn invoice_session_ref(&self) -> Result<SessionRef, WorkflowError> {
        let session = self.session_ref()?;
        if session.kind != WorkflowKind::Invoice {
            return Err(WorkflowError::Navigation(
                "line items only exist on invoices".into(),
            ));
        }
        Ok(session)
    }

    fn apply_transition(&self, transition: StepTransition) -> Result<StepId, WorkflowError> {
        let mut st = self.lock();
        if st.confirm_step(&transition) {
            st.set_loading(false);
            return Ok(transition.current_step);
        }
        st.set_loading(false);
        let msg = st.error().unwrap_or("step change was not applied").to_string();
        Err(WorkflowError::Navigation(msg))
    }

    fn apply_line_items(&self, list: LineItemList, keep_pending: bool) -> usize {
        let count = list.line_items.len();
        if count != list.item_count {
            log::warn!(
                "workflow: server counted {} items but sent {count}",
                list.item_count
            );
        }
        let mut st = self.lock();
        st.apply_line_items(list.line_items, keep_pending);
        st.set_loading(false);
        count
    }

    fn fail<T>(&self, e: ApiError) -> Result<T, WorkflowError> {
        self.lock().set_error(Some(e.to_string()));
        Err(e.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ErrorCode, FieldUpdate, WorkflowInit};
    use crate::workflow::draft::{InvoiceDraft, LineItem};
    use crate::workflow::state::{new_shared_workflow, WorkflowPhase};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Scripted workflow service.  Transitions are served in order; a queued
    /// failure is returned by the next call of any kind.
    #[derive(Default)]
    struct MockApi {
        first_step: String,
        step_result: Mutex<Option<StepResult>>,
        transitions: Mutex<VecDeque<StepTransition>>,
        failure: Mutex<Option<ApiError>>,
        field_updated: Option<bool>,
        contacts: Vec<ReferenceEntity>,
        gate: Option<Arc<Notify>>,
        /// Confirmed invoice items as the server holds them.
        items: Mutex<Vec<LineItem>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn starting_at(step: &str) -> Self {
            Self {
                first_step: step.into(),
                ..Default::default()
            }
        }

        fn then_transition(self, step: &str, completed: &[&str]) -> Self {
            self.transitions.lock().unwrap().push_back(StepTransition {
                current_step: step.into(),
                step_prompt: String::new(),
                completed_steps: completed.iter().map(|s| StepId::from(*s)).collect(),
                workflow_data: None,
                line_items: None,
            });
            self
        }

        /// Like `then_transition`, also sending the server's item list.
        fn then_items(self, step: &str, completed: &[&str], items: Vec<LineItem>) -> Self {
            let this = self.then_transition(step, completed);
            if let Some(last) = this.transitions.lock().unwrap().back_mut() {
                last.line_items = Some(items);
            }
            this
        }

        fn hears(&self, result: StepResult) {
            *self.step_result.lock().unwrap() = Some(result);
        }

        fn item_list(&self) -> LineItemList {
            let line_items = self.items.lock().unwrap().clone();
            LineItemList {
                item_count: line_items.len(),
                line_items,
            }
        }

        fn fail_next(&self, e: ApiError) {
            *self.failure.lock().unwrap() = Some(e);
        }

        fn record(&self, call: &str) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(call.to_string());
            match self.failure.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn next_transition(&self) -> Result<StepTransition, ApiError> {
            self.transitions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(ApiError::MissingData)
        }
    }

    #[async_trait]
    impl WorkflowApi for MockApi {
        async fn start_workflow(&self, _kind: WorkflowKind) -> Result<WorkflowInit, ApiError> {
            self.record("start")?;
            Ok(WorkflowInit {
                session_id: "s-1".into(),
                current_step: self.first_step.as_str().into(),
                step_prompt: String::new(),
                completed_steps: Vec::new(),
                workflow_steps: Vec::new(),
                workflow_data: None,
            })
        }

        async fn process_step(
            &self,
            _kind: WorkflowKind,
            _session_id: &str,
            step: &StepId,
            _audio: &Path,
        ) -> Result<StepResult, ApiError> {
            self.record(&format!("step:{step}"))?;
            Ok(self.step_result.lock().unwrap().clone().unwrap_or_default())
        }

        async fn confirm_step(
            &self,
            _kind: WorkflowKind,
            _session_id: &str,
        ) -> Result<StepTransition, ApiError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.record("confirm")?;
            self.next_transition()
        }

        async fn go_to_step(
            &self,
            _kind: WorkflowKind,
            _session_id: &str,
            step: &StepId,
        ) -> Result<StepTransition, ApiError> {
            self.record(&format!("go_to:{step}"))?;
            self.next_transition()
        }

        async fn update_field(
            &self,
            _kind: WorkflowKind,
            _session_id: &str,
            field: &str,
            value: &Value,
        ) -> Result<FieldUpdate, ApiError> {
            self.record(&format!("update:{field}"))?;
            Ok(FieldUpdate {
                field: Some(field.to_string()),
                value: Some(value.clone()),
                updated: self.field_updated.unwrap_or(true),
            })
        }

        async fn get_summary(
            &self,
            _kind: WorkflowKind,
            _session_id: &str,
        ) -> Result<WorkflowSummary, ApiError> {
            self.record("summary")?;
            Ok(WorkflowSummary::Contact(Default::default()))
        }

        async fn submit(
            &self,
            _kind: WorkflowKind,
            _session_id: &str,
        ) -> Result<SubmissionResult, ApiError> {
            self.record("submit")?;
            Ok(SubmissionResult {
                entity_id: "inv-1".into(),
                number: Some("INV-0001".into()),
                external_url: None,
            })
        }

        async fn list_contacts(&self) -> Result<Vec<ReferenceEntity>, ApiError> {
            self.record("contacts")?;
            Ok(self.contacts.clone())
        }

        async fn add_another_item(&self, _session_id: &str) -> Result<StepTransition, ApiError> {
            self.record("add_item")?;
            self.next_transition()
        }

        async fn proceed_to_review(&self, _session_id: &str) -> Result<StepTransition, ApiError> {
            self.record("review")?;
            self.next_transition()
        }

        async fn confirm_line_item(
            &self,
            _session_id: &str,
            add_another: bool,
        ) -> Result<StepTransition, ApiError> {
            self.record(&format!("confirm_item:{add_another}"))?;
            self.next_transition()
        }

        async fn clear_line_item(
            &self,
            _session_id: &str,
            index: usize,
        ) -> Result<LineItemList, ApiError> {
            self.record(&format!("clear_item:{index}"))?;
            let mut items = self.items.lock().unwrap();
            if index < items.len() {
                items.remove(index);
            }
            drop(items);
            Ok(self.item_list())
        }

        async fn clear_all_line_items(&self, _session_id: &str) -> Result<LineItemList, ApiError> {
            self.record("clear_items")?;
            self.items.lock().unwrap().clear();
            Ok(self.item_list())
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn artifact(secs: f32) -> CaptureArtifact {
        CaptureArtifact {
            path: PathBuf::from("/tmp/recording.wav"),
            duration: Duration::from_secs_f32(secs),
            sample_rate: 16_000,
        }
    }

    async fn started(kind: WorkflowKind, api: MockApi) -> (WorkflowOrchestrator, Arc<MockApi>) {
        let api = Arc::new(api);
        let orc = WorkflowOrchestrator::new(api.clone(), new_shared_workflow(kind))
            .with_min_recording(Duration::from_millis(500));
        orc.start().await.unwrap();
        (orc, api)
    }

    fn spoken_item(description: &str, quantity: &str, unit_price: &str) -> StepResult {
        StepResult {
            step: Some(StepId::LINE_ITEM.into()),
            transcript: format!("{quantity} {description} at {unit_price} each"),
            parsed_data: json!({
                "description": description,
                "quantity": quantity,
                "unit_price": unit_price,
                "account_code": "200",
                "vat_rate": "standard"
            })
            .as_object()
            .cloned()
            .unwrap(),
            ..Default::default()
        }
    }

    fn item(description: &str, quantity: f64, unit_price: f64) -> LineItem {
        LineItem {
            account_code: Some("200".into()),
            ..LineItem::new(description, quantity, unit_price)
        }
    }

    fn invoice_draft(orc: &WorkflowOrchestrator) -> InvoiceDraft {
        let state = orc.state();
        let st = state.lock().unwrap();
        st.draft().and_then(|d| d.as_invoice()).cloned().unwrap()
    }

    fn session_error(msg: &str) -> ApiError {
        ApiError::Remote {
            code: ErrorCode::Session,
            message: msg.into(),
            field: None,
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn start_initializes_session() {
        let (orc, _api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;
        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.phase(), WorkflowPhase::Active);
        assert_eq!(st.current_step().unwrap(), "name");
        assert!(!st.is_loading());
    }

    #[tokio::test]
    async fn start_failure_sets_error_and_clears_loading() {
        let api = MockApi::starting_at("name");
        api.fail_next(ApiError::Timeout);
        let orc = WorkflowOrchestrator::new(Arc::new(api), new_shared_workflow(WorkflowKind::Contact));

        assert!(matches!(orc.start().await, Err(WorkflowError::Api(ApiError::Timeout))));
        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.phase(), WorkflowPhase::Uninitialized);
        assert_eq!(st.error(), Some("workflow request timed out"));
        assert!(!st.is_loading());
    }

    #[tokio::test]
    async fn second_start_makes_no_remote_call() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;

        let err = orc.start().await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyStarted(ref id) if id == "s-1"));
        assert_eq!(api.calls(), vec!["start"]);

        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.session_id(), Some("s-1"));
        assert!(!st.is_loading());
        assert!(st.error().is_none());
    }

    #[tokio::test]
    async fn start_after_abandon_opens_a_new_session() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;
        orc.abandon();
        orc.start().await.unwrap();
        assert_eq!(api.calls(), vec!["start", "start"]);
    }

    #[tokio::test]
    async fn calls_before_start_are_rejected() {
        let orc = WorkflowOrchestrator::new(
            Arc::new(MockApi::starting_at("name")),
            new_shared_workflow(WorkflowKind::Contact),
        );
        assert!(matches!(orc.confirm().await, Err(WorkflowError::NotInitialized)));
    }

    #[tokio::test]
    async fn recording_flows_into_draft_then_confirm_advances() {
        let api = MockApi::starting_at("name").then_transition("email", &["name"]);
        *api.step_result.lock().unwrap() = Some(StepResult {
            transcript: "John Smith".into(),
            parsed_data: json!({"name": "John Smith"}).as_object().cloned().unwrap(),
            requires_confirmation: true,
            ..Default::default()
        });
        let (orc, api) = started(WorkflowKind::Contact, api).await;

        let result = orc.process_recording(&artifact(2.0)).await.unwrap();
        assert_eq!(result.transcript, "John Smith");
        {
            let state = orc.state();
            let st = state.lock().unwrap();
            assert_eq!(st.field_value("name"), Some(json!("John Smith")));
            assert_eq!(st.current_step().unwrap(), "name");
        }

        assert_eq!(orc.confirm().await.unwrap(), "email");
        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.current_step().unwrap(), "email");
        assert!(st.transcript().is_none());
        assert_eq!(api.calls(), vec!["start", "step:name", "confirm"]);
    }

    #[tokio::test]
    async fn short_recording_is_not_uploaded() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;

        let err = orc.process_recording(&artifact(0.2)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::RecordingTooShort(_)));
        assert_eq!(api.calls(), vec!["start"]);
        assert!(orc.state().lock().unwrap().error().is_some());
    }

    #[tokio::test]
    async fn short_recording_during_a_call_does_not_touch_its_state() {
        let gate = Arc::new(Notify::new());
        let mut api = MockApi::starting_at("name").then_transition("email", &["name"]);
        api.gate = Some(gate.clone());
        let (orc, api) = started(WorkflowKind::Contact, api).await;

        let (first, second, _) = tokio::join!(
            orc.confirm(),
            async {
                let st = orc.state();
                let loading = st.lock().unwrap().is_loading();
                let result = orc.process_recording(&artifact(0.2)).await;
                let st = st.lock().unwrap();
                (result, loading, st.is_loading(), st.error().map(str::to_string))
            },
            async {
                gate.notify_one();
            }
        );

        let (result, loading_before, loading_after, error_after) = second;
        assert!(matches!(result, Err(WorkflowError::RequestInFlight)));
        assert!(loading_before);
        assert!(loading_after);
        assert_eq!(error_after, None);
        assert_eq!(first.unwrap(), "email");
        assert_eq!(api.calls(), vec!["start", "confirm"]);
    }

    #[tokio::test]
    async fn remote_failure_keeps_prior_state() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;
        api.fail_next(session_error("Session expired"));

        let err = orc.confirm().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Api(ApiError::Remote { .. })));

        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.current_step().unwrap(), "name");
        assert_eq!(st.error(), Some("Session expired"));
        assert!(!st.is_loading());
    }

    #[tokio::test]
    async fn overlapping_calls_are_rejected() {
        let gate = Arc::new(Notify::new());
        let mut api = MockApi::starting_at("name").then_transition("email", &["name"]);
        api.gate = Some(gate.clone());
        let (orc, api) = started(WorkflowKind::Contact, api).await;

        let (first, second, _) = tokio::join!(orc.confirm(), orc.confirm(), async {
            gate.notify_one();
        });

        assert_eq!(first.unwrap(), "email");
        assert!(matches!(second, Err(WorkflowError::RequestInFlight)));
        assert_eq!(api.calls(), vec!["start", "confirm"]);

        // The guard is released once the first call finishes.
        assert!(!matches!(orc.refresh_summary().await, Err(WorkflowError::RequestInFlight)));
    }

    #[tokio::test]
    async fn back_and_forward_use_go_to_step() {
        let api = MockApi::starting_at("email")
            .then_transition("name", &["name"])
            .then_transition("email", &["name"]);
        let (orc, api) = started(WorkflowKind::Contact, api).await;

        assert_eq!(orc.go_back().await.unwrap(), "name");
        assert_eq!(orc.go_forward().await.unwrap(), "email");
        assert_eq!(api.calls(), vec!["start", "go_to:name", "go_to:email"]);
    }

    #[tokio::test]
    async fn forward_blocked_on_uncompleted_step() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;

        assert!(matches!(orc.go_forward().await, Err(WorkflowError::Navigation(_))));
        assert!(matches!(
            orc.go_to("address".into()).await,
            Err(WorkflowError::Navigation(_))
        ));
        assert_eq!(api.calls(), vec!["start"]);
    }

    #[tokio::test]
    async fn back_blocked_on_first_step() {
        let (orc, _api) = started(WorkflowKind::Contact, MockApi::starting_at("welcome")).await;
        assert!(matches!(orc.go_back().await, Err(WorkflowError::Navigation(_))));
    }

    #[tokio::test]
    async fn successful_edit_is_acknowledged() {
        let (orc, api) = started(WorkflowKind::Invoice, MockApi::starting_at("due_date")).await;

        assert!(orc.update_field("due_date", json!("2026-12-01")).await.unwrap());
        assert_eq!(
            orc.state().lock().unwrap().field_value("due_date"),
            Some(json!("2026-12-01"))
        );
        assert_eq!(api.calls(), vec!["start", "update:due_date"]);
    }

    #[tokio::test]
    async fn failed_edit_is_reverted() {
        let (orc, api) = started(WorkflowKind::Invoice, MockApi::starting_at("due_date")).await;
        orc.update_field("due_date", json!("2026-12-01")).await.unwrap();

        api.fail_next(ApiError::Request("connection reset".into()));
        assert!(orc.update_field("due_date", json!("2027-01-31")).await.is_err());

        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.field_value("due_date"), Some(json!("2026-12-01")));
        assert!(st.error().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn edit_the_server_did_not_apply_is_reverted() {
        let mut api = MockApi::starting_at("name");
        api.field_updated = Some(false);
        let (orc, _api) = started(WorkflowKind::Contact, api).await;

        assert!(!orc.update_field("city", json!("Leeds")).await.unwrap());
        assert_eq!(orc.state().lock().unwrap().field_value("city"), None);
    }

    #[tokio::test]
    async fn ill_typed_edit_never_reaches_server() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;
        let err = orc
            .update_field("is_organization", json!("perhaps"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Field(_)));
        assert_eq!(api.calls(), vec!["start"]);
    }

    #[tokio::test]
    async fn spoken_contact_is_matched_and_written() {
        let mut api = MockApi::starting_at("contact_name");
        api.contacts = vec![
            ReferenceEntity::new("c-1", "Globex Inc"),
            ReferenceEntity::new("c-2", "Acme Corp Ltd"),
        ];
        let (orc, api) = started(WorkflowKind::Invoice, api).await;

        let resolution = orc.resolve_contact("acme").await.unwrap();
        assert_eq!(
            resolution,
            ContactResolution::Matched(ReferenceEntity::new("c-2", "Acme Corp Ltd"))
        );

        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.field_value("contact_id"), Some(json!("c-2")));
        assert_eq!(st.field_value("contact_name"), Some(json!("Acme Corp Ltd")));
        assert_eq!(
            api.calls(),
            vec!["start", "contacts", "update:contact_id", "update:contact_name"]
        );
    }

    #[tokio::test]
    async fn unmatched_contact_offers_candidates() {
        let mut api = MockApi::starting_at("contact_name");
        api.contacts = vec![ReferenceEntity::new("c-1", "Acme")];
        let (orc, _api) = started(WorkflowKind::Invoice, api).await;

        match orc.resolve_contact("Bob").await.unwrap() {
            ContactResolution::NotFound { candidates } => assert_eq!(candidates.len(), 1),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(orc.state().lock().unwrap().field_value("contact_id").is_none());
    }

    #[tokio::test]
    async fn line_item_moves_are_invoice_only() {
        let (orc, api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;
        assert!(matches!(
            orc.add_another_item().await,
            Err(WorkflowError::Navigation(_))
        ));
        assert!(matches!(
            orc.confirm_line_item(true).await,
            Err(WorkflowError::Navigation(_))
        ));
        assert!(matches!(
            orc.clear_line_item(0).await,
            Err(WorkflowError::Navigation(_))
        ));
        assert!(matches!(
            orc.clear_all_line_items().await,
            Err(WorkflowError::Navigation(_))
        ));
        assert_eq!(api.calls(), vec!["start"]);
    }

    #[tokio::test]
    async fn invoice_line_item_moves() {
        let api = MockApi::starting_at("line_item")
            .then_transition("line_item", &["contact_name", "due_date"])
            .then_transition("review", &["contact_name", "due_date", "line_item"]);
        let (orc, _api) = started(WorkflowKind::Invoice, api).await;

        assert_eq!(orc.add_another_item().await.unwrap(), "line_item");
        assert_eq!(orc.proceed_to_review().await.unwrap(), "review");
    }

    #[tokio::test]
    async fn spoken_items_accumulate_across_add_another() {
        let api = MockApi::starting_at("line_item").then_items(
            "line_item",
            &["contact_name", "due_date"],
            vec![item("Widget", 2.0, 50.0)],
        );
        let (orc, api) = started(WorkflowKind::Invoice, api).await;

        api.hears(spoken_item("Widget", "2", "50.00"));
        orc.process_recording(&artifact(2.0)).await.unwrap();
        assert_eq!(
            invoice_draft(&orc).current_line_item,
            Some(item("Widget", 2.0, 50.0))
        );

        assert_eq!(orc.add_another_item().await.unwrap(), "line_item");
        let draft = invoice_draft(&orc);
        assert_eq!(draft.line_items, vec![item("Widget", 2.0, 50.0)]);
        assert!(draft.current_line_item.is_none());

        api.hears(spoken_item("Consulting", "3", "120"));
        orc.process_recording(&artifact(2.0)).await.unwrap();

        let totals = invoice_draft(&orc).totals(92.0);
        assert_eq!(totals.subtotal, 460.0);
        assert_eq!(totals.grand_total, 552.0);
    }

    #[tokio::test]
    async fn confirm_line_item_adds_another_or_moves_to_review() {
        let api = MockApi::starting_at("line_item")
            .then_items(
                "line_item",
                &["contact_name", "due_date"],
                vec![item("Widget", 2.0, 50.0)],
            )
            .then_transition("review", &["contact_name", "due_date", "line_item"]);
        let (orc, api) = started(WorkflowKind::Invoice, api).await;
        api.hears(spoken_item("Widget", "2", "50.00"));
        orc.process_recording(&artifact(2.0)).await.unwrap();

        assert_eq!(orc.confirm_line_item(true).await.unwrap(), "line_item");
        assert_eq!(invoice_draft(&orc).line_items.len(), 1);
        assert!(invoice_draft(&orc).current_line_item.is_none());

        assert_eq!(orc.confirm_line_item(false).await.unwrap(), "review");
        assert_eq!(
            api.calls(),
            vec!["start", "step:line_item", "confirm_item:true", "confirm_item:false"]
        );
    }

    #[tokio::test]
    async fn clearing_one_item_keeps_the_pending_one() {
        let api = MockApi::starting_at("line_item");
        *api.items.lock().unwrap() = vec![item("Widget", 2.0, 50.0), item("Fee", 1.0, 10.0)];
        let (orc, api) = started(WorkflowKind::Invoice, api).await;
        api.hears(spoken_item("Bolt", "4", "0.25"));
        orc.process_recording(&artifact(2.0)).await.unwrap();

        assert_eq!(orc.clear_line_item(0).await.unwrap(), 1);
        let draft = invoice_draft(&orc);
        assert_eq!(draft.line_items, vec![item("Fee", 1.0, 10.0)]);
        assert_eq!(draft.current_line_item, Some(item("Bolt", 4.0, 0.25)));

        // out of range: nothing removed
        assert_eq!(orc.clear_line_item(7).await.unwrap(), 1);
        assert!(!orc.state().lock().unwrap().is_loading());
    }

    #[tokio::test]
    async fn clearing_all_items_drops_the_pending_one() {
        let api = MockApi::starting_at("line_item");
        *api.items.lock().unwrap() = vec![item("Widget", 2.0, 50.0)];
        let (orc, api) = started(WorkflowKind::Invoice, api).await;
        api.hears(spoken_item("Bolt", "4", "0.25"));
        orc.process_recording(&artifact(2.0)).await.unwrap();

        assert_eq!(orc.clear_all_line_items().await.unwrap(), 0);
        let draft = invoice_draft(&orc);
        assert!(draft.line_items.is_empty());
        assert!(draft.current_line_item.is_none());
        assert_eq!(draft.subtotal(), 0.0);
        assert_eq!(api.calls(), vec!["start", "step:line_item", "clear_items"]);
    }

    #[tokio::test]
    async fn failed_clear_keeps_items() {
        let (orc, api) = started(WorkflowKind::Invoice, MockApi::starting_at("line_item")).await;
        api.hears(spoken_item("Bolt", "4", "0.25"));
        orc.process_recording(&artifact(2.0)).await.unwrap();

        api.fail_next(session_error("Session expired"));
        assert!(orc.clear_all_line_items().await.is_err());
        assert!(invoice_draft(&orc).current_line_item.is_some());
        assert_eq!(orc.state().lock().unwrap().error(), Some("Session expired"));
    }

    #[tokio::test]
    async fn submit_completes_workflow() {
        let (orc, _api) = started(WorkflowKind::Invoice, MockApi::starting_at("review")).await;

        let result = orc.submit().await.unwrap();
        assert_eq!(result.number.as_deref(), Some("INV-0001"));

        let state = orc.state();
        let st = state.lock().unwrap();
        assert_eq!(st.phase(), WorkflowPhase::Completed);
        assert_eq!(st.current_step().unwrap(), "complete");
    }

    #[tokio::test]
    async fn failed_submit_can_be_retried() {
        let (orc, api) = started(WorkflowKind::Invoice, MockApi::starting_at("review")).await;
        api.fail_next(ApiError::Remote {
            code: ErrorCode::Validation,
            message: "At least one line item is required".into(),
            field: None,
        });

        assert!(orc.submit().await.is_err());
        assert_eq!(orc.state().lock().unwrap().phase(), WorkflowPhase::Error);

        assert!(orc.submit().await.is_ok());
        assert_eq!(orc.state().lock().unwrap().phase(), WorkflowPhase::Completed);
    }

    #[tokio::test]
    async fn abandon_resets_state() {
        let (orc, _api) = started(WorkflowKind::Contact, MockApi::starting_at("name")).await;
        orc.abandon();
        assert!(orc.state().lock().unwrap().session().is_none());
    }
}
