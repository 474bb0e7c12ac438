//! Back/forward reachability over the ordered step list.
//!
//! Going back is always allowed except on the first step.  Going forward is
//! only allowed when the current step has already been completed, so a
//! step that was never done cannot be skipped.

use super::step::StepId;

/// Which directions are currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationState {
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

/// Navigation rules over one workflow's step list.
///
/// ```
/// use voice_workflow::workflow::{StepId, StepNavigator};
///
/// let steps: Vec<StepId> = ["welcome", "name", "email"].map(StepId::from).to_vec();
/// let nav = StepNavigator::new(&steps);
/// let completed = vec![StepId::from("name")];
///
/// assert!(nav.can_go_forward(&"name".into(), &completed));
/// assert!(!nav.can_go_forward(&"email".into(), &completed));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StepNavigator<'a> {
    steps: &'a [StepId],
}

impl<'a> StepNavigator<'a> {
    pub fn new(steps: &'a [StepId]) -> Self {
        Self { steps }
    }

    fn index_of(&self, step: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| s == step)
    }

    /// `true` unless `current` is the first step (or unknown).
    pub fn can_go_back(&self, current: &StepId) -> bool {
        matches!(self.index_of(current), Some(i) if i > 0)
    }

    /// `true` when `current` is not the last step and is itself completed.
    pub fn can_go_forward(&self, current: &StepId, completed: &[StepId]) -> bool {
        let Some(i) = self.index_of(current) else {
            return false;
        };
        i + 1 < self.steps.len() && completed.contains(current)
    }

    pub fn state(&self, current: &StepId, completed: &[StepId]) -> NavigationState {
        NavigationState {
            can_go_back: self.can_go_back(current),
            can_go_forward: self.can_go_forward(current, completed),
        }
    }

    /// The step before `current`, when going back is allowed.
    pub fn previous(&self, current: &StepId) -> Option<&'a StepId> {
        if !self.can_go_back(current) {
            return None;
        }
        self.index_of(current).map(|i| &self.steps[i - 1])
    }

    /// The step after `current`, when going forward is allowed.
    pub fn next(&self, current: &StepId, completed: &[StepId]) -> Option<&'a StepId> {
        if !self.can_go_forward(current, completed) {
            return None;
        }
        self.index_of(current).map(|i| &self.steps[i + 1])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
