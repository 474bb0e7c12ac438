//! Merging server-side field values into the local draft.
//!
//! Two sources write into a draft:
//!
//! * **Parsed step results**: the fields extracted from the latest utterance.
//!   These are the user's newest intent and always win
//!   ([`StepResultReconciler::merge_parsed`]).
//! * **Server snapshots**: the whole draft as the server last saw it, sent
//!   back with navigation responses.  A snapshot can be older than an inline
//!   edit that is still in flight, so fields with a pending local edit keep
//!   their local value ([`StepResultReconciler::merge_snapshot`]).
//!
//! Both merges are shallow and additive: a field absent from the incoming map
//! is never touched.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::draft::{Draft, DraftFieldError};

/// Tracks unconfirmed local edits and applies incoming field maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResultReconciler {
    pending: BTreeSet<String>,
}

impl StepResultReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a parsed step result: last write wins per field.
    ///
    /// Returns the fields that could not be represented in the typed draft;
    /// everything else is applied.
    pub fn merge_parsed(&self, draft: &mut Draft, parsed: &Map<String, Value>) -> Vec<DraftFieldError> {
        parsed
            .iter()
            .filter_map(|(field, value)| draft.set_field(field, value).err())
            .inspect(|e| log::warn!("reconcile: skipped parsed field: {e}"))
            .collect()
    }

    /// Apply a server snapshot, leaving fields with a pending local edit alone.
    pub fn merge_snapshot(
        &self,
        draft: &mut Draft,
        snapshot: &Map<String, Value>,
    ) -> Vec<DraftFieldError> {
        snapshot
            .iter()
            .filter(|(field, _)| {
                let keep_local = self.pending.contains(field.as_str());
                if keep_local {
                    log::debug!("reconcile: keeping local edit of `{field}` over snapshot");
                }
                !keep_local
            })
            .filter_map(|(field, value)| draft.set_field(field, value).err())
            .inspect(|e| log::warn!("reconcile: skipped snapshot field: {e}"))
            .collect()
    }

    /// Apply local edits optimistically and remember them as unconfirmed.
    pub fn apply_local_edit(
        &mut self,
        draft: &mut Draft,
        updates: &Map<String, Value>,
    ) -> Vec<DraftFieldError> {
        let mut rejected = Vec::new();
        for (field, value) in updates {
            match draft.set_field(field, value) {
                Ok(()) => {
                    self.pending.insert(field.clone());
                }
                Err(e) => {
                    log::warn!("reconcile: skipped local edit: {e}");
                    rejected.push(e);
                }
            }
        }
        rejected
    }

    /// The server accepted the edit of `field`.
    pub fn acknowledge(&mut self, field: &str) -> bool {
        self.pending.remove(field)
    }

    pub fn is_pending(&self, field: &str) -> bool {
        self.pending.contains(field)
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
