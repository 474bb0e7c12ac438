//! Reference entities and spoken-name resolution.
//!
//! The workflow service exposes small reference lists (currently the
//! organisation's contacts) so a spoken name can be pinned to a canonical
//! record before submission.  [`EntityMatcher`] does the pinning.

pub mod matcher;

use serde::{Deserialize, Serialize};

pub use matcher::EntityMatcher;

// ---------------------------------------------------------------------------
// ReferenceEntity
// ---------------------------------------------------------------------------

/// One `{id, name, email?}` record from a reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntity {
    /// Server-side identifier (`contact_id` on the wire).
    #[serde(alias = "contact_id")]
    pub id: String,
    /// Display name used for matching.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ReferenceEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }
}
