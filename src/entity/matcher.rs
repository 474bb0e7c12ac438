//! Bidirectional substring matching of a spoken name against a reference list.
//!
//! Transcripts are often "over-heard" ("Acme Corporation Worldwide" for a
//! record called "Acme") or "under-heard" ("acme" for "Acme Corp Ltd").  Both
//! directions count as a match.  There is no scoring: the first record in list
//! order that matches wins.

use super::ReferenceEntity;

/// Resolves a spoken name to at most one [`ReferenceEntity`].
///
/// ```
/// use voice_workflow::entity::{EntityMatcher, ReferenceEntity};
///
/// let contacts = vec![ReferenceEntity::new("1", "Acme Corp Ltd")];
/// let hit = EntityMatcher::new(&contacts).find("  ACME ");
/// assert_eq!(hit.map(|c| c.id.as_str()), Some("1"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EntityMatcher<'a> {
    entities: &'a [ReferenceEntity],
}

impl<'a> EntityMatcher<'a> {
    pub fn new(entities: &'a [ReferenceEntity]) -> Self {
        Self { entities }
    }

    /// Return the first entity whose normalised name contains, or is
    /// contained in, the normalised `spoken` name.
    ///
    /// Blank input and blank record names never match; an empty string would
    /// otherwise be a substring of everything.
    pub fn find(&self, spoken: &str) -> Option<&'a ReferenceEntity> {
        let spoken = normalize(spoken);
        if spoken.is_empty() {
            return None;
        }

        let hit = self.entities.iter().find(|entity| {
            let name = normalize(&entity.name);
            !name.is_empty() && (name.contains(&spoken) || spoken.contains(&name))
        });

        match hit {
            Some(entity) => log::debug!("matcher: {spoken:?} -> {:?}", entity.name),
            None => log::debug!("matcher: no reference entity for {spoken:?}"),
        }
        hit
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
