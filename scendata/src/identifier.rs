//! Interned identifiers, cross-reference handles and the shared
//! rename/validate protocol.
//!
//! Every object in the content model is keyed and cross-referenced by
//! string [`Identifier`]s, never by numeric handles. References between
//! sections are stored as [`IdRef`]: the string key plus a lazily cached
//! resolution produced by the validation pass, so a dangling reference
//! ("id present, target missing") stays representable.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::ModelError;

/// An interned, case-sensitive identifier.
///
/// Cloning is cheap (shared storage); equality and hashing are by
/// string content, so identifiers from different registries compare
/// as expected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Arc<str>);

impl Identifier {
    pub fn new(name: &str) -> Self {
        Identifier(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({:?})", &*self.0)
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for Identifier {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// Interning pool for identifiers.
///
/// Repeated names across a scenario (a faction named by hundreds of
/// areas) share one allocation. Key uniqueness within a dictionary is
/// enforced by the owning section's insert API, not here.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
    pool: HashSet<Arc<str>>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Identifier {
        if let Some(existing) = self.pool.get(name) {
            return Identifier(Arc::clone(existing));
        }
        let arc: Arc<str> = Arc::from(name);
        self.pool.insert(Arc::clone(&arc));
        Identifier(arc)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// Cached resolution state of an [`IdRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Never resolved, or the target was missing at validation time.
    Unresolved,
    /// Resolved to an entry index in the owning section's dictionary.
    Index(usize),
    /// Resolved against an external collaborator dictionary that does
    /// not expose indices (the image store).
    External,
}

/// A string foreign key plus its lazily cached resolution.
///
/// The resolution is a dictionary index, never an owning reference: the
/// referenced object's true owner is always the relevant section, which
/// avoids reference cycles between, say, an area and a faction. The
/// cache is cleared by any identifier mutation and re-populated by the
/// next validation pass.
#[derive(Debug, Clone)]
pub struct IdRef {
    id: Option<Identifier>,
    resolved: Resolution,
}

impl IdRef {
    pub fn empty() -> Self {
        IdRef {
            id: None,
            resolved: Resolution::Unresolved,
        }
    }

    pub fn new(id: Identifier) -> Self {
        IdRef {
            id: Some(id),
            resolved: Resolution::Unresolved,
        }
    }

    pub fn id(&self) -> Option<&Identifier> {
        self.id.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.id.is_some()
    }

    /// Replaces the key and drops any cached resolution.
    pub fn set(&mut self, id: Option<Identifier>) {
        self.id = id;
        self.resolved = Resolution::Unresolved;
    }

    pub fn resolution(&self) -> Resolution {
        self.resolved
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.resolved, Resolution::Unresolved)
    }

    pub(crate) fn resolve(&mut self, resolution: Resolution) {
        self.resolved = resolution;
    }

    /// The shared identifier-cascade step for a single reference field.
    /// Returns 1 if the field names `old`, 0 otherwise.
    pub(crate) fn process_identifier(
        &mut self,
        old: &Identifier,
        new: Option<&Identifier>,
    ) -> usize {
        match &self.id {
            Some(id) if id == old => {}
            _ => return 0,
        }
        match id_mode(old, new) {
            IdMode::Count => {}
            IdMode::Rename(n) => self.set(Some(n.clone())),
            IdMode::Delete => self.set(None),
        }
        1
    }
}

impl Default for IdRef {
    fn default() -> Self {
        IdRef::empty()
    }
}

// Equality is over the key only; the resolution cache is transient.
impl PartialEq for IdRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IdRef {}

/// Whether content mutation is permitted and how strictly validation
/// treats referential failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Authoring tools: broken references are tolerated (left
    /// unresolved) so the user can fix them interactively.
    Editor,
    /// Gameplay load: any structural or referential violation is fatal.
    Runtime,
}

/// Capability required by every mutating accessor in the model.
///
/// Editor tooling constructs one and threads it through its calls;
/// gameplay code never holds one, so the single-writer discipline is
/// checked at compile time rather than by a process-wide mode flag.
#[derive(Debug)]
pub struct EditContext {
    _private: (),
}

impl EditContext {
    pub fn new() -> Self {
        EditContext { _private: () }
    }
}

impl Default for EditContext {
    fn default() -> Self {
        EditContext::new()
    }
}

/// The two operations every content entity supports: the identifier
/// rename/delete cascade and the cross-reference validation pass.
///
/// `Scope` carries the sibling sections (or collaborator contracts) the
/// entity resolves its references against; leaf entities with no
/// references use `()`.
pub trait ContentEntity {
    type Scope<'a>;

    /// Scans every identifier-typed field and collection key owned by
    /// this entity, cascading into children. Three modes, selected by
    /// the relation between `old` and `new`:
    ///
    /// * `new == Some(old)` — count occurrences, mutate nothing;
    /// * `new == Some(other)` — rewrite every occurrence of `old`;
    /// * `new == None` — delete or blank every occurrence.
    ///
    /// Returns the number of occurrences found or changed.
    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize;

    /// Resolves identifier references into cached handles and checks
    /// structural invariants. Under [`Authority::Editor`] a failed
    /// resolution leaves the reference in place (unresolved) instead of
    /// failing; under [`Authority::Runtime`] it is fatal.
    fn validate(
        &mut self,
        scope: Self::Scope<'_>,
        authority: Authority,
    ) -> Result<(), ModelError>;
}

/// Cascade mode derived from the `(old, new)` pair.
pub(crate) enum IdMode<'a> {
    Count,
    Rename(&'a Identifier),
    Delete,
}

pub(crate) fn id_mode<'a>(old: &Identifier, new: Option<&'a Identifier>) -> IdMode<'a> {
    match new {
        Some(n) if n == old => IdMode::Count,
        Some(n) => IdMode::Rename(n),
        None => IdMode::Delete,
    }
}

/// Applies the identifier cascade to a section dictionary's keys,
/// preserving insertion order. `sync_id` mirrors a rename into the
/// entry's own id field for entry types that carry one.
///
/// Deletion removes the entry outright (its interior occurrences must
/// have been counted by the caller beforehand, so count and delete
/// modes agree on totals).
pub(crate) fn process_map_keys<V>(
    map: &mut IndexMap<Identifier, V>,
    old: &Identifier,
    new: Option<&Identifier>,
    mut sync_id: impl FnMut(&mut V, &Identifier),
) -> usize {
    if !map.contains_key(old.as_str()) {
        return 0;
    }
    match id_mode(old, new) {
        IdMode::Count => 1,
        IdMode::Rename(n) => {
            let taken = std::mem::take(map);
            *map = taken
                .into_iter()
                .map(|(key, mut value)| {
                    if &key == old {
                        sync_id(&mut value, n);
                        (n.clone(), value)
                    } else {
                        (key, value)
                    }
                })
                .collect();
            1
        }
        IdMode::Delete => {
            map.shift_remove(old.as_str());
            1
        }
    }
}
