//! In-memory content model for turn-based game scenarios.
//!
//! A scenario is six sections (map metadata, variables, entity rules,
//! factions, image stacks, areas) held in order-preserving dictionaries
//! keyed by interned string identifiers. The crate covers the full
//! authoring lifecycle: parsing and writing the XML dialect, merging
//! and splitting multi-file scenarios, the identifier rename/delete
//! cascade, and two-phase reference validation under editor or runtime
//! authority.

pub mod area;
pub mod compose;
pub mod entities;
pub mod error;
pub mod factions;
pub mod identifier;
pub mod images;
pub mod master;
pub mod modifier;
pub mod section;
pub mod variables;
mod xml;

// Re-export the types most callers need.
pub use error::ModelError;
pub use identifier::Authority;
pub use identifier::ContentEntity;
pub use identifier::EditContext;
pub use identifier::Identifier;
pub use section::Scenario;
pub use section::SectionKind;
