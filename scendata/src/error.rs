//! Error types for the scenario content model.

use std::io;
use thiserror::Error;

/// Errors produced while building, validating or serializing scenario
/// content.
///
/// Argument and range violations are checked eagerly at the call that
/// introduces the bad value. Referential and structural violations are
/// reported by the validation pass and are fatal only under
/// [`Authority::Runtime`](crate::identifier::Authority).
#[derive(Error, Debug)]
pub enum ModelError {
    /// A caller passed a value outside the accepted domain (unknown
    /// enum name, zero-extent rectangle, unrecognized section name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A numeric value fell outside its allowed closed range.
    #[error("value {value} outside allowed range [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    /// An identifier was inserted into a dictionary that already owns it.
    #[error("duplicate identifier '{0}'")]
    DuplicateIdentifier(String),

    /// Structurally invalid content (bounds outside the grid, template
    /// category mismatch).
    #[error("schema violation: {0}")]
    Schema(String),

    /// An identifier reference that does not name any live object.
    #[error("unresolved reference '{id}' in {context}")]
    UnresolvedReference { id: String, context: String },

    /// Malformed XML or an unparsable attribute value.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
