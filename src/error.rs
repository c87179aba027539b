//! Typed errors raised while loading rules and remapping rows.
//!
//! Configuration problems (header, flags, directive syntax, lookup tables)
//! are detected before any row is evaluated. Row-level failures are wrapped
//! in [`RemapError::Row`] so the offending record can be diagnosed.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemapError {
    /// The mapping file does not start with the `to,from,flags` header.
    #[error("Mapping header must be 'to,from,flags', found '{found}'")]
    MalformedHeader { found: String },

    #[error("Unknown flag '{flag}' for output column '{column}'")]
    UnknownFlag { column: String, flag: String },

    #[error("Output column '{0}' is defined more than once")]
    DuplicateColumn(String),

    /// A directive has the wrong shape or number of arguments.
    #[error("Malformed {directive} directive for column '{column}' ({expression:?}): {reason}")]
    DirectiveSyntax {
        directive: &'static str,
        column: String,
        expression: String,
        reason: String,
    },

    #[error("Failed to load lookup table {path:?}: {reason}")]
    TableLoad { path: PathBuf, reason: String },

    #[error("Template {template:?} failed: {cause}")]
    Template {
        template: String,
        cause: evalexpr::EvalexprError,
    },

    #[error("Listing {pattern:?} failed: {reason}")]
    Listing { pattern: String, reason: String },

    #[error("Group key column '{0}' not found in input header")]
    MissingGroupKey(String),

    /// A continuation row appeared before any row carrying a group key.
    #[error("Row {row} has an empty '{key}' but no group has started yet")]
    OrphanRow { row: usize, key: String },

    #[error("Row {index} failed on column '{column}': {cause}\n{row_json}")]
    Row {
        index: usize,
        column: String,
        row_json: String,
        cause: Box<RemapError>,
    },
}

pub type Result<T, E = RemapError> = std::result::Result<T, E>;
