//! # Error Types
//!
//! This module defines all error types for the chordgrid library.
//!
//! ## Error Types
//! - `Format` - structurally invalid tune, tune set or document text
//! - `UnknownRhythm` - a rhythm name that the registry does not know
//! - `InvalidRhythm` - a rhythm that cannot be constructed or deserialized
//! - `DuplicatePartLabel` - two parts of one tune sharing a label
//! - `Xml` - malformed XML input
//! - `Serialization` - I/O failure while writing a document
//! - `Store` - the key/value store could not be read or written
//! - `MergeAborted` - the merge worker stopped without completing
//!
//! Unresolved tune set references are not errors: they are dropped, logged, and
//! listed in a [`ParseReport`](crate::parser::ParseReport).
//!
//! ## Usage
//! ```rust
//! use chordgrid::{ChordGridError, RhythmRegistry, Tune};
//!
//! let registry = RhythmRegistry::with_defaults();
//! match Tune::parse("T:Not a tune", &registry) {
//!     Ok(_) => unreachable!(),
//!     Err(ChordGridError::Format { message }) => eprintln!("bad tune: {}", message),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChordGridError>;

#[derive(Error, Debug)]
pub enum ChordGridError {
    /// Structurally invalid input: too few lines, wrong starting token,
    /// missing or unexpected header line.
    ///
    /// # Example
    /// ```
    /// # use chordgrid::ChordGridError;
    /// let err = ChordGridError::format("First line should start with X: instead of 'T:Foo'");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "Format error: First line should start with X: instead of 'T:Foo'"
    /// );
    /// ```
    #[error("Format error: {message}")]
    Format { message: String },

    /// A rhythm name did not resolve in the registry.
    #[error("Unknown rhythm '{0}'")]
    UnknownRhythm(String),

    /// A rhythm could not be built from its signature or serialized form.
    #[error("Invalid rhythm: {0}")]
    InvalidRhythm(String),

    /// Part labels must be unique within a tune.
    #[error("Tune '{tune}' already has a part labeled '{label}'")]
    DuplicatePartLabel { tune: String, label: String },

    #[error("XML error: {0}")]
    Xml(String),

    /// Writing a document failed. Never retried.
    #[error("Serialization error: {0}")]
    Serialization(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Merge worker stopped before completion")]
    MergeAborted,
}

impl ChordGridError {
    pub fn format(message: impl Into<String>) -> Self {
        ChordGridError::Format {
            message: message.into(),
        }
    }
}

impl From<quick_xml::Error> for ChordGridError {
    fn from(e: quick_xml::Error) -> Self {
        ChordGridError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ChordGridError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        ChordGridError::Xml(e.to_string())
    }
}
