//! # chordgrid
//!
//! Tunebooks of chord grids: tunes made of labeled parts, lines, bars and
//! chord symbols, plus named sets of tunes.
//!
//! The crate reads and writes the line-oriented text format and the XML
//! format, and merges two tunebooks without duplicating tunes.
//!
//! ## Related Modules
//! - [`model`] - the document model
//! - [`parser`] - text format
//! - [`xml`] - XML format
//! - [`merge`] - merge engine
//! - [`rhythm`] - rhythm registry
//! - [`store`] - key/value persistence
//! - [`config`] - tool configuration
//! - [`api`] - document load/save

pub mod api;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod parser;
pub mod rhythm;
pub mod store;
pub mod xml;

pub use api::{
    load_tunebook, load_tunebook_with_report, read_tunebook_file, read_tunebook_file_with_report,
    save_tunebook, write_tunebook_file, Format,
};
pub use config::Config;
pub use error::*;
pub use merge::{spawn_merge, MergeEvent, MergeHandle, MergePhase, MergeProgress, MergeSummary};
pub use model::*;
pub use parser::{FragmentKind, ParseReport, SkippedFragment, UnresolvedReference};
pub use rhythm::{Rhythm, RhythmRegistry};
pub use store::{KeyValueStore, MemoryStore, YamlFileStore};
