//! # Public API
//!
//! Document-level entry points: load and save a whole tunebook in either of
//! its two formats.
//!
//! ## Functions
//!
//! - [`load_tunebook()`] / [`load_tunebook_with_report()`] - parse a document held in memory
//! - [`save_tunebook()`] - write a document to any [`Write`] sink
//! - [`read_tunebook_file()`] / [`write_tunebook_file()`] - the same on files, with the
//!   format picked from the file extension
//!
//! ## Typical Usage
//!
//! ```rust
//! use chordgrid::{load_tunebook, save_tunebook, Format, RhythmRegistry};
//!
//! let registry = RhythmRegistry::with_defaults();
//! let text = "X:1\nI:reel1\nT:My Reel\nR:Reel\nK:D\nA) |D G|A D|\n";
//!
//! let book = load_tunebook(text, Format::Text, &registry)?;
//! let mut xml = Vec::new();
//! save_tunebook(&book, Format::Xml, &mut xml)?;
//!
//! let again = load_tunebook(std::str::from_utf8(&xml).unwrap(), Format::Xml, &registry)?;
//! assert_eq!(again.get_tune_from_id("reel1"), book.get_tune_from_id("reel1"));
//! # Ok::<(), chordgrid::ChordGridError>(())
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;
use crate::model::Tunebook;
use crate::parser::ParseReport;
use crate::rhythm::RhythmRegistry;
use crate::xml;

/// The two document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Xml,
}

impl Format {
    /// `.xml` files are XML, everything else is text.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xml") => Format::Xml,
            _ => Format::Text,
        }
    }

    /// Guess the format from the content: XML starts with `<`.
    pub fn detect(content: &str) -> Self {
        let content = content.trim_start_matches('\u{feff}').trim_start();
        if content.starts_with('<') {
            Format::Xml
        } else {
            Format::Text
        }
    }
}

/// Parse a document.
///
/// # Errors
/// Text documents never fail as a whole: malformed fragments are skipped.
/// XML documents fail with [`ChordGridError::Xml`](crate::ChordGridError::Xml)
/// when they are not well-formed.
pub fn load_tunebook(content: &str, format: Format, registry: &RhythmRegistry) -> Result<Tunebook> {
    load_tunebook_with_report(content, format, registry).map(|(book, _)| book)
}

/// Parse a document and report what was skipped.
pub fn load_tunebook_with_report(
    content: &str,
    format: Format,
    registry: &RhythmRegistry,
) -> Result<(Tunebook, ParseReport)> {
    match format {
        Format::Text => Ok(Tunebook::parse_with_report(content, registry)),
        Format::Xml => xml::read_tunebook_with_report(content, registry),
    }
}

/// Write a document.
///
/// # Errors
/// [`ChordGridError::Serialization`](crate::ChordGridError::Serialization) if the
/// writer fails. Nothing is retried.
pub fn save_tunebook<W: Write>(book: &Tunebook, format: Format, writer: &mut W) -> Result<()> {
    match format {
        Format::Text => {
            write!(writer, "{}", book)?;
            writer.flush()?;
        }
        Format::Xml => xml::write_tunebook(book, writer)?,
    }
    Ok(())
}

/// Read a tunebook file. The format comes from the content, so a text
/// file named `.xml` still loads.
pub fn read_tunebook_file<P: AsRef<Path>>(path: P, registry: &RhythmRegistry) -> Result<Tunebook> {
    read_tunebook_file_with_report(path, registry).map(|(book, _)| book)
}

pub fn read_tunebook_file_with_report<P: AsRef<Path>>(
    path: P,
    registry: &RhythmRegistry,
) -> Result<(Tunebook, ParseReport)> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let format = Format::detect(&content);
    debug!("Reading {:?} as {:?}", path, format);
    load_tunebook_with_report(&content, format, registry)
}

/// Write a tunebook file in the format implied by its extension.
pub fn write_tunebook_file<P: AsRef<Path>>(book: &Tunebook, path: P) -> Result<()> {
    let path = path.as_ref();
    let format = Format::from_path(path);
    let mut writer = BufWriter::new(File::create(path)?);
    save_tunebook(book, format, &mut writer)?;
    info!(
        "Wrote {} tunes and {} sets to {:?}",
        book.count_tunes(),
        book.count_sets(),
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChordGridError;

    const TEXT: &str = "X:1\nI:reel1\nT:My Reel\nR:Reel\nK:D\nA) |D G|A D|\n\nSET:Only\nreel1\n";

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path("book.xml"), Format::Xml);
        assert_eq!(Format::from_path("BOOK.XML"), Format::Xml);
        assert_eq!(Format::from_path("book.txt"), Format::Text);
        assert_eq!(Format::from_path("book"), Format::Text);
    }

    #[test]
    fn test_format_detect() {
        assert_eq!(Format::detect("  <?xml version=\"1.0\"?><TuneBook/>"), Format::Xml);
        assert_eq!(Format::detect("X:1\n"), Format::Text);
        assert_eq!(Format::detect(""), Format::Text);
    }

    #[test]
    fn test_save_text() {
        let registry = RhythmRegistry::with_defaults();
        let book = load_tunebook(TEXT, Format::Text, &registry).unwrap();
        let mut out = Vec::new();
        save_tunebook(&book, Format::Text, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "X:1\nI:reel1\nT:My Reel\nR:Reel\nK:D\nA) | D G | A D | \n\nSET:Only\nreel1\n\n"
        );
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_save_failure_is_serialization_error() {
        let book = Tunebook::parse(TEXT, &RhythmRegistry::with_defaults());
        for format in [Format::Text, Format::Xml] {
            let err = save_tunebook(&book, format, &mut FailingWriter).unwrap_err();
            assert!(matches!(err, ChordGridError::Serialization(_)));
        }
    }

    #[test]
    fn test_file_round_trip_both_formats() {
        let registry = RhythmRegistry::with_defaults();
        let book = load_tunebook(TEXT, Format::Text, &registry).unwrap();
        let dir = tempfile::tempdir().unwrap();

        for name in ["book.txt", "book.xml"] {
            let path = dir.path().join(name);
            write_tunebook_file(&book, &path).unwrap();
            let again = read_tunebook_file(&path, &registry).unwrap();
            assert_eq!(again.get_tune_from_id("reel1"), book.get_tune_from_id("reel1"));
            assert_eq!(again.sets(), book.sets());
        }
        assert!(fs::read_to_string(dir.path().join("book.xml")).unwrap().starts_with("<?xml"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_tunebook_file(dir.path().join("nope.txt"), &RhythmRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, ChordGridError::Serialization(_)));
    }
}
