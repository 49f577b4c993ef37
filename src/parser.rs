//! # Text Parser
//!
//! This module parses the line-oriented tunebook text format into the model.
//!
//! ## Grammar (informal)
//! ```text
//! document   := fragment*
//! fragment   := tune | tuneset
//! tune       := "X:" index NL header+ body
//! header     := ("T:"|"I:"|"R:"|"K:") text NL      K: ends the header
//! body       := line+
//! line       := ["label)"] ("|:" measures ":|" | "|" measures | measures) NL
//! measures   := measure ("|" measure)*
//! measure    := chord (WS chord)*
//! tuneset    := "SET:" name NL refline+
//! refline    := (index | id) (WS (index|id))* NL
//! ```
//!
//! ## Part detection
//! Body lines are grouped into parts by a small state machine:
//! - a line carrying a label (`B)`) starts a new part which runs until the
//!   next labeled line or a line ending with `||`;
//! - a line opening a repeat (`|:`) starts a new part; the block runs until a
//!   line closing it (`:|`);
//! - a bar line right after a closed repeat starts a new part;
//! - any other line joins the current part, which ends on `||` or `:|`.
//!
//! The serializer labels every part and never writes `||`, so serialized
//! text always parses back into the same parts.
//!
//! Parts without a label get the first free letter ("A", "B", ...). Labels
//! written in the text are reserved first, so an automatic label never
//! collides with an explicit one.
//!
//! ## Failure handling
//! A malformed tune or set fails on its own: [`Tunebook::parse_with_report`]
//! logs it, records it in the [`ParseReport`] and carries on with the rest of
//! the document.
//!
//! ## Example
//! ```rust
//! use chordgrid::{RhythmRegistry, Tunebook};
//!
//! let registry = RhythmRegistry::with_defaults();
//! let book = Tunebook::parse("X:1\nI:reel1\nT:My Reel\nR:Reel\nK:D\nA) |D G|A D|\n", &registry);
//! let tune = book.get_tune_from_id("reel1").unwrap();
//! assert_eq!(tune.parts()[0].label(), "A");
//! assert_eq!(tune.parts()[0].lines()[0].measures.len(), 2);
//! ```

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{ChordGridError, Result};
use crate::model::{generate_id, Chord, Line, Measure, Tune, TunePart, TuneSet, Tunebook};
use crate::rhythm::RhythmRegistry;

lazy_static! {
    static ref PART_LABEL: Regex = Regex::new(r"^\s*([A-Za-z0-9]+)\)\s*").expect("valid label pattern");
    static ref BAR_SEPARATOR: Regex = Regex::new(r":?\|").expect("valid bar pattern");
}

const TUNE_START: &str = "X:";
const SET_START: &str = "SET:";

/// Which kind of fragment failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Tune,
    Set,
}

/// A tune or set fragment that was skipped.
#[derive(Debug)]
pub struct SkippedFragment {
    pub kind: FragmentKind,
    /// 1-based position among fragments of the same kind
    pub ordinal: usize,
    pub error: ChordGridError,
}

/// A set reference that matched no tune; it was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub set: String,
    pub reference: String,
}

/// What was left out while parsing a document.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub skipped: Vec<SkippedFragment>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.unresolved.is_empty()
    }
}

/// Parse one chord token.
pub fn parse_chord(text: &str) -> Chord {
    Chord::new(text)
}

/// Parse the chords of one bar, separated by whitespace.
pub fn parse_measure(text: &str) -> Measure {
    Measure::new(text.split_whitespace().map(parse_chord).collect())
}

/// The part label annotation at the start of a line (`"B) | G | D |"` -> `"B"`).
pub fn parse_label(line: &str) -> Option<&str> {
    PART_LABEL
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn strip_label(line: &str) -> &str {
    match PART_LABEL.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

/// Parse one grid line into measures, detecting repeat bars.
pub fn parse_line(text: &str) -> Line {
    let mut text = strip_label(text).trim();
    let mut repeat = false;

    if let Some(rest) = text.strip_prefix("|:") {
        repeat = true;
        text = rest.strip_suffix(":|").unwrap_or(rest);
    } else if let Some(rest) = text.strip_prefix('|') {
        text = rest;
    }

    let mut segments: Vec<&str> = BAR_SEPARATOR.split(text).collect();
    // Closing bars leave empty trailing segments
    while segments.last().map_or(false, |s| s.is_empty()) {
        segments.pop();
    }

    Line::new(segments.into_iter().map(parse_measure).collect(), repeat)
}

fn ends_part(line: &str) -> bool {
    line.ends_with("||") || line.ends_with(":|")
}

/// Where the body scanner currently is.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BodyState {
    /// Lines join the current buffer; `||` or `:|` closes it.
    Accumulate,
    /// Inside `|: ... :|` spanning several lines.
    RepeatBlock,
    /// A part opened by a label; runs to the next label line or `||`.
    Labeled,
}

/// Groups body lines into part buffers.
struct PartSplitter<'a> {
    parts: Vec<Vec<&'a str>>,
    current: Vec<&'a str>,
}

impl<'a> PartSplitter<'a> {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            current: Vec::new(),
        }
    }

    fn push(&mut self, line: &'a str) {
        self.current.push(line);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.parts.push(std::mem::take(&mut self.current));
        }
    }

    fn finish(mut self) -> Vec<Vec<&'a str>> {
        self.flush();
        self.parts
    }
}

fn split_parts<'a>(body: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut splitter = PartSplitter::new();
    let mut state = BodyState::Accumulate;
    let mut after_repeat = false;

    for raw in body {
        let line = raw.trim();
        if line.is_empty() {
            break;
        }

        if parse_label(line).is_some() {
            splitter.flush();
            after_repeat = false;
            state = BodyState::Labeled;
        }

        match state {
            BodyState::Labeled => {
                splitter.push(line);
                if line.ends_with("||") {
                    splitter.flush();
                    state = BodyState::Accumulate;
                }
                continue;
            }
            BodyState::RepeatBlock => {
                splitter.push(line);
                if line.ends_with(":|") {
                    state = BodyState::Accumulate;
                    after_repeat = true;
                }
                continue;
            }
            BodyState::Accumulate => {}
        }

        if line.starts_with("|:") {
            splitter.flush();
            splitter.push(line);
            if line.ends_with(":|") {
                after_repeat = true;
            } else {
                state = BodyState::RepeatBlock;
            }
        } else {
            if after_repeat && line.starts_with('|') {
                splitter.flush();
            }
            splitter.push(line);
            after_repeat = false;
            if ends_part(line) {
                splitter.flush();
            }
        }
    }

    splitter.finish()
}

fn first_free_label(taken: &HashSet<String>) -> String {
    ('A'..='Z')
        .map(String::from)
        .chain((1..).map(|n| format!("P{}", n)))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_default()
}

/// Fill in missing part labels. Explicit labels are reserved first, then
/// each unlabeled part takes the first free label in A..Z, P1, P2, ...
pub(crate) fn assign_labels(explicit: Vec<Option<String>>) -> Vec<String> {
    let mut taken: HashSet<String> = explicit.iter().flatten().cloned().collect();
    explicit
        .into_iter()
        .map(|label| match label {
            Some(label) => label,
            None => {
                let label = first_free_label(&taken);
                taken.insert(label.clone());
                label
            }
        })
        .collect()
}

fn build_parts(tune: &mut Tune, buffers: Vec<Vec<&str>>) -> Result<()> {
    let explicit = buffers
        .iter()
        .map(|lines| lines.first().and_then(|l| parse_label(l)).map(str::to_string))
        .collect();
    let labels = assign_labels(explicit);

    for (mut lines, label) in buffers.into_iter().zip(labels) {
        // A bare "A)" line is an empty part
        if lines.first().map_or(false, |l| strip_label(l).trim().is_empty()) {
            lines.remove(0);
        }
        debug!("Reading part {} with {} lines", label, lines.len());
        let part = TunePart::new(&label, lines.into_iter().map(parse_line).collect());
        tune.add_part(part)?;
    }
    Ok(())
}

impl Tune {
    /// Parse one tune from its text block.
    ///
    /// # Errors
    /// - [`ChordGridError::Format`] for fewer than 5 lines, a first line not
    ///   starting with `X:`, a bad index, a missing `R:`/`K:` line or an
    ///   unexpected header line
    /// - [`ChordGridError::UnknownRhythm`] if `R:` names no known rhythm
    /// - [`ChordGridError::DuplicatePartLabel`] if two parts share a label
    pub fn parse(text: &str, registry: &RhythmRegistry) -> Result<Tune> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() < 5 {
            return Err(ChordGridError::format("Not enough lines in tune text definition"));
        }

        let first = lines[0].trim();
        let index_text = first.strip_prefix(TUNE_START).ok_or_else(|| {
            ChordGridError::format(format!("First line should start with X: instead of '{}'", first))
        })?;
        let index: u32 = index_text
            .trim()
            .parse()
            .map_err(|_| ChordGridError::format(format!("Invalid tune index '{}'", index_text.trim())))?;

        let mut name: Option<String> = None;
        let mut id: Option<String> = None;
        let mut rhythm = None;
        let mut key: Option<String> = None;
        let mut current = 1;

        while key.is_none() {
            let line = lines
                .get(current)
                .map(|l| l.trim())
                .ok_or_else(|| ChordGridError::format("Tune header has no K: line"))?;
            let prefix = line.get(..2).map(str::to_ascii_uppercase);
            let value = line.get(2..).unwrap_or("").trim();
            match prefix.as_deref() {
                Some("T:") => name = Some(value.to_string()),
                Some("I:") => id = Some(value.to_string()),
                Some("R:") => rhythm = Some(registry.get(value)?.clone()),
                Some("K:") => key = Some(value.to_string()),
                _ => {
                    return Err(ChordGridError::format(format!("Unexpected line '{}'", line)));
                }
            }
            current += 1;
        }

        let rhythm = rhythm.ok_or_else(|| ChordGridError::format("Tune header has no R: line"))?;
        let name = name.unwrap_or_default();
        let id = match id.filter(|i| !i.is_empty()) {
            Some(id) => id,
            None => {
                let generated = generate_id(&name)
                    .ok_or_else(|| ChordGridError::format("Tune has neither an id nor a title"))?;
                debug!("Generated id = {}", generated);
                generated
            }
        };

        let mut tune = Tune::with_id(&id, &name, rhythm, key.as_deref().unwrap_or(""));
        tune.set_index(index);
        build_parts(&mut tune, split_parts(&lines[current..]))?;
        debug!("Parsed tune '{}' with {} parts", tune.id(), tune.count_parts());
        Ok(tune)
    }
}

/// Resolve one set reference: a tune index first, then a tune id.
fn resolve_reference(book: &Tunebook, reference: &str) -> Option<String> {
    reference
        .parse::<u32>()
        .ok()
        .and_then(|index| book.get_tune_from_index(index))
        .or_else(|| book.get_tune_from_id(reference))
        .map(|tune| tune.id().to_string())
}

/// Parse a set, returning it with the references that did not resolve.
pub fn parse_tune_set(text: &str, book: &Tunebook) -> Result<(TuneSet, Vec<String>)> {
    let mut lines = text.lines().map(str::trim);
    let first = lines.next().unwrap_or("");
    let name = first
        .strip_prefix(SET_START)
        .ok_or_else(|| ChordGridError::format("Tune set must start with 'SET:'"))?
        .trim();
    debug!("Parsing tune set '{}'", name);

    let mut ids = Vec::new();
    let mut unresolved = Vec::new();
    for line in lines {
        if line.starts_with(SET_START) {
            return Err(ChordGridError::format(
                "Tune set reference line must not start with 'SET:'",
            ));
        }
        for reference in line.split_whitespace() {
            match resolve_reference(book, reference) {
                Some(id) => ids.push(id),
                None => {
                    warn!("Unknown tune reference '{}' in set '{}'", reference, name);
                    unresolved.push(reference.to_string());
                }
            }
        }
    }

    let set = TuneSet::with_tunes(name, ids);
    if set.name() != name {
        debug!("Generated set name {}", set.name());
    }
    Ok((set, unresolved))
}

impl TuneSet {
    /// Parse a set against the tunes of `book`. Unknown references are
    /// dropped with a warning.
    pub fn parse(text: &str, book: &Tunebook) -> Result<TuneSet> {
        parse_tune_set(text, book).map(|(set, _)| set)
    }
}

/// Cut a document into fragments, each starting at a line beginning with
/// `X:` or `SET:`. Text before the first fragment is dropped.
pub fn split_fragments(text: &str) -> Vec<String> {
    let mut fragments: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let start = line.trim_start();
        if start.starts_with(TUNE_START) || start.starts_with(SET_START) {
            if let Some(done) = current.take() {
                fragments.push(done);
            }
            current = Some(String::new());
        }
        if let Some(fragment) = current.as_mut() {
            fragment.push_str(line);
            fragment.push('\n');
        }
    }
    fragments.extend(current);
    fragments
}

impl Tunebook {
    /// Parse a text document, skipping malformed fragments.
    pub fn parse(text: &str, registry: &RhythmRegistry) -> Tunebook {
        Self::parse_with_report(text, registry).0
    }

    /// Parse a text document. Tunes are read first so that sets can refer
    /// to any tune of the document.
    pub fn parse_with_report(text: &str, registry: &RhythmRegistry) -> (Tunebook, ParseReport) {
        let mut book = Tunebook::new();
        let mut report = ParseReport::default();
        let fragments = split_fragments(text);

        let tune_fragments = fragments.iter().filter(|f| f.trim_start().starts_with(TUNE_START));
        for (i, fragment) in tune_fragments.enumerate() {
            match Tune::parse(fragment, registry) {
                Ok(tune) => {
                    if let Some(previous) = book.insert_tune(tune) {
                        warn!("Tune id '{}' appears twice, keeping the last one", previous.id());
                    }
                }
                Err(error) => {
                    warn!("Skipping tune #{}: {}", i + 1, error);
                    report.skipped.push(SkippedFragment {
                        kind: FragmentKind::Tune,
                        ordinal: i + 1,
                        error,
                    });
                }
            }
        }

        let set_fragments = fragments.iter().filter(|f| f.trim_start().starts_with(SET_START));
        for (i, fragment) in set_fragments.enumerate() {
            match parse_tune_set(fragment, &book) {
                Ok((set, unresolved)) => {
                    report.unresolved.extend(unresolved.into_iter().map(|reference| {
                        UnresolvedReference {
                            set: set.name().to_string(),
                            reference,
                        }
                    }));
                    book.add_set(set);
                }
                Err(error) => {
                    warn!("Skipping set #{}: {}", i + 1, error);
                    report.skipped.push(SkippedFragment {
                        kind: FragmentKind::Set,
                        ordinal: i + 1,
                        error,
                    });
                }
            }
        }

        debug!(
            "Parsed tunebook with {} tunes and {} sets",
            book.count_tunes(),
            book.count_sets()
        );
        (book, report)
    }
}
