//! # Tunebook Model
//!
//! This module defines the in-memory document model shared by the text and
//! XML formats.
//!
//! ## Type Hierarchy
//! ```text
//! Tunebook
//!   ├── tunes: id -> Tune
//!   │     ├── id, index, name, key
//!   │     ├── rhythm: Rhythm
//!   │     └── Vec<TunePart>
//!   │           ├── label ("A", "B", ...)
//!   │           └── Vec<Line>
//!   │                 ├── repeat: bool   (|: ... :|)
//!   │                 └── Vec<Measure>
//!   │                       └── Vec<Chord> (1-4 per bar)
//!   └── sets: Vec<TuneSet>
//!         ├── name
//!         └── tune_ids (references into the tunebook)
//! ```
//!
//! ## Key Concepts
//!
//! ### Tune equality
//! Two tunes are equal when they have the same rhythm, the same key
//! (case-insensitive) and the same part text (case-insensitive). Id and
//! index are ignored, so the same tune imported under another id is still
//! recognized during a merge.
//!
//! ### Tune sets
//! A set does not own tunes. It holds tune ids; the [`Tunebook`] owns the
//! tunes and resolves the ids. Renaming or removing a tune through the
//! tunebook keeps the sets consistent.
//!
//! ## Related Modules
//! - `parser` - builds this model from text
//! - `xml` - builds this model from XML and writes it back
//! - `merge` - combines two tunebooks

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ChordGridError, Result};
use crate::rhythm::Rhythm;

lazy_static! {
    static ref NON_ID_CHARS: Regex = Regex::new(r"[^a-z0-9]+").expect("valid id pattern");
}

/// Build a tune id from a title: lowercase, every run of characters outside
/// `[a-z0-9]` replaced by one underscore.
pub fn generate_id(text: &str) -> Option<String> {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    Some(NON_ID_CHARS.replace_all(&lowered, "_").into_owned())
}

/// A single chord symbol, stored as trimmed raw text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Chord(String);

impl Chord {
    pub fn new(value: &str) -> Self {
        Self(value.trim().to_string())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One bar of the grid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Measure {
    pub chords: Vec<Chord>,
}

impl Measure {
    pub fn new(chords: Vec<Chord>) -> Self {
        Self { chords }
    }

    /// Replace the chords of this bar (grid editing).
    pub fn set_chords(&mut self, chords: Vec<Chord>) {
        self.chords = chords;
    }

    pub fn count_chords(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    /// The longest chord text, used to size grid cells.
    pub fn largest_chord_text(&self) -> &str {
        self.chords
            .iter()
            .map(Chord::value)
            .fold("", |best, c| if c.len() > best.len() { c } else { best })
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chord) in self.chords.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", chord)?;
        }
        Ok(())
    }
}

/// A row of measures, optionally enclosed in repeat bars.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    pub measures: Vec<Measure>,
    pub repeat: bool,
}

impl Line {
    pub fn new(measures: Vec<Measure>, repeat: bool) -> Self {
        Self { measures, repeat }
    }

    /// A line of `bars` empty measures, as created when adding a part in the editor.
    pub fn with_empty_measures(bars: usize) -> Self {
        Self {
            measures: vec![Measure::default(); bars],
            repeat: false,
        }
    }

    pub fn has_repetition(&self) -> bool {
        self.repeat
    }

    pub fn count_measures(&self) -> usize {
        self.measures.len()
    }

    pub fn measure(&self, index: usize) -> Option<&Measure> {
        self.measures.get(index)
    }

    pub fn measure_mut(&mut self, index: usize) -> Option<&mut Measure> {
        self.measures.get_mut(index)
    }
}

impl fmt::Display for Line {
    /// `| D G | A D | ` or `|: D G | A D :|`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.repeat { "|: " } else { "| " })?;
        let count = self.measures.len();
        for (i, measure) in self.measures.iter().enumerate() {
            write!(f, "{} ", measure)?;
            if i == count - 1 && self.repeat {
                f.write_str(":|")?;
            } else {
                f.write_str("| ")?;
            }
        }
        Ok(())
    }
}

/// A labeled section of a tune.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunePart {
    label: String,
    lines: Vec<Line>,
}

impl TunePart {
    pub fn new(label: &str, lines: Vec<Line>) -> Self {
        Self {
            label: label.trim().to_string(),
            lines,
        }
    }

    /// A blank part of `line_count` lines of `bars_per_line` empty measures.
    pub fn with_empty_lines(label: &str, line_count: usize, bars_per_line: usize) -> Self {
        Self::new(label, vec![Line::with_empty_measures(bars_per_line); line_count])
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn line_mut(&mut self, index: usize) -> Option<&mut Line> {
        self.lines.get_mut(index)
    }

    pub fn push_line(&mut self, line: Line) {
        self.lines.push(line);
    }

    /// Text rendering of the part's lines, one per row, without the label.
    pub fn chord_grid(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.to_string().trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn max_measures_per_line(&self) -> usize {
        self.lines.iter().map(Line::count_measures).max().unwrap_or(0)
    }
}

impl fmt::Display for TunePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}) ", self.label)?;
        if self.lines.is_empty() {
            return writeln!(f);
        }
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// One chord-grid composition.
#[derive(Debug, Clone)]
pub struct Tune {
    id: String,
    index: u32,
    name: String,
    key: String,
    rhythm: Rhythm,
    parts: Vec<TunePart>,
}

impl Tune {
    /// Create an empty tune. The id is generated from the name.
    pub fn new(name: &str, rhythm: Rhythm, key: &str) -> Result<Self> {
        let id = generate_id(name)
            .ok_or_else(|| ChordGridError::format("Cannot generate a tune id from an empty title"))?;
        Ok(Self::with_id(&id, name, rhythm, key))
    }

    pub fn with_id(id: &str, name: &str, rhythm: Rhythm, key: &str) -> Self {
        Self {
            id: id.trim().to_string(),
            index: 0,
            name: name.trim().to_string(),
            key: key.trim().to_string(),
            rhythm,
            parts: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Change the id. Use [`Tunebook::rename_tune`] for a tune already in a tunebook.
    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.trim().to_string();
    }

    /// Display title: a trailing article after a comma moves to the front
    /// ("Kesh, The" -> "The Kesh").
    pub fn title(&self) -> String {
        match self.name.split_once(',') {
            Some((head, tail)) => format!("{} {}", tail.trim(), head.trim()),
            None => self.name.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn set_key(&mut self, key: &str) {
        self.key = key.trim().to_string();
    }

    pub fn rhythm(&self) -> &Rhythm {
        &self.rhythm
    }

    pub fn set_rhythm(&mut self, rhythm: Rhythm) {
        self.rhythm = rhythm;
    }

    pub fn parts(&self) -> &[TunePart] {
        &self.parts
    }

    pub fn count_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, label: &str) -> Option<&TunePart> {
        self.parts.iter().find(|p| p.label == label)
    }

    pub fn part_mut(&mut self, label: &str) -> Option<&mut TunePart> {
        self.parts.iter_mut().find(|p| p.label == label)
    }

    /// Append a part. Fails if another part already uses its label.
    pub fn add_part(&mut self, part: TunePart) -> Result<()> {
        if self.part(&part.label).is_some() {
            return Err(ChordGridError::DuplicatePartLabel {
                tune: self.id.clone(),
                label: part.label,
            });
        }
        self.parts.push(part);
        Ok(())
    }

    /// Relabel the part at `position`. Fails if the label is taken by another part.
    pub fn set_part_label(&mut self, position: usize, label: &str) -> Result<()> {
        let label = label.trim();
        let taken = self
            .parts
            .iter()
            .enumerate()
            .any(|(i, p)| i != position && p.label == label);
        if taken {
            return Err(ChordGridError::DuplicatePartLabel {
                tune: self.id.clone(),
                label: label.to_string(),
            });
        }
        match self.parts.get_mut(position) {
            Some(part) => {
                part.label = label.to_string();
                Ok(())
            }
            None => Err(ChordGridError::format(format!(
                "Tune '{}' has no part at position {}",
                self.id, position
            ))),
        }
    }

    /// The next automatic label: the first of "A".."Z" not used by a part.
    pub fn next_label(&self) -> String {
        ('A'..='Z')
            .map(String::from)
            .chain((1..).map(|n| format!("P{}", n)))
            .find(|candidate| self.part(candidate).is_none())
            .unwrap_or_default()
    }

    /// Concatenated chord grids of all parts.
    pub fn chord_grid(&self) -> String {
        self.parts
            .iter()
            .map(TunePart::chord_grid)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The serialized parts; this is what tune equality compares.
    pub fn parts_text(&self) -> String {
        self.parts.iter().map(|p| p.to_string()).collect()
    }

    pub fn count_total_lines(&self) -> usize {
        self.parts.iter().map(|p| p.lines.len()).sum()
    }

    pub fn max_measures_per_line(&self) -> usize {
        self.parts
            .iter()
            .map(TunePart::max_measures_per_line)
            .max()
            .unwrap_or(0)
    }

    /// Content equality: rhythm, key and part text. Id and index are ignored.
    pub fn same_content(&self, other: &Tune) -> bool {
        self.rhythm == other.rhythm
            && self.key.to_lowercase() == other.key.to_lowercase()
            && self.parts_text().to_lowercase() == other.parts_text().to_lowercase()
    }
}

/// Tunes compare by content, see [`Tune::same_content`].
impl PartialEq for Tune {
    fn eq(&self, other: &Self) -> bool {
        self.same_content(other)
    }
}

impl fmt::Display for Tune {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "X:{}", self.index)?;
        writeln!(f, "I:{}", self.id)?;
        writeln!(f, "T:{}", self.name)?;
        writeln!(f, "R:{}", self.rhythm.name())?;
        writeln!(f, "K:{}", self.key)?;
        for part in &self.parts {
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// A named, ordered list of references to tunes of a tunebook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TuneSet {
    name: String,
    tune_ids: Vec<String>,
}

impl TuneSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            tune_ids: Vec::new(),
        }
    }

    /// Build a set; an empty or `"null"` name is replaced by the member ids
    /// joined with `_`.
    pub fn with_tunes(name: &str, tune_ids: Vec<String>) -> Self {
        let name = name.trim();
        let name = if name.is_empty() || name.eq_ignore_ascii_case("null") {
            tune_ids.join("_")
        } else {
            name.to_string()
        };
        Self { name, tune_ids }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.trim().to_string();
    }

    pub fn tune_ids(&self) -> &[String] {
        &self.tune_ids
    }

    pub fn len(&self) -> usize {
        self.tune_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tune_ids.is_empty()
    }

    pub fn push(&mut self, tune_id: &str) {
        self.tune_ids.push(tune_id.to_string());
    }

    pub fn clear(&mut self) {
        self.tune_ids.clear();
    }

    pub fn set_tunes(&mut self, tune_ids: Vec<String>) {
        self.tune_ids = tune_ids;
    }

    /// Zero-based position of a tune in the set.
    pub fn position(&self, tune_id: &str) -> Option<usize> {
        self.tune_ids.iter().position(|id| id == tune_id)
    }

    /// Resolve the member tunes; ids missing from the book are skipped.
    pub fn tunes<'a>(&'a self, book: &'a Tunebook) -> impl Iterator<Item = &'a Tune> + 'a {
        self.tune_ids.iter().filter_map(move |id| book.get_tune_from_id(id))
    }

    /// Member titles joined by `" / "`.
    pub fn title(&self, book: &Tunebook) -> String {
        self.tunes(book)
            .map(Tune::title)
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// The rhythm shared by most member tunes. On a tie, the rhythm met first
    /// in set order wins.
    pub fn dominant_rhythm<'a>(&'a self, book: &'a Tunebook) -> Option<&'a Rhythm> {
        let mut counts: Vec<(&Rhythm, usize)> = Vec::new();
        for tune in self.tunes(book) {
            match counts.iter_mut().find(|(r, _)| *r == tune.rhythm()) {
                Some((_, count)) => *count += 1,
                None => counts.push((tune.rhythm(), 1)),
            }
        }
        let mut best: Option<(&Rhythm, usize)> = None;
        for (rhythm, count) in counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((rhythm, count));
            }
        }
        best.map(|(r, _)| r)
    }

    fn rename_reference(&mut self, old_id: &str, new_id: &str) {
        for id in self.tune_ids.iter_mut() {
            if id == old_id {
                *id = new_id.to_string();
            }
        }
    }
}

impl fmt::Display for TuneSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SET:{}", self.name)?;
        writeln!(f, "{}", self.tune_ids.join(" "))
    }
}

/// A tune or a tune set, for uniform list handling.
#[derive(Debug, Clone, Copy)]
pub enum TunebookItem<'a> {
    Tune(&'a Tune),
    Set(&'a TuneSet),
}

impl<'a> TunebookItem<'a> {
    pub fn title(&self, book: &Tunebook) -> String {
        match *self {
            TunebookItem::Tune(tune) => tune.title(),
            TunebookItem::Set(set) => set.title(book),
        }
    }

    pub fn rhythm(&self, book: &'a Tunebook) -> Option<&'a Rhythm> {
        match *self {
            TunebookItem::Tune(tune) => Some(tune.rhythm()),
            TunebookItem::Set(set) => set.dominant_rhythm(book),
        }
    }
}

/// The root document: tunes keyed by id, plus ordered tune sets.
#[derive(Debug, Clone, Default)]
pub struct Tunebook {
    tunes: BTreeMap<String, Tune>,
    sets: Vec<TuneSet>,
}

impl Tunebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_tunes(&self) -> usize {
        self.tunes.len()
    }

    pub fn count_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn get_tune_from_id(&self, id: &str) -> Option<&Tune> {
        self.tunes.get(id)
    }

    /// First tune (in id order) carrying `index`.
    pub fn get_tune_from_index(&self, index: u32) -> Option<&Tune> {
        self.tunes.values().find(|t| t.index == index)
    }

    pub fn tune_mut(&mut self, id: &str) -> Option<&mut Tune> {
        self.tunes.get_mut(id)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.tunes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tunes.keys().map(String::as_str)
    }

    /// Tunes in id order.
    pub fn tunes(&self) -> impl Iterator<Item = &Tune> {
        self.tunes.values()
    }

    /// Tunes in display order: descending index, then ascending id.
    pub fn tunes_by_index(&self) -> Vec<&Tune> {
        let mut tunes: Vec<&Tune> = self.tunes.values().collect();
        tunes.sort_by(|a, b| b.index.cmp(&a.index).then_with(|| a.id.cmp(&b.id)));
        tunes
    }

    /// One past the highest index in use.
    pub fn next_index(&self) -> u32 {
        self.tunes.values().map(|t| t.index).max().unwrap_or(0) + 1
    }

    /// Insert a tune under its id, returning the tune it replaced.
    pub fn insert_tune(&mut self, tune: Tune) -> Option<Tune> {
        self.tunes.insert(tune.id.clone(), tune)
    }

    /// Remove a tune and every set reference to it.
    pub fn remove_tune(&mut self, id: &str) -> Option<Tune> {
        let removed = self.tunes.remove(id)?;
        for set in &mut self.sets {
            set.tune_ids.retain(|r| r != id);
        }
        Some(removed)
    }

    /// Change a tune's id, updating set references. Fails if the new id is taken.
    pub fn rename_tune(&mut self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }
        if self.tunes.contains_key(new_id) {
            return Err(ChordGridError::format(format!("Tune id '{}' already in use", new_id)));
        }
        let mut tune = self
            .tunes
            .remove(old_id)
            .ok_or_else(|| ChordGridError::format(format!("No tune with id '{}'", old_id)))?;
        tune.id = new_id.to_string();
        self.tunes.insert(new_id.to_string(), tune);
        for set in &mut self.sets {
            set.rename_reference(old_id, new_id);
        }
        Ok(())
    }

    pub fn sets(&self) -> &[TuneSet] {
        &self.sets
    }

    pub fn set(&self, name: &str) -> Option<&TuneSet> {
        self.sets.iter().find(|s| s.name == name)
    }

    pub fn set_mut(&mut self, name: &str) -> Option<&mut TuneSet> {
        self.sets.iter_mut().find(|s| s.name == name)
    }

    /// Append a set unless one with the same name exists. Returns whether it was added.
    pub fn add_set(&mut self, set: TuneSet) -> bool {
        if self.set(&set.name).is_some() {
            tracing::warn!("Set with name {} already exists, skip add", set.name);
            return false;
        }
        self.sets.push(set);
        true
    }

    /// Append a set without the name check.
    pub fn push_set(&mut self, set: TuneSet) {
        self.sets.push(set);
    }

    pub fn remove_set(&mut self, name: &str) -> Option<TuneSet> {
        let position = self.sets.iter().position(|s| s.name == name)?;
        Some(self.sets.remove(position))
    }

    /// Replace the set named `name` in place. Returns false if there is none.
    pub fn replace_set(&mut self, name: &str, set: TuneSet) -> bool {
        match self.sets.iter_mut().find(|s| s.name == name) {
            Some(slot) => {
                *slot = set;
                true
            }
            None => false,
        }
    }

    /// Distinct tune rhythms, sorted by name.
    pub fn all_tune_rhythms(&self) -> Vec<&Rhythm> {
        distinct_sorted(self.tunes.values().map(Tune::rhythm))
    }

    pub fn tunes_with_rhythm(&self, rhythm: &Rhythm) -> Vec<&Tune> {
        self.tunes.values().filter(|t| t.rhythm() == rhythm).collect()
    }

    /// Distinct dominant rhythms of the sets, sorted by name.
    pub fn all_set_rhythms(&self) -> Vec<&Rhythm> {
        distinct_sorted(self.sets.iter().filter_map(|s| s.dominant_rhythm(self)))
    }

    pub fn sets_with_rhythm(&self, rhythm: &Rhythm) -> Vec<&TuneSet> {
        self.sets
            .iter()
            .filter(|s| s.dominant_rhythm(self) == Some(rhythm))
            .collect()
    }

    /// Split into tunes (id order) and sets.
    pub fn into_parts(self) -> (Vec<Tune>, Vec<TuneSet>) {
        (self.tunes.into_values().collect(), self.sets)
    }

    /// Tunes in display order followed by sets.
    pub fn items(&self) -> Vec<TunebookItem<'_>> {
        self.tunes_by_index()
            .into_iter()
            .map(TunebookItem::Tune)
            .chain(self.sets.iter().map(TunebookItem::Set))
            .collect()
    }
}

fn distinct_sorted<'a>(rhythms: impl Iterator<Item = &'a Rhythm>) -> Vec<&'a Rhythm> {
    let mut out: Vec<&Rhythm> = Vec::new();
    for rhythm in rhythms {
        if !out.contains(&rhythm) {
            out.push(rhythm);
        }
    }
    out.sort_by(|a, b| a.name().cmp(b.name()));
    out
}

impl fmt::Display for Tunebook {
    /// Text form: tunes by descending index, each followed by a blank line,
    /// then sets in insertion order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tune in self.tunes_by_index() {
            writeln!(f, "{}", tune)?;
        }
        for set in &self.sets {
            writeln!(f, "{}", set)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reel() -> Rhythm {
        Rhythm::new("Reel", "4/4", 4).unwrap()
    }

    fn jig() -> Rhythm {
        Rhythm::new("Jig", "6/8", 2).unwrap()
    }

    fn line(bars: &[&str], repeat: bool) -> Line {
        Line::new(
            bars.iter()
                .map(|b| Measure::new(b.split_whitespace().map(Chord::new).collect()))
                .collect(),
            repeat,
        )
    }

    fn tune(id: &str, rhythm: Rhythm, key: &str, bars: &[&str]) -> Tune {
        let mut t = Tune::with_id(id, id, rhythm, key);
        t.add_part(TunePart::new("A", vec![line(bars, false)])).unwrap();
        t
    }

    #[test]
    fn test_generate_id() {
        assert_eq!(generate_id("My Reel").as_deref(), Some("my_reel"));
        assert_eq!(generate_id("The Kesh -- Jig!").as_deref(), Some("the_kesh_jig_"));
        assert_eq!(generate_id("   "), None);
    }

    #[test]
    fn test_chord_is_trimmed() {
        assert_eq!(Chord::new("  Am7 ").value(), "Am7");
    }

    #[test]
    fn test_line_display() {
        assert_eq!(line(&["D G", "A D"], false).to_string(), "| D G | A D | ");
        assert_eq!(line(&["D G", "A D"], true).to_string(), "|: D G | A D :|");
    }

    #[test]
    fn test_part_display_has_label_on_first_line() {
        let part = TunePart::new("B", vec![line(&["D"], false), line(&["G"], true)]);
        assert_eq!(part.to_string(), "B) | D | \n|: G :|\n");
        assert_eq!(part.chord_grid(), "| D |\n|: G :|");
    }

    #[test]
    fn test_largest_chord_text() {
        let m = Measure::new(vec![Chord::new("D"), Chord::new("Gmaj7"), Chord::new("A7")]);
        assert_eq!(m.largest_chord_text(), "Gmaj7");
        assert_eq!(Measure::default().largest_chord_text(), "");
    }

    #[test]
    fn test_tune_title_moves_article() {
        let t = Tune::new("Kesh, The", jig(), "G").unwrap();
        assert_eq!(t.title(), "The Kesh");
        assert_eq!(t.id(), "kesh_the");
    }

    #[test]
    fn test_tune_new_requires_title() {
        assert!(Tune::new("", jig(), "G").is_err());
    }

    #[test]
    fn test_equality_ignores_id_index_and_case() {
        let mut a = tune("a", reel(), "D", &["D G", "A D"]);
        let b = tune("b", reel(), "d", &["d g", "a d"]);
        a.set_index(12);
        assert_eq!(a, b);
        assert_ne!(a, tune("a", jig(), "D", &["D G", "A D"]));
        assert_ne!(a, tune("a", reel(), "G", &["D G", "A D"]));
        assert_ne!(a, tune("a", reel(), "D", &["D G", "A A"]));
    }

    #[test]
    fn test_duplicate_part_label_rejected() {
        let mut t = tune("t", reel(), "D", &["D"]);
        let err = t.add_part(TunePart::new("A", vec![])).unwrap_err();
        assert!(matches!(err, ChordGridError::DuplicatePartLabel { .. }));
        t.add_part(TunePart::new("B", vec![])).unwrap();
        assert!(t.set_part_label(1, "A").is_err());
        t.set_part_label(1, "C").unwrap();
        assert!(t.part("C").is_some());
    }

    #[test]
    fn test_next_label_skips_used_labels() {
        let mut t = Tune::with_id("t", "T", reel(), "D");
        assert_eq!(t.next_label(), "A");
        t.add_part(TunePart::new("A", vec![])).unwrap();
        t.add_part(TunePart::new("C", vec![])).unwrap();
        assert_eq!(t.next_label(), "B");
    }

    #[test]
    fn test_tunes_by_index_descending_with_id_tiebreak() {
        let mut book = Tunebook::new();
        for (id, index) in [("b", 1), ("a", 1), ("c", 3)] {
            let mut t = tune(id, reel(), "D", &[id]);
            t.set_index(index);
            book.insert_tune(t);
        }
        let ids: Vec<&str> = book.tunes_by_index().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(book.next_index(), 4);
    }

    #[test]
    fn test_dominant_rhythm_first_wins_ties() {
        let mut book = Tunebook::new();
        book.insert_tune(tune("j1", jig(), "D", &["D"]));
        book.insert_tune(tune("r1", reel(), "D", &["G"]));
        book.insert_tune(tune("r2", reel(), "D", &["A"]));

        let tied = TuneSet::with_tunes("s", vec!["j1".into(), "r1".into()]);
        assert_eq!(tied.dominant_rhythm(&book), Some(&jig()));

        let majority = TuneSet::with_tunes("m", vec!["j1".into(), "r1".into(), "r2".into()]);
        assert_eq!(majority.dominant_rhythm(&book), Some(&reel()));

        assert_eq!(TuneSet::new("empty").dominant_rhythm(&book), None);
    }

    #[test]
    fn test_set_generated_name() {
        let set = TuneSet::with_tunes("null", vec!["jig1".into(), "reel1".into()]);
        assert_eq!(set.name(), "jig1_reel1");
        assert_eq!(set.to_string(), "SET:jig1_reel1\njig1 reel1\n");
    }

    #[test]
    fn test_rename_and_remove_keep_sets_consistent() {
        let mut book = Tunebook::new();
        book.insert_tune(tune("a", reel(), "D", &["D"]));
        book.insert_tune(tune("b", reel(), "D", &["G"]));
        book.add_set(TuneSet::with_tunes("s", vec!["a".into(), "b".into()]));

        book.rename_tune("a", "a2").unwrap();
        assert_eq!(book.set("s").unwrap().tune_ids(), ["a2", "b"]);
        assert_eq!(book.get_tune_from_id("a2").unwrap().id(), "a2");
        assert!(book.rename_tune("b", "a2").is_err());

        book.remove_tune("b");
        assert_eq!(book.set("s").unwrap().tune_ids(), ["a2"]);
    }

    #[test]
    fn test_add_set_rejects_duplicate_name() {
        let mut book = Tunebook::new();
        assert!(book.add_set(TuneSet::new("Session")));
        assert!(!book.add_set(TuneSet::new("Session")));
        book.push_set(TuneSet::new("Session"));
        assert_eq!(book.count_sets(), 2);
    }

    #[test]
    fn test_items_and_rhythm_queries() {
        let mut book = Tunebook::new();
        book.insert_tune(tune("j1", jig(), "D", &["D"]));
        book.insert_tune(tune("r1", reel(), "D", &["G"]));
        book.add_set(TuneSet::with_tunes("jigs", vec!["j1".into()]));

        let items = book.items();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], TunebookItem::Set(_)));
        assert_eq!(items[2].rhythm(&book), Some(&jig()));

        let names: Vec<&str> = book.all_tune_rhythms().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["Jig", "Reel"]);
        assert_eq!(book.tunes_with_rhythm(&reel()).len(), 1);
        assert_eq!(book.sets_with_rhythm(&jig()).len(), 1);
        assert_eq!(book.all_set_rhythms(), vec![&jig()]);
    }
}
