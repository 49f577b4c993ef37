//! # Rhythms
//!
//! A [`Rhythm`] is a named time signature plus the number of beats per bar
//! (e.g. "Jig" = 6/8, 2 beats per bar). The [`RhythmRegistry`] is the set of
//! rhythms known to the application. It is loaded once from a
//! [`KeyValueStore`] at startup, edited by the user, and handed explicitly to
//! every parser that resolves rhythm names.
//!
//! ## Persisted form
//! One rhythm per line, in its `Display` form:
//! ```text
//! [Jig, 6/8, 2 bpb]
//! [Reel, 4/4, 4 bpb]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{ChordGridError, Result};
use crate::store::KeyValueStore;

/// Store key holding the serialized registry.
pub const RHYTHMS_KEY: &str = "Rhythms";

/// Immutable named time signature.
#[derive(Debug, Clone)]
pub struct Rhythm {
    name: String,
    signature: String,
    numerator: u32,
    denominator: u32,
    beats_per_bar: u32,
}

impl Rhythm {
    /// Build a rhythm. The signature must be `"N/D"` or the common-time
    /// shorthand `"C"` (4/4).
    pub fn new(name: &str, signature: &str, beats_per_bar: u32) -> Result<Self> {
        let name = name.trim();
        let signature = signature.trim();
        if name.is_empty() {
            return Err(ChordGridError::InvalidRhythm(
                "Rhythm name cannot be empty".to_string(),
            ));
        }
        // The persisted form is comma separated
        if name.contains(',') {
            return Err(ChordGridError::InvalidRhythm(format!(
                "Rhythm name '{}' cannot contain a comma",
                name
            )));
        }
        let (numerator, denominator) = parse_signature(signature)?;
        Ok(Self {
            name: name.to_string(),
            signature: signature.to_string(),
            numerator,
            denominator,
            beats_per_bar,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }
}

fn parse_signature(signature: &str) -> Result<(u32, u32)> {
    if signature.is_empty() {
        return Err(ChordGridError::InvalidRhythm(
            "Rhythm signature cannot be empty".to_string(),
        ));
    }
    if signature == "C" {
        return Ok((4, 4));
    }
    let (num, den) = signature.split_once('/').ok_or_else(|| {
        ChordGridError::InvalidRhythm(format!("Rhythm signature must contain '/': {}", signature))
    })?;
    let numerator = num.trim().parse().map_err(|_| {
        ChordGridError::InvalidRhythm(format!("Invalid signature numerator: {}", signature))
    })?;
    let denominator = den.trim().parse().map_err(|_| {
        ChordGridError::InvalidRhythm(format!("Invalid signature denominator: {}", signature))
    })?;
    Ok((numerator, denominator))
}

// Name and signature compare case-insensitively.
impl PartialEq for Rhythm {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.signature.eq_ignore_ascii_case(&other.signature)
            && self.beats_per_bar == other.beats_per_bar
    }
}

impl Eq for Rhythm {}

impl Hash for Rhythm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.to_ascii_lowercase().hash(state);
        self.signature.to_ascii_lowercase().hash(state);
        self.beats_per_bar.hash(state);
    }
}

impl fmt::Display for Rhythm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {} bpb]", self.name, self.signature, self.beats_per_bar)
    }
}

impl FromStr for Rhythm {
    type Err = ChordGridError;

    /// Parse the persisted form `[Name, N/D, B bpb]`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let ill_formed = || ChordGridError::InvalidRhythm(format!("Ill-formed rhythm string: {}", s));

        let inner = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(ill_formed)?;
        let items: Vec<&str> = inner.split(',').map(str::trim).collect();
        if items.len() != 3 {
            return Err(ill_formed());
        }
        let beats = items[2].strip_suffix("bpb").ok_or_else(ill_formed)?;
        let beats_per_bar = beats.trim().parse().map_err(|_| ill_formed())?;
        Rhythm::new(items[0], items[1], beats_per_bar)
    }
}

/// The set of known rhythms, keyed by case-insensitive name and kept sorted.
#[derive(Debug, Clone, Default)]
pub struct RhythmRegistry {
    rhythms: BTreeMap<String, Rhythm>,
}

impl RhythmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rhythms shipped with the application.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, signature, beats) in [
            ("Jig", "6/8", 2),
            ("Reel", "4/4", 4),
            ("Hornpipe", "4/4", 4),
            ("Polka", "2/4", 2),
            ("Slip Jig", "9/8", 3),
            ("Waltz", "3/4", 3),
            ("Mazurka", "3/4", 3),
        ] {
            if let Ok(rhythm) = Rhythm::new(name, signature, beats) {
                registry.add(rhythm);
            }
        }
        registry
    }

    /// Parse a serialized registry, one rhythm per line. Ill-formed lines
    /// are skipped with a warning.
    pub fn parse_lines(serialized: &str) -> Self {
        let mut registry = Self::new();
        for line in serialized.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.parse::<Rhythm>() {
                Ok(rhythm) => registry.add(rhythm),
                Err(e) => warn!("Cannot parse serialized rhythm: {}", e),
            }
        }
        registry
    }

    /// Load the registry from the store, falling back to the defaults when
    /// nothing has been persisted yet.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Self::load_or(store, Self::with_defaults())
    }

    /// Load the registry from the store, falling back to `seed`.
    pub fn load_or(store: &dyn KeyValueStore, seed: RhythmRegistry) -> Result<Self> {
        let registry = match store.get(RHYTHMS_KEY)? {
            Some(blob) if !blob.trim().is_empty() => Self::parse_lines(&blob),
            _ => {
                debug!("No persisted rhythms, using {} seed rhythms", seed.len());
                seed
            }
        };
        for rhythm in registry.iter() {
            debug!("Known rhythm {}", rhythm);
        }
        Ok(registry)
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        debug!("Saving {} rhythms", self.len());
        store.set(RHYTHMS_KEY, &self.to_lines())
    }

    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for rhythm in self.iter() {
            out.push_str(&rhythm.to_string());
            out.push('\n');
        }
        out
    }

    /// Look up a rhythm by name (case-insensitive).
    pub fn get(&self, name: &str) -> Result<&Rhythm> {
        self.rhythms
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| ChordGridError::UnknownRhythm(name.trim().to_string()))
    }

    /// Insert a rhythm, replacing any rhythm with the same name.
    pub fn add(&mut self, rhythm: Rhythm) {
        self.rhythms.insert(rhythm.name().to_lowercase(), rhythm);
    }

    pub fn remove(&mut self, name: &str) -> Option<Rhythm> {
        self.rhythms.remove(&name.trim().to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rhythm> {
        self.rhythms.values()
    }

    pub fn len(&self) -> usize {
        self.rhythms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rhythms.is_empty()
    }
}
