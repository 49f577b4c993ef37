//! # XML Format
//!
//! Reads and writes the XML form of a tunebook:
//!
//! ```text
//! <TuneBook>
//!   <Tunes>
//!     <Tune id="" index="" name="" rhythm="" key="">
//!       <Part label="A">
//!         <Line repeat="yes|no">
//!           <Measure><Chord>D</Chord></Measure>
//!         </Line>
//!       </Part>
//!     </Tune>
//!   </Tunes>
//!   <TuneSets>
//!     <TuneSet name=""><TuneRef id=""/></TuneSet>
//!   </TuneSets>
//! </TuneBook>
//! ```
//!
//! Element and attribute names match case-insensitively. Older documents
//! spell the rhythm attribute `rythm` and may hold a part's grid as a `Text`
//! element instead of `Line` elements; both are accepted.
//!
//! Reading happens in two steps: quick-xml events are collected into a small
//! element tree, which is then interpreted into the model. Like the text
//! parser, a malformed tune is skipped and reported without failing the
//! document, and unknown set references are dropped. A document whose `TuneSets` come before its `Tunes` is
//! rejected, since sets are resolved against the tunes already read.

use std::io::Write;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::error::{ChordGridError, Result};
use crate::model::{generate_id, Chord, Line, Measure, Tune, TunePart, TuneSet, Tunebook};
use crate::parser::{
    assign_labels, parse_line, FragmentKind, ParseReport, SkippedFragment, UnresolvedReference,
};
use crate::rhythm::{Rhythm, RhythmRegistry};

const ROOT_TAG: &str = "TuneBook";
const TUNES_TAG: &str = "Tunes";
const TUNE_SETS_TAG: &str = "TuneSets";
const TUNE_TAG: &str = "Tune";
const PART_TAG: &str = "Part";
const TEXT_TAG: &str = "Text";
const LINE_TAG: &str = "Line";
const MEASURE_TAG: &str = "Measure";
const CHORD_TAG: &str = "Chord";
const TUNE_SET_TAG: &str = "TuneSet";
const TUNE_REF_TAG: &str = "TuneRef";

/// An element with its attributes, text and children.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart) -> Result<Self> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn is(&self, tag: &str) -> bool {
        self.name.eq_ignore_ascii_case(tag)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(tag))
    }
}

/// Collect the document into an element tree and return its root.
fn read_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => stack.push(Element::from_start(e)?),
            Event::Empty(ref e) => {
                let element = Element::from_start(e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ChordGridError::Xml("Unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(ref t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ChordGridError::Xml("Unexpected end of document".to_string()));
    }
    root.ok_or_else(|| ChordGridError::Xml("Document has no root element".to_string()))
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ChordGridError::Xml("Document has several root elements".to_string())),
    }
    Ok(())
}

/// Read an XML tunebook, skipping malformed tunes.
pub fn read_tunebook(xml: &str, registry: &RhythmRegistry) -> Result<Tunebook> {
    read_tunebook_with_report(xml, registry).map(|(book, _)| book)
}

/// Read an XML tunebook and report what was skipped.
///
/// # Errors
/// - [`ChordGridError::Xml`] if the document is not well-formed XML
/// - [`ChordGridError::Format`] if a `Tunes` section follows a `TuneSets` section
pub fn read_tunebook_with_report(
    xml: &str,
    registry: &RhythmRegistry,
) -> Result<(Tunebook, ParseReport)> {
    let root = read_tree(xml)?;
    if !root.is(ROOT_TAG) {
        warn!("Unexpected root element <{}>, reading it as a tunebook", root.name);
    }

    let mut book = Tunebook::new();
    let mut report = ParseReport::default();
    let mut tune_ordinal = 0;
    let mut sets_seen = false;

    for section in &root.children {
        if section.is(TUNES_TAG) {
            if sets_seen {
                return Err(ChordGridError::format("Tunes section must precede TuneSets"));
            }
            for element in section.children_named(TUNE_TAG) {
                tune_ordinal += 1;
                match read_tune(element, tune_ordinal, registry) {
                    Ok(tune) => {
                        if let Some(previous) = book.insert_tune(tune) {
                            warn!("Tune id '{}' appears twice, keeping the last one", previous.id());
                        }
                    }
                    Err(error) => {
                        warn!("Skipping tune #{}: {}", tune_ordinal, error);
                        report.skipped.push(SkippedFragment {
                            kind: FragmentKind::Tune,
                            ordinal: tune_ordinal,
                            error,
                        });
                    }
                }
            }
        } else if section.is(TUNE_SETS_TAG) {
            sets_seen = true;
            for element in section.children_named(TUNE_SET_TAG) {
                let (set, unresolved) = read_tune_set(element, &book);
                report.unresolved.extend(unresolved.into_iter().map(|reference| {
                    UnresolvedReference {
                        set: set.name().to_string(),
                        reference,
                    }
                }));
                book.add_set(set);
            }
        } else {
            debug!("Ignoring element <{}>", section.name);
        }
    }

    debug!(
        "Read XML tunebook with {} tunes and {} sets",
        book.count_tunes(),
        book.count_sets()
    );
    Ok((book, report))
}

/// Resolve a rhythm attribute: a registry name, or the persisted `[...]` form.
fn read_rhythm(value: &str, registry: &RhythmRegistry) -> Result<Rhythm> {
    match registry.get(value) {
        Ok(rhythm) => Ok(rhythm.clone()),
        Err(_) if value.trim_start().starts_with('[') => {
            let parsed: Rhythm = value.parse()?;
            Ok(registry.get(parsed.name()).cloned().unwrap_or(parsed))
        }
        Err(e) => Err(e),
    }
}

fn read_tune(element: &Element, position: usize, registry: &RhythmRegistry) -> Result<Tune> {
    let name = element.attr("name").unwrap_or("");
    let key = element.attr("key").unwrap_or("");
    let rhythm = element
        .attr("rhythm")
        .or_else(|| element.attr("rythm"))
        .ok_or_else(|| ChordGridError::format("Tune element has no rhythm attribute"))?;
    let rhythm = read_rhythm(rhythm, registry)?;

    let index = match element.attr("index") {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ChordGridError::format(format!("Invalid tune index '{}'", value)))?,
        None => u32::try_from(position).unwrap_or(u32::MAX),
    };

    let id = match element.attr("id").map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => generate_id(name)
            .ok_or_else(|| ChordGridError::format("Tune element has neither an id nor a name"))?,
    };

    let mut tune = Tune::with_id(&id, name, rhythm, key);
    tune.set_index(index);

    let parts: Vec<&Element> = element.children_named(PART_TAG).collect();
    let explicit = parts
        .iter()
        .map(|part| {
            part.attr("label")
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
        })
        .collect();
    for (part, label) in parts.into_iter().zip(assign_labels(explicit)) {
        tune.add_part(TunePart::new(&label, read_lines(part)?))?;
    }
    debug!("Read tune '{}' with {} parts", tune.id(), tune.count_parts());
    Ok(tune)
}

fn read_lines(part: &Element) -> Result<Vec<Line>> {
    let mut lines = part
        .children_named(LINE_TAG)
        .map(read_line)
        .collect::<Result<Vec<Line>>>()?;
    if lines.is_empty() {
        lines = part
            .children_named(TEXT_TAG)
            .flat_map(|text| text.text.lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(parse_line)
            .collect();
    }
    Ok(lines)
}

fn read_line(element: &Element) -> Result<Line> {
    let repeat = element
        .attr("repeat")
        .map(|value| !value.trim().is_empty() && !value.trim().eq_ignore_ascii_case("no"))
        .unwrap_or(false);
    let measures = element
        .children_named(MEASURE_TAG)
        .map(read_measure)
        .collect::<Result<Vec<Measure>>>()?;
    Ok(Line::new(measures, repeat))
}

/// Chord text holding several symbols ("D G") becomes several chords.
/// A bar line inside a chord cannot be expressed in the text format.
fn read_measure(element: &Element) -> Result<Measure> {
    let mut chords = Vec::new();
    for chord in element.children_named(CHORD_TAG) {
        if chord.text.contains('|') {
            return Err(ChordGridError::format(format!(
                "Bar line inside chord '{}'",
                chord.text.trim()
            )));
        }
        chords.extend(chord.text.split_whitespace().map(Chord::new));
    }
    Ok(Measure::new(chords))
}

fn read_tune_set(element: &Element, book: &Tunebook) -> (TuneSet, Vec<String>) {
    let mut ids = Vec::new();
    let mut unresolved = Vec::new();
    for reference in element.children_named(TUNE_REF_TAG) {
        let id = reference.attr("id").unwrap_or("").trim();
        if book.contains_id(id) {
            ids.push(id.to_string());
        } else {
            warn!("Unknown tune id '{}' in tune set", id);
            unresolved.push(id.to_string());
        }
    }
    let set = TuneSet::with_tunes(element.attr("name").unwrap_or(""), ids);
    (set, unresolved)
}

fn escape_xml(s: &str) -> String {
    escape(s).into_owned()
}

/// Convert a tunebook to its XML form.
pub fn to_xml(book: &Tunebook) -> String {
    let mut xml = String::new();

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!("<{}>\n", ROOT_TAG));

    xml.push_str(&format!("  <{}>\n", TUNES_TAG));
    for tune in book.tunes_by_index() {
        xml.push_str(&tune_to_xml(tune));
    }
    xml.push_str(&format!("  </{}>\n", TUNES_TAG));

    xml.push_str(&format!("  <{}>\n", TUNE_SETS_TAG));
    for set in book.sets() {
        xml.push_str(&tune_set_to_xml(set));
    }
    xml.push_str(&format!("  </{}>\n", TUNE_SETS_TAG));

    xml.push_str(&format!("</{}>\n", ROOT_TAG));
    xml
}

/// Write the XML form of a tunebook.
pub fn write_tunebook<W: Write>(book: &Tunebook, writer: &mut W) -> Result<()> {
    writer.write_all(to_xml(book).as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn tune_to_xml(tune: &Tune) -> String {
    let mut xml = format!(
        "    <{} id=\"{}\" index=\"{}\" name=\"{}\" rhythm=\"{}\" key=\"{}\">\n",
        TUNE_TAG,
        escape_xml(tune.id()),
        tune.index(),
        escape_xml(tune.name()),
        escape_xml(tune.rhythm().name()),
        escape_xml(tune.key())
    );
    for part in tune.parts() {
        xml.push_str(&format!("      <{} label=\"{}\">\n", PART_TAG, escape_xml(part.label())));
        for line in part.lines() {
            xml.push_str(&line_to_xml(line));
        }
        xml.push_str(&format!("      </{}>\n", PART_TAG));
    }
    xml.push_str(&format!("    </{}>\n", TUNE_TAG));
    xml
}

fn line_to_xml(line: &Line) -> String {
    let repeat = if line.repeat { "yes" } else { "no" };
    let mut xml = format!("        <{} repeat=\"{}\">\n", LINE_TAG, repeat);
    for measure in &line.measures {
        if measure.is_empty() {
            xml.push_str(&format!("          <{} />\n", MEASURE_TAG));
            continue;
        }
        xml.push_str(&format!("          <{}>\n", MEASURE_TAG));
        for chord in &measure.chords {
            xml.push_str(&format!(
                "            <{}>{}</{}>\n",
                CHORD_TAG,
                escape_xml(chord.value()),
                CHORD_TAG
            ));
        }
        xml.push_str(&format!("          </{}>\n", MEASURE_TAG));
    }
    xml.push_str(&format!("        </{}>\n", LINE_TAG));
    xml
}

fn tune_set_to_xml(set: &TuneSet) -> String {
    let mut xml = format!("    <{} name=\"{}\">\n", TUNE_SET_TAG, escape_xml(set.name()));
    for id in set.tune_ids() {
        xml.push_str(&format!("      <{} id=\"{}\" />\n", TUNE_REF_TAG, escape_xml(id)));
    }
    xml.push_str(&format!("    </{}>\n", TUNE_SET_TAG));
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RhythmRegistry {
        RhythmRegistry::with_defaults()
    }

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TuneBook>
  <Tunes>
    <Tune id="kesh" name="Kesh, The" rythm="Jig" key="G">
      <Part label="A">
        <Line repeat="yes">
          <Measure><Chord>G</Chord></Measure>
          <Measure><Chord>D</Chord><Chord>G</Chord></Measure>
        </Line>
      </Part>
      <Part>
        <Line repeat="no">
          <Measure><Chord>C</Chord></Measure>
          <Measure/>
        </Line>
      </Part>
    </Tune>
    <Tune id="reel1" name="My Reel" rhythm="Reel" key="D">
      <Part label="A">
        <Line repeat="no"><Measure><Chord>D</Chord></Measure></Line>
      </Part>
    </Tune>
  </Tunes>
  <TuneSets>
    <TuneSet name="Session">
      <TuneRef id="kesh"/>
      <TuneRef id="missing"/>
      <TuneRef id="reel1"/>
    </TuneSet>
  </TuneSets>
</TuneBook>
"#;

    #[test]
    fn test_read_sample() {
        let (book, report) = read_tunebook_with_report(SAMPLE, &registry()).unwrap();
        assert_eq!(book.count_tunes(), 2);

        let kesh = book.get_tune_from_id("kesh").unwrap();
        assert_eq!(kesh.title(), "The Kesh");
        assert_eq!(kesh.rhythm().name(), "Jig");
        assert_eq!(kesh.index(), 1);
        assert_eq!(kesh.count_parts(), 2);
        assert_eq!(kesh.parts()[1].label(), "B");

        let first = &kesh.parts()[0].lines()[0];
        assert!(first.repeat);
        assert_eq!(first.measures[1].chords, vec![Chord::new("D"), Chord::new("G")]);
        assert!(kesh.parts()[1].lines()[0].measures[1].is_empty());

        assert_eq!(book.get_tune_from_id("reel1").unwrap().index(), 2);

        let set = book.set("Session").unwrap();
        assert_eq!(set.tune_ids(), ["kesh", "reel1"]);
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].reference, "missing");
    }

    #[test]
    fn test_write_then_read() {
        let book = read_tunebook(SAMPLE, &registry()).unwrap();
        let xml = to_xml(&book);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"rhythm="Jig""#));
        assert!(xml.contains(r#"index="2""#));

        let again = read_tunebook(&xml, &registry()).unwrap();
        assert_eq!(again.count_tunes(), book.count_tunes());
        for tune in book.tunes() {
            let other = again.get_tune_from_id(tune.id()).unwrap();
            assert_eq!(other, tune);
            assert_eq!(other.index(), tune.index());
            assert_eq!(other.name(), tune.name());
        }
        assert_eq!(again.sets(), book.sets());
    }

    #[test]
    fn test_text_and_xml_agree() {
        let text = "X:1\nI:reel1\nT:My Reel\nR:Reel\nK:D\nA) |D G|A D|\n|: G | D :|\n";
        let from_text = Tunebook::parse(text, &registry());
        let from_xml = read_tunebook(&to_xml(&from_text), &registry()).unwrap();
        assert_eq!(
            from_xml.get_tune_from_id("reel1"),
            from_text.get_tune_from_id("reel1")
        );
    }

    #[test]
    fn test_escaping() {
        let mut book = Tunebook::new();
        let reel = registry().get("Reel").unwrap().clone();
        let mut tune = Tune::with_id("a_b", "Rock & Roll <live>", reel, "D");
        tune.add_part(TunePart::new("A", vec![Line::new(vec![Measure::new(vec![Chord::new("D\"")])], false)]))
            .unwrap();
        book.insert_tune(tune);

        let xml = to_xml(&book);
        assert!(xml.contains("Rock &amp; Roll &lt;live&gt;"));

        let again = read_tunebook(&xml, &registry()).unwrap();
        let tune = again.get_tune_from_id("a_b").unwrap();
        assert_eq!(tune.name(), "Rock & Roll <live>");
        assert_eq!(tune.parts()[0].lines()[0].measures[0].chords[0].value(), "D\"");
    }

    #[test]
    fn test_sets_before_tunes_is_rejected() {
        let xml = "<TuneBook><TuneSets/><Tunes/></TuneBook>";
        assert!(matches!(
            read_tunebook(xml, &registry()),
            Err(ChordGridError::Format { .. })
        ));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = "<TuneBook><Tunes></TuneBook>";
        assert!(matches!(read_tunebook(xml, &registry()), Err(ChordGridError::Xml(_))));
        assert!(matches!(read_tunebook("", &registry()), Err(ChordGridError::Xml(_))));
    }

    #[test]
    fn test_bad_tune_is_skipped() {
        let xml = r#"<TuneBook><Tunes>
            <Tune id="a" name="A" rhythm="Strathspey" key="D"/>
            <Tune id="b" name="B" rhythm="Reel" key="D"/>
            <Tune id="c" name="C" key="D"/>
        </Tunes></TuneBook>"#;
        let (book, report) = read_tunebook_with_report(xml, &registry()).unwrap();
        assert_eq!(book.count_tunes(), 1);
        assert!(book.contains_id("b"));
        assert_eq!(book.get_tune_from_id("b").unwrap().index(), 2);
        let ordinals: Vec<usize> = report.skipped.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 3]);
        assert!(matches!(report.skipped[0].error, ChordGridError::UnknownRhythm(_)));
    }

    #[test]
    fn test_legacy_text_part() {
        let xml = r#"<TuneBook><Tunes>
            <Tune name="Old One" rythm="Polka" key="G">
              <Part label="A"><Text>
                | G | D |
                |: C | G :|
              </Text></Part>
            </Tune>
        </Tunes></TuneBook>"#;
        let book = read_tunebook(xml, &registry()).unwrap();
        let tune = book.get_tune_from_id("old_one").unwrap();
        let lines = tune.parts()[0].lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].repeat);
    }

    #[test]
    fn test_unnamed_set_gets_generated_name() {
        let xml = r#"<TuneBook><Tunes>
            <Tune id="a" name="A" rhythm="Reel" key="D"/>
            <Tune id="b" name="B" rhythm="Reel" key="D"/>
        </Tunes><TuneSets><TuneSet><TuneRef id="b"/><TuneRef id="a"/></TuneSet></TuneSets></TuneBook>"#;
        let book = read_tunebook(xml, &registry()).unwrap();
        assert_eq!(book.sets()[0].name(), "b_a");
    }

    #[test]
    fn test_empty_part_survives_text_round_trip() {
        let xml = r#"<TuneBook><Tunes>
            <Tune id="p" name="P" rhythm="Reel" key="D">
              <Part label="A"/>
              <Part label="B"><Line><Measure><Chord>D</Chord></Measure></Line></Part>
            </Tune>
        </Tunes></TuneBook>"#;
        let book = read_tunebook(xml, &registry()).unwrap();
        let tune = book.get_tune_from_id("p").unwrap();
        assert!(tune.part("A").unwrap().lines().is_empty());

        let text = tune.to_string();
        let again = Tune::parse(&text, &registry()).unwrap();
        assert_eq!(&again, tune);
        assert_eq!(again.to_string(), text);
    }

    #[test]
    fn test_chord_text_with_spaces_is_split() {
        let xml = r#"<TuneBook><Tunes>
            <Tune id="p" name="P" rhythm="Reel" key="D">
              <Part label="A"><Line><Measure><Chord> D  G </Chord><Chord>A7</Chord></Measure></Line></Part>
            </Tune>
        </Tunes></TuneBook>"#;
        let book = read_tunebook(xml, &registry()).unwrap();
        let tune = book.get_tune_from_id("p").unwrap();
        let measure = &tune.parts()[0].lines()[0].measures[0];
        assert_eq!(measure.chords, vec![Chord::new("D"), Chord::new("G"), Chord::new("A7")]);
        assert_eq!(&Tune::parse(&tune.to_string(), &registry()).unwrap(), tune);
    }

    #[test]
    fn test_bar_line_in_chord_skips_tune() {
        let xml = r#"<TuneBook><Tunes>
            <Tune id="p" name="P" rhythm="Reel" key="D">
              <Part label="A"><Line><Measure><Chord>D|G</Chord></Measure></Line></Part>
            </Tune>
        </Tunes></TuneBook>"#;
        let (book, report) = read_tunebook_with_report(xml, &registry()).unwrap();
        assert_eq!(book.count_tunes(), 0);
        assert!(matches!(report.skipped[0].error, ChordGridError::Format { .. }));
    }

    #[test]
    fn test_write_tunebook_to_writer() {
        let book = read_tunebook(SAMPLE, &registry()).unwrap();
        let mut out = Vec::new();
        write_tunebook(&book, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), to_xml(&book));
    }
}
