use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::sample::Pitch;
use crate::target::{onsets_from_seconds, Onset};

/// One annotated note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub instrument: String,
    pub pitch: Pitch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedOnset {
    pub seconds: f32,
    pub notes: Vec<Note>,
}

/// Ground truth for a piece, ordered by onset time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Annotations {
    pub events: Vec<AnnotatedOnset>,
}

impl Annotations {
    /// Ground truth for a single chord at onset 0.
    pub fn chord(notes: Vec<Note>) -> Self {
        Self {
            events: vec![AnnotatedOnset {
                seconds: 0.0,
                notes,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Onset times as sample offsets at `sample_rate`.
    pub fn onsets(&self, sample_rate: u32) -> Vec<Onset> {
        let seconds: Vec<f32> = self.events.iter().map(|e| e.seconds).collect();
        onsets_from_seconds(&seconds, sample_rate)
    }

    /// Replace annotation instrument names with library names where a mapping exists.
    pub fn rename_instruments(&mut self, names: &BTreeMap<String, String>) {
        for note in self.events.iter_mut().flat_map(|e| e.notes.iter_mut()) {
            if let Some(name) = names.get(&note.instrument) {
                note.instrument = name.clone();
            }
        }
    }
}

fn parse_err(input: &str) -> Error {
    Error::Parse {
        what: "arff annotation",
        input: input.to_string(),
    }
}

/// Parse an ARFF onset annotation.
///
/// The first attribute holds the onset time in seconds; each further attribute
/// names an instrument whose column lists the pitches it plays, e.g.
/// `0.52,'[60,64]','[]'`.
pub fn parse_arff(text: &str) -> Result<Annotations> {
    let mut attributes: Vec<String> = Vec::new();
    let mut events = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.to_ascii_uppercase().starts_with("@ATTRIBUTE") {
            let name = line.split('\'').nth(1).ok_or_else(|| parse_err(line))?;
            attributes.push(name.to_string());
            continue;
        }
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }

        let (onset, tail) = line.split_once(',').ok_or_else(|| parse_err(line))?;
        let seconds: f32 = onset.trim().parse().map_err(|_| parse_err(line))?;
        let values: Vec<String> = tail
            .split("]','[")
            .map(|v| v.replace(['\'', '[', ']'], ""))
            .collect();

        let mut notes = Vec::new();
        for (instrument, value) in attributes.iter().skip(1).zip(&values) {
            for pitch in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                notes.push(Note {
                    instrument: instrument.clone(),
                    pitch: pitch.parse()?,
                });
            }
        }
        events.push(AnnotatedOnset { seconds, notes });
    }

    events.sort_by(|a, b| a.seconds.total_cmp(&b.seconds));
    Ok(Annotations { events })
}

pub fn load_arff(path: impl AsRef<Path>) -> Result<Annotations> {
    parse_arff(&fs::read_to_string(path)?)
}
