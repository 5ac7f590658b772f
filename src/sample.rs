use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;

const NOTES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// MIDI note number of a recorded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pitch(pub u8);

impl Pitch {
    /// Lowest pitch a shift may land on (A0 region).
    pub const MIN: Pitch = Pitch(20);
    /// Highest pitch a shift may land on (C8).
    pub const MAX: Pitch = Pitch(108);

    pub fn midi(self) -> u8 {
        self.0
    }

    /// Shift by `semitones`, clipped to [`Pitch::MIN`, `Pitch::MAX`].
    pub fn shifted(self, semitones: i32) -> Pitch {
        let shifted = (self.0 as i32 + semitones).clamp(Self::MIN.0 as i32, Self::MAX.0 as i32);
        Pitch(shifted as u8)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let octave = (self.0 / 12) as i32 - 1;
        write!(f, "{}{}", NOTES[(self.0 % 12) as usize], octave)
    }
}

impl FromStr for Pitch {
    type Err = Error;

    /// Parses note names like `c4`, `C#4`, `ais2` or `des3`, or a bare MIDI number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || Error::Parse {
            what: "pitch",
            input: s.to_string(),
        };
        let lower = s.trim().trim_start_matches('+').to_lowercase();
        if let Ok(midi) = lower.parse::<u8>() {
            return if midi <= 127 { Ok(Pitch(midi)) } else { Err(err()) };
        }

        let mut chars = lower.chars();
        let base = match chars.next().ok_or_else(err)? {
            'c' => 0,
            'd' => 2,
            'e' => 4,
            'f' => 5,
            'g' => 7,
            'a' => 9,
            'b' | 'h' => 11,
            _ => return Err(err()),
        };
        let rest: String = chars.collect();
        let split = rest
            .find(|c: char| c.is_ascii_digit() || c == '-')
            .ok_or_else(err)?;
        let (accidental, octave) = rest.split_at(split);
        let offset = match accidental {
            "" => 0,
            "#" | "is" => 1,
            "es" | "s" => -1,
            _ => return Err(err()),
        };
        let octave: i32 = octave.parse().map_err(|_| err())?;
        let midi = base + offset + (octave + 1) * 12;
        if !(0..=127).contains(&midi) {
            return Err(err());
        }
        Ok(Pitch(midi as u8))
    }
}

/// Unpitched percussion hit, stored under the General MIDI percussion key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DrumHit {
    Kick,
    Rimshot,
    Snare,
    Clap,
    FloorTom,
    ClosedHihat,
    LowTom,
    PedalHihat,
    MidTom,
    OpenHihat,
    HighTom,
    Crash,
    Ride,
    China,
    RideBell,
    Tambourine,
    Splash,
    Cowbell,
}

impl DrumHit {
    pub const ALL: [DrumHit; 18] = [
        DrumHit::Kick,
        DrumHit::Rimshot,
        DrumHit::Snare,
        DrumHit::Clap,
        DrumHit::FloorTom,
        DrumHit::ClosedHihat,
        DrumHit::LowTom,
        DrumHit::PedalHihat,
        DrumHit::MidTom,
        DrumHit::OpenHihat,
        DrumHit::HighTom,
        DrumHit::Crash,
        DrumHit::Ride,
        DrumHit::China,
        DrumHit::RideBell,
        DrumHit::Tambourine,
        DrumHit::Splash,
        DrumHit::Cowbell,
    ];

    /// Name used in sample file names, e.g. `drums_open_hihat.wav`.
    pub fn name(self) -> &'static str {
        match self {
            DrumHit::Kick => "kick",
            DrumHit::Rimshot => "rimshot",
            DrumHit::Snare => "snare",
            DrumHit::Clap => "clap",
            DrumHit::FloorTom => "floor_tom",
            DrumHit::ClosedHihat => "closed_hihat",
            DrumHit::LowTom => "low_tom",
            DrumHit::PedalHihat => "pedal_hihat",
            DrumHit::MidTom => "mid_tom",
            DrumHit::OpenHihat => "open_hihat",
            DrumHit::HighTom => "high_tom",
            DrumHit::Crash => "crash",
            DrumHit::Ride => "ride",
            DrumHit::China => "china",
            DrumHit::RideBell => "ride_bell",
            DrumHit::Tambourine => "tambourine",
            DrumHit::Splash => "splash",
            DrumHit::Cowbell => "cowbell",
        }
    }

    pub fn pitch(self) -> Pitch {
        Pitch(match self {
            DrumHit::Kick => 36,
            DrumHit::Rimshot => 37,
            DrumHit::Snare => 38,
            DrumHit::Clap => 39,
            DrumHit::FloorTom => 41,
            DrumHit::ClosedHihat => 42,
            DrumHit::LowTom => 45,
            DrumHit::PedalHihat => 44,
            DrumHit::MidTom => 47,
            DrumHit::OpenHihat => 46,
            DrumHit::HighTom => 50,
            DrumHit::Crash => 49,
            DrumHit::Ride => 51,
            DrumHit::China => 52,
            DrumHit::RideBell => 53,
            DrumHit::Tambourine => 54,
            DrumHit::Splash => 55,
            DrumHit::Cowbell => 56,
        })
    }

    /// Hit whose name ends the file stem `stem`, case-insensitively.
    pub fn from_stem(stem: &str) -> Option<DrumHit> {
        let stem = stem.to_lowercase();
        DrumHit::ALL
            .into_iter()
            .filter(|hit| stem.ends_with(hit.name()))
            .max_by_key(|hit| hit.name().len())
    }
}

/// Identity of a sample without its waveform, used for compact storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleKey {
    pub instrument: String,
    pub style: String,
    pub pitch: Pitch,
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.instrument, self.style, self.pitch)
    }
}

/// A recorded note. Owned by the library and shared read-only by candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub key: SampleKey,
    pub waveform: Vec<f32>,
    pub sample_rate: u32,
}

pub type SampleRef = Arc<Sample>;

impl Sample {
    pub fn new(
        instrument: impl Into<String>,
        style: impl Into<String>,
        pitch: Pitch,
        waveform: Vec<f32>,
        sample_rate: u32,
    ) -> Self {
        Self {
            key: SampleKey {
                instrument: instrument.into(),
                style: style.into(),
                pitch,
            },
            waveform,
            sample_rate,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.key.instrument
    }

    pub fn style(&self) -> &str {
        &self.key.style
    }

    pub fn pitch(&self) -> Pitch {
        self.key.pitch
    }

    pub fn len(&self) -> usize {
        self.waveform.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waveform.is_empty()
    }
}
