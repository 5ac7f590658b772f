use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use rand::Rng;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::audio;
use crate::error::{Error, Result};
use crate::sample::{DrumHit, Pitch, Sample, SampleKey, SampleRef};

const AUDIO_EXTENSIONS: [&str; 5] = ["wav", "mp3", "flac", "aiff", "ogg"];

/// Style used for samples that sit directly inside their instrument directory.
pub const DEFAULT_STYLE: &str = "default";

/// Instrument directory whose files are named by [`DrumHit`] instead of pitch.
pub const DRUMS: &str = "Drums";

type StyleMap = BTreeMap<String, BTreeMap<Pitch, SampleRef>>;

/// Catalog of recorded notes indexed by instrument, style and pitch.
///
/// Read-only once built, so a single instance can be shared by concurrent runs.
#[derive(Debug, Default, Clone)]
pub struct SampleLibrary {
    samples: BTreeMap<String, StyleMap>,
    by_pitch: BTreeMap<Pitch, BTreeSet<(String, String)>>,
    len: usize,
}

fn pick<'a, K, V, R: Rng + ?Sized>(map: &'a BTreeMap<K, V>, rng: &mut R) -> Option<(&'a K, &'a V)> {
    if map.is_empty() {
        return None;
    }
    map.iter().nth(rng.random_range(0..map.len()))
}

impl SampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut library = Self::new();
        for sample in samples {
            library.insert(sample);
        }
        library
    }

    /// Add a sample, replacing any existing sample with the same key.
    pub fn insert(&mut self, sample: Sample) -> SampleRef {
        let key = sample.key.clone();
        let sample = Arc::new(sample);
        let previous = self
            .samples
            .entry(key.instrument.clone())
            .or_default()
            .entry(key.style.clone())
            .or_default()
            .insert(key.pitch, Arc::clone(&sample));
        if previous.is_none() {
            self.len += 1;
        }
        self.by_pitch
            .entry(key.pitch)
            .or_default()
            .insert((key.instrument, key.style));
        sample
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    fn styles(&self, instrument: &str) -> Result<&StyleMap> {
        self.samples
            .get(instrument)
            .ok_or_else(|| Error::UnknownInstrument(instrument.to_string()))
    }

    fn pitches(&self, instrument: &str, style: &str) -> Result<&BTreeMap<Pitch, SampleRef>> {
        self.styles(instrument)?
            .get(style)
            .ok_or_else(|| Error::UnknownStyle {
                instrument: instrument.to_string(),
                style: style.to_string(),
            })
    }

    /// Exact lookup by flattened identity.
    pub fn sample(&self, key: &SampleKey) -> Result<SampleRef> {
        self.samples
            .get(&key.instrument)
            .and_then(|styles| styles.get(&key.style))
            .and_then(|pitches| pitches.get(&key.pitch))
            .cloned()
            .ok_or_else(|| Error::SampleNotFound {
                instrument: key.instrument.clone(),
                style: key.style.clone(),
                pitch: key.pitch,
            })
    }

    /// Look up a sample; a missing style is drawn uniformly for the instrument first.
    pub fn get_sample<R: Rng + ?Sized>(
        &self,
        instrument: &str,
        style: Option<&str>,
        pitch: Pitch,
        rng: &mut R,
    ) -> Result<SampleRef> {
        let style = match style {
            Some(style) => style,
            None => self.get_random_style_for_instrument(instrument, rng)?,
        };
        self.sample(&SampleKey {
            instrument: instrument.to_string(),
            style: style.to_string(),
            pitch,
        })
    }

    /// Draw instrument, then style, then pitch, each uniformly at its own level.
    ///
    /// Instruments or styles with many samples are not favoured over sparse ones.
    pub fn get_random_sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SampleRef> {
        let (_, styles) = pick(&self.samples, rng).ok_or(Error::EmptyLibrary)?;
        let (_, pitches) = pick(styles, rng).ok_or(Error::EmptyLibrary)?;
        let (_, sample) = pick(pitches, rng).ok_or(Error::EmptyLibrary)?;
        Ok(Arc::clone(sample))
    }

    /// Draw an (instrument, style) pair that has a sample at `pitch`.
    pub fn get_random_instrument_for_pitch<R: Rng + ?Sized>(
        &self,
        pitch: Pitch,
        rng: &mut R,
    ) -> Result<(&str, &str)> {
        let candidates = self
            .by_pitch
            .get(&pitch)
            .filter(|set| !set.is_empty())
            .ok_or(Error::NoInstrumentForPitch(pitch))?;
        let idx = rng.random_range(0..candidates.len());
        candidates
            .iter()
            .nth(idx)
            .map(|(instrument, style)| (instrument.as_str(), style.as_str()))
            .ok_or(Error::NoInstrumentForPitch(pitch))
    }

    pub fn get_random_style_for_instrument<R: Rng + ?Sized>(
        &self,
        instrument: &str,
        rng: &mut R,
    ) -> Result<&str> {
        pick(self.styles(instrument)?, rng)
            .map(|(style, _)| style.as_str())
            .ok_or_else(|| Error::UnknownInstrument(instrument.to_string()))
    }

    pub fn get_random_pitch_for_instrument<R: Rng + ?Sized>(
        &self,
        instrument: &str,
        style: Option<&str>,
        rng: &mut R,
    ) -> Result<Pitch> {
        let style = match style {
            Some(style) => style,
            None => self.get_random_style_for_instrument(instrument, rng)?,
        };
        let pitches = self.pitches(instrument, style)?;
        pick(pitches, rng)
            .map(|(pitch, _)| *pitch)
            .ok_or_else(|| Error::UnknownStyle {
                instrument: instrument.to_string(),
                style: style.to_string(),
            })
    }

    /// Lowest and highest pitch recorded for an instrument/style.
    pub fn pitch_range(&self, instrument: &str, style: &str) -> Result<(Pitch, Pitch)> {
        let pitches = self.pitches(instrument, style)?;
        match (pitches.keys().next(), pitches.keys().next_back()) {
            (Some(min), Some(max)) => Ok((*min, *max)),
            _ => Err(Error::UnknownStyle {
                instrument: instrument.to_string(),
                style: style.to_string(),
            }),
        }
    }

    /// Shift `old_pitch` by `semitones`, clipped to the instrument/style range.
    ///
    /// When the clipped pitch falls into a gap of the recorded pitches, the nearest
    /// recorded pitch is returned (the lower one on ties), so the result always resolves.
    pub fn get_shifted_pitch(
        &self,
        instrument: &str,
        style: &str,
        old_pitch: Pitch,
        semitones: i32,
    ) -> Result<Pitch> {
        let pitches = self.pitches(instrument, style)?;
        let (min, max) = self.pitch_range(instrument, style)?;
        let wanted = old_pitch.shifted(semitones).clamp(min, max);
        if pitches.contains_key(&wanted) {
            return Ok(wanted);
        }

        let below = pitches.range(..wanted).next_back().map(|(p, _)| *p);
        let above = pitches.range(wanted..).next().map(|(p, _)| *p);
        match (below, above) {
            (Some(b), Some(a)) if wanted.0 - b.0 <= a.0 - wanted.0 => Ok(b),
            (_, Some(a)) => Ok(a),
            (Some(b), None) => Ok(b),
            (None, None) => Err(Error::UnknownStyle {
                instrument: instrument.to_string(),
                style: style.to_string(),
            }),
        }
    }

    /// Load every audio file below `root` and resample it to `sample_rate`.
    ///
    /// Layout: `<root>/<instrument>/.../<style>/<name>_<pitch>.<ext>`.
    pub fn load_dir(root: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let root = root.as_ref();
        let files: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_audio_file(path))
            .collect();

        info!("Loading {} sample files from {}", files.len(), root.display());

        let samples: Vec<Sample> = files
            .par_iter()
            .filter_map(|path| match load_sample(root, path, sample_rate) {
                Ok(sample) => Some(sample),
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    None
                }
            })
            .collect();

        let library = Self::from_samples(samples);
        if library.is_empty() {
            return Err(Error::EmptyLibrary);
        }
        info!(
            "Loaded {} samples for {} instruments",
            library.len(),
            library.samples.len()
        );
        Ok(library)
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Derive the sample identity from its location below the library root.
pub fn parse_sample_path(root: &Path, path: &Path) -> Result<SampleKey> {
    let err = || Error::Parse {
        what: "sample path",
        input: path.display().to_string(),
    };
    let relative = path.strip_prefix(root).map_err(|_| err())?;
    let parts: Vec<&str> = relative
        .iter()
        .map(|part| part.to_str().ok_or_else(err))
        .collect::<Result<_>>()?;
    if parts.len() < 2 {
        return Err(err());
    }

    let instrument = parts[0].to_string();
    let style = if parts.len() >= 3 {
        parts[parts.len() - 2].to_string()
    } else {
        DEFAULT_STYLE.to_string()
    };
    let stem = relative
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(err)?;
    let pitch = if instrument == DRUMS {
        DrumHit::from_stem(stem).map(DrumHit::pitch).ok_or_else(err)?
    } else {
        stem.rsplit('_').next().ok_or_else(err)?.parse()?
    };

    Ok(SampleKey {
        instrument,
        style,
        pitch,
    })
}

fn load_sample(root: &Path, path: &Path, sample_rate: u32) -> Result<Sample> {
    let key = parse_sample_path(root, path)?;
    let (waveform, source_rate) = audio::decode_mono(path)?;
    let waveform = audio::resample(waveform, source_rate, sample_rate)?;
    Ok(Sample {
        key,
        waveform,
        sample_rate,
    })
}
