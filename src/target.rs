use std::collections::BTreeMap;
use std::path::Path;

use log::info;

use crate::analysis::SpectralAnalyzer;
use crate::audio;
use crate::config::SpectralConfig;
use crate::error::{Error, Result};

/// Sample offset into the target signal.
pub type Onset = usize;

/// Source of onset positions for a target signal.
pub trait OnsetDetector {
    fn detect(&self, signal: &[f32], sample_rate: u32) -> Vec<Onset>;
}

impl<F> OnsetDetector for F
where
    F: Fn(&[f32], u32) -> Vec<Onset>,
{
    fn detect(&self, signal: &[f32], sample_rate: u32) -> Vec<Onset> {
        self(signal, sample_rate)
    }
}

/// Treats the whole signal as one event starting at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeSignal;

impl OnsetDetector for WholeSignal {
    fn detect(&self, _signal: &[f32], _sample_rate: u32) -> Vec<Onset> {
        vec![0]
    }
}

/// Convert onset times in seconds to sample offsets.
pub fn onsets_from_seconds(seconds: &[f32], sample_rate: u32) -> Vec<Onset> {
    seconds
        .iter()
        .map(|&s| (s.max(0.0) * sample_rate as f32).round() as Onset)
        .collect()
}

/// A recording to approximate, with one precomputed spectrum per onset.
#[derive(Debug, Clone)]
pub struct Target {
    signal: Vec<f32>,
    onsets: Vec<Onset>,
    spectra: BTreeMap<Onset, Vec<f32>>,
    config: SpectralConfig,
}

impl Target {
    /// Build a target from a signal at `config.sample_rate` and its onsets.
    ///
    /// Onsets are sorted and deduplicated. The snippet for an onset ends at the
    /// analysis window, the next onset or the end of the signal, whichever comes first.
    pub fn new(signal: Vec<f32>, mut onsets: Vec<Onset>, config: SpectralConfig) -> Result<Self> {
        onsets.sort_unstable();
        onsets.dedup();
        if onsets.is_empty() {
            return Err(Error::InvalidParameter("target needs at least one onset".into()));
        }
        if let Some(&onset) = onsets.iter().find(|&&o| o >= signal.len()) {
            return Err(Error::OnsetOutOfRange {
                onset,
                len: signal.len(),
            });
        }

        let mut analyzer = SpectralAnalyzer::new(config.clone())?;
        let mut spectra = BTreeMap::new();
        for (i, &onset) in onsets.iter().enumerate() {
            let next = onsets.get(i + 1).copied().unwrap_or(signal.len());
            let end = (onset + config.window_len).min(next).min(signal.len());
            spectra.insert(onset, analyzer.mean_magnitude(&signal[onset..end])?);
        }

        Ok(Self {
            signal,
            onsets,
            spectra,
            config,
        })
    }

    pub fn with_detector(
        signal: Vec<f32>,
        detector: &impl OnsetDetector,
        config: SpectralConfig,
    ) -> Result<Self> {
        let onsets = detector.detect(&signal, config.sample_rate);
        Self::new(signal, onsets, config)
    }

    /// Load an audio file at the configured rate. Without onsets the whole file is one event.
    pub fn load(
        path: impl AsRef<Path>,
        onsets: Option<Vec<Onset>>,
        config: SpectralConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let signal = audio::load_mono(path, config.sample_rate)?;
        let target = match onsets {
            Some(onsets) => Self::new(signal, onsets, config)?,
            None => Self::with_detector(signal, &WholeSignal, config)?,
        };
        info!(
            "Target {}: {} samples, {} onsets",
            path.display(),
            target.signal.len(),
            target.onsets.len()
        );
        Ok(target)
    }

    pub fn signal(&self) -> &[f32] {
        &self.signal
    }

    pub fn onsets(&self) -> &[Onset] {
        &self.onsets
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    pub fn spectrum(&self, onset: Onset) -> Result<&[f32]> {
        self.spectra
            .get(&onset)
            .map(Vec::as_slice)
            .ok_or(Error::UnknownOnset(onset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpectralConfig {
        SpectralConfig {
            sample_rate: 8000,
            n_fft: 256,
            hop_length: 64,
            window_len: 512,
        }
    }

    fn noise(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i * 7919) % 113) as f32 / 113.0 - 0.5).collect()
    }

    #[test]
    fn onsets_are_sorted_and_deduplicated() {
        let target = Target::new(noise(2000), vec![900, 0, 900, 300], config()).unwrap();
        assert_eq!(target.onsets(), &[0, 300, 900]);
        for onset in target.onsets() {
            assert_eq!(target.spectrum(*onset).unwrap().len(), 129);
        }
        assert!(matches!(target.spectrum(5), Err(Error::UnknownOnset(5))));
    }

    #[test]
    fn onset_past_the_end_is_rejected() {
        let result = Target::new(noise(100), vec![0, 100], config());
        assert!(matches!(
            result,
            Err(Error::OnsetOutOfRange { onset: 100, len: 100 })
        ));
        assert!(Target::new(noise(100), vec![], config()).is_err());
    }

    #[test]
    fn snippet_stops_at_next_onset() {
        let signal = noise(2000);
        let target = Target::new(signal.clone(), vec![0, 100], config()).unwrap();
        let mut analyzer = SpectralAnalyzer::new(config()).unwrap();
        let expected = analyzer.mean_magnitude(&signal[..100]).unwrap();
        assert_eq!(target.spectrum(0).unwrap(), expected.as_slice());
    }

    #[test]
    fn detectors_supply_onsets() {
        let target = Target::with_detector(noise(1000), &WholeSignal, config()).unwrap();
        assert_eq!(target.onsets(), &[0]);
        let every_quarter =
            |signal: &[f32], _sr: u32| -> Vec<Onset> { (0..4).map(|i| i * signal.len() / 4).collect() };
        let target = Target::with_detector(noise(1000), &every_quarter, config()).unwrap();
        assert_eq!(target.onsets(), &[0, 250, 500, 750]);
    }

    #[test]
    fn seconds_convert_to_samples() {
        assert_eq!(onsets_from_seconds(&[0.0, 0.5, 1.25], 8000), vec![0, 4000, 10000]);
    }
}
