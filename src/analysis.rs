use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

use crate::config::SpectralConfig;
use crate::error::{Error, Result};

/// Bins are floored here so ratios between spectra stay finite.
pub const MAGNITUDE_FLOOR: f32 = 1e-10;

/// Periodic Hann window, as used for STFT analysis.
fn hanning_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 * (1.0 - ((2.0 * PI * n as f32) / size as f32).cos()))
        .collect()
}

/// Mix weighted audio slices by zero-padding every slice to the longest one and summing.
pub fn mix(voices: &[(&[f32], f32)]) -> Vec<f32> {
    let max_length = voices.iter().map(|(slice, _)| slice.len()).max().unwrap_or(0);

    let mut mixed = vec![0.0; max_length];
    for (slice, loudness) in voices {
        for (out, sample) in mixed.iter_mut().zip(slice.iter()) {
            *out += sample * loudness;
        }
    }
    mixed
}

/// Truncate `signal` to `len` samples, zero-padding when it is shorter.
pub fn fit_to_window(signal: &[f32], len: usize) -> Vec<f32> {
    let mut out = vec![0.0; len];
    let n = signal.len().min(len);
    out[..n].copy_from_slice(&signal[..n]);
    out
}

/// Symmetric Itakura-Saito style divergence between two time-averaged magnitude spectra.
///
/// Per bin this is `a/b - ln(a/b) + b/a - ln(b/a) - 2`, summed and divided by the
/// number of bins. It is zero iff both spectra are identical.
pub fn spectral_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "spectra must share a bin count");
    if a.is_empty() {
        return 0.0;
    }

    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&a, &b)| {
            let ratio = a as f64 / b as f64;
            let inverse = b as f64 / a as f64;
            (ratio - ratio.ln() + inverse - inverse.ln() - 2.0).max(0.0)
        })
        .sum();

    (sum / a.len() as f64) as f32
}

/// Short-time Fourier analysis with a reusable FFT plan and buffers.
///
/// Every spectrum is computed over a snippet fitted to exactly
/// `window_len` samples, so all spectra from one analyzer are comparable.
pub struct SpectralAnalyzer {
    config: SpectralConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    frame: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    transforms: usize,
}

impl SpectralAnalyzer {
    pub fn new(config: SpectralConfig) -> Result<Self> {
        config.validate()?;

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);
        let frame = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();

        Ok(Self {
            window: hanning_window(config.n_fft),
            config,
            fft,
            frame,
            spectrum,
            scratch,
            transforms: 0,
        })
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    pub fn n_bins(&self) -> usize {
        self.config.n_fft / 2 + 1
    }

    /// Number of spectra computed so far.
    pub fn transforms(&self) -> usize {
        self.transforms
    }

    /// Mean magnitude spectrum of `signal` over all STFT frames.
    ///
    /// The signal is fitted to `window_len` samples and centred with `n_fft / 2`
    /// zeros on both sides before framing.
    pub fn mean_magnitude(&mut self, signal: &[f32]) -> Result<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let half = n_fft / 2;

        let mut padded = vec![0.0; self.config.window_len + n_fft];
        let n = signal.len().min(self.config.window_len);
        padded[half..half + n].copy_from_slice(&signal[..n]);

        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let mut magnitudes = vec![0.0f32; self.n_bins()];

        for t in 0..n_frames {
            let start = t * hop;
            for ((dst, src), w) in self
                .frame
                .iter_mut()
                .zip(&padded[start..start + n_fft])
                .zip(&self.window)
            {
                *dst = src * w;
            }
            self.fft
                .process_with_scratch(&mut self.frame, &mut self.spectrum, &mut self.scratch)?;
            for (acc, c) in magnitudes.iter_mut().zip(&self.spectrum) {
                *acc += c.norm();
            }
        }

        let scale = 1.0 / n_frames as f32;
        for mag in &mut magnitudes {
            *mag = (*mag * scale).max(MAGNITUDE_FLOOR);
        }

        self.transforms += 1;
        Ok(magnitudes)
    }
}

impl SpectralConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_fft < 2 || self.n_fft % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "n_fft must be even and at least 2, got {}",
                self.n_fft
            )));
        }
        if self.hop_length == 0 {
            return Err(Error::InvalidParameter("hop_length must be positive".into()));
        }
        if self.window_len == 0 {
            return Err(Error::InvalidParameter("window_len must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SpectralConfig {
        SpectralConfig {
            sample_rate: 8000,
            n_fft: 256,
            hop_length: 64,
            window_len: 1024,
        }
    }

    fn sine(freq: f32, len: usize, sr: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn mix_pads_to_longest_and_weights() {
        let a = [1.0, 1.0, 1.0];
        let b = [2.0];
        let mixed = mix(&[(&a[..], 1.0), (&b[..], 0.5)]);
        assert_eq!(mixed, vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn fit_to_window_truncates_and_pads() {
        assert_eq!(fit_to_window(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(fit_to_window(&[1.0], 3), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn distance_is_zero_for_identical_spectra() {
        let mut analyzer = SpectralAnalyzer::new(small_config()).unwrap();
        let spectrum = analyzer.mean_magnitude(&sine(440.0, 1024, 8000.0)).unwrap();
        assert_eq!(spectral_distance(&spectrum, &spectrum), 0.0);
    }

    #[test]
    fn distance_is_symmetric_and_positive() {
        let mut analyzer = SpectralAnalyzer::new(small_config()).unwrap();
        let a = analyzer.mean_magnitude(&sine(440.0, 1024, 8000.0)).unwrap();
        let b = analyzer.mean_magnitude(&sine(660.0, 1024, 8000.0)).unwrap();
        let ab = spectral_distance(&a, &b);
        let ba = spectral_distance(&b, &a);
        assert!(ab > 0.0);
        assert!((ab - ba).abs() <= 1e-6 * ab.max(1.0));
    }

    #[test]
    fn silence_yields_finite_spectrum() {
        let mut analyzer = SpectralAnalyzer::new(small_config()).unwrap();
        let silent = analyzer.mean_magnitude(&[]).unwrap();
        assert_eq!(silent.len(), analyzer.n_bins());
        assert!(silent.iter().all(|&m| m == MAGNITUDE_FLOOR));
        let tone = analyzer.mean_magnitude(&sine(440.0, 1024, 8000.0)).unwrap();
        assert!(spectral_distance(&silent, &tone).is_finite());
        assert_eq!(analyzer.transforms(), 2);
    }

    #[test]
    fn peak_bin_follows_frequency() {
        let mut analyzer = SpectralAnalyzer::new(small_config()).unwrap();
        let spectrum = analyzer.mean_magnitude(&sine(1000.0, 1024, 8000.0)).unwrap();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        // 1000 Hz at 8 kHz with 256-point FFT lands on bin 32.
        assert_eq!(peak, 32);
    }

    #[test]
    fn rejects_odd_fft_size() {
        let config = SpectralConfig {
            n_fft: 255,
            ..small_config()
        };
        assert!(SpectralAnalyzer::new(config).is_err());
    }
}
