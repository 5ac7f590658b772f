#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::PathBuf;

use evomix::config::SpectralConfig;
use evomix::library::SampleLibrary;
use evomix::sample::{Pitch, Sample};

pub const SAMPLE_RATE: u32 = 8000;

pub fn spectral() -> SpectralConfig {
    SpectralConfig {
        sample_rate: SAMPLE_RATE,
        n_fft: 256,
        hop_length: 128,
        window_len: 1024,
    }
}

pub fn frequency(midi: u8) -> f32 {
    440.0 * 2f32.powf((midi as f32 - 69.0) / 12.0)
}

/// Decaying tone with `harmonics` partials.
pub fn tone(midi: u8, harmonics: usize, len: usize) -> Vec<f32> {
    let f0 = frequency(midi);
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let env = (-3.0 * t).exp();
            (1..=harmonics)
                .map(|h| (2.0 * PI * f0 * h as f32 * t).sin() / h as f32)
                .sum::<f32>()
                * env
                * 0.2
        })
        .collect()
}

/// Two synthetic instruments over one octave and a fifth.
pub fn library() -> SampleLibrary {
    let mut samples = Vec::new();
    for midi in 55..=79 {
        samples.push(Sample::new("Flute", "ord", Pitch(midi), tone(midi, 1, 1200), SAMPLE_RATE));
        samples.push(Sample::new("Reed", "ord", Pitch(midi), tone(midi, 5, 1200), SAMPLE_RATE));
    }
    SampleLibrary::from_samples(samples)
}

pub fn unique_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "evomix_it_{}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos(),
        name
    ));
    path
}
