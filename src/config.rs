use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::individual::GenotypeLayout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralConfig {
    #[serde(default = "SpectralConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "SpectralConfig::default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "SpectralConfig::default_hop_length")]
    pub hop_length: usize,
    /// Length in samples of every analysed snippet.
    #[serde(default = "SpectralConfig::default_window_len")]
    pub window_len: usize,
}

impl SpectralConfig {
    fn default_sample_rate() -> u32 {
        22_050
    }
    fn default_n_fft() -> usize {
        2048
    }
    fn default_hop_length() -> usize {
        512
    }
    fn default_window_len() -> usize {
        22_050
    }
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            n_fft: Self::default_n_fft(),
            hop_length: Self::default_hop_length(),
            window_len: Self::default_window_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationConfig {
    #[serde(default = "MutationConfig::default_alpha")]
    pub alpha: f32,
    #[serde(default = "MutationConfig::default_beta")]
    pub beta: f32,
    #[serde(default = "MutationConfig::default_lower_bound")]
    pub lower_bound: usize,
    #[serde(default = "MutationConfig::default_upper_bound")]
    pub upper_bound: f32,
    /// Probability of adding a sample, indexed by current collection size 1..=5.
    #[serde(default = "MutationConfig::default_count_increase_p")]
    pub count_increase_p: Vec<f32>,
    /// Selection weights for count, instrument and pitch mutation.
    #[serde(default = "MutationConfig::default_operator_p")]
    pub operator_p: [f32; 3],
    #[serde(default = "MutationConfig::default_pitch_shift_std")]
    pub pitch_shift_std: f32,
}

impl MutationConfig {
    fn default_alpha() -> f32 {
        6.0
    }
    fn default_beta() -> f32 {
        3.0
    }
    fn default_lower_bound() -> usize {
        1
    }
    fn default_upper_bound() -> f32 {
        10.0
    }
    fn default_count_increase_p() -> Vec<f32> {
        vec![1.0, 0.8, 0.4, 0.1, 0.0]
    }
    fn default_operator_p() -> [f32; 3] {
        [0.2, 0.4, 0.4]
    }
    fn default_pitch_shift_std() -> f32 {
        15.0
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            alpha: Self::default_alpha(),
            beta: Self::default_beta(),
            lower_bound: Self::default_lower_bound(),
            upper_bound: Self::default_upper_bound(),
            count_increase_p: Self::default_count_increase_p(),
            operator_p: Self::default_operator_p(),
            pitch_shift_std: Self::default_pitch_shift_std(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// μ
    #[serde(default = "SearchConfig::default_population_size")]
    pub population_size: usize,
    /// λ
    #[serde(default = "SearchConfig::default_offspring")]
    pub offspring: usize,
    /// Fraction φ of per-onset fitness values that form the aggregate score.
    #[serde(default = "SearchConfig::default_phi")]
    pub phi: f32,
    #[serde(default = "SearchConfig::default_max_generations")]
    pub max_generations: usize,
    /// Step size control factor ζ, applied once per generation.
    #[serde(default)]
    pub zeta: Option<f32>,
    #[serde(default)]
    pub early_stop: Option<f32>,
    #[serde(default)]
    pub layout: GenotypeLayout,
    /// Weights for initial collection sizes 1..=5.
    #[serde(default = "SearchConfig::default_initial_count_p")]
    pub initial_count_p: Vec<f32>,
    #[serde(default = "SearchConfig::default_log_interval")]
    pub log_interval: usize,
    #[serde(default)]
    pub snapshot_generation: Option<usize>,
}

impl SearchConfig {
    fn default_population_size() -> usize {
        300
    }
    fn default_offspring() -> usize {
        1
    }
    fn default_phi() -> f32 {
        0.05
    }
    fn default_max_generations() -> usize {
        3000
    }
    fn default_initial_count_p() -> Vec<f32> {
        vec![0.1, 0.3, 0.3, 0.2, 0.1]
    }
    fn default_log_interval() -> usize {
        100
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            population_size: Self::default_population_size(),
            offspring: Self::default_offspring(),
            phi: Self::default_phi(),
            max_generations: Self::default_max_generations(),
            zeta: None,
            early_stop: None,
            layout: GenotypeLayout::default(),
            initial_count_p: Self::default_initial_count_p(),
            log_interval: Self::default_log_interval(),
            snapshot_generation: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub spectral: SpectralConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl AppConfig {
    /// Read `path`, or write the defaults there if it does not exist yet.
    ///
    /// An unreadable or malformed file falls back to defaults with a warning.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            return match Self::load(path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to load config {}: {err}. Using defaults.", path.display());
                    Self::default()
                }
            };
        }

        let defaults = Self::default();
        if let Err(err) = defaults.save(path) {
            warn!("Failed to write default config to {}: {err}", path.display());
        }
        defaults
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}
