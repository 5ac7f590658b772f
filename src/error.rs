use thiserror::Error;

use crate::sample::Pitch;
use crate::target::Onset;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested instrument/style/pitch combination is not in the library.
    #[error("no sample for instrument `{instrument}`, style `{style}`, pitch {pitch}")]
    SampleNotFound {
        instrument: String,
        style: String,
        pitch: Pitch,
    },

    #[error("instrument `{0}` not found in sample library")]
    UnknownInstrument(String),

    #[error("style `{style}` not valid for instrument `{instrument}`")]
    UnknownStyle { instrument: String, style: String },

    #[error("no samples available for pitch {0}")]
    NoInstrumentForPitch(Pitch),

    #[error("sample library is empty")]
    EmptyLibrary,

    /// A genotype would contain an empty sample collection.
    #[error("invalid genotype: {0}")]
    InvalidGenotype(String),

    #[error("archive onsets differ between merged populations: {onsets:?}")]
    OnsetMismatch { onsets: Vec<Onset> },

    #[error("onset {onset} lies outside the signal (length {len})")]
    OnsetOutOfRange { onset: Onset, len: usize },

    #[error("onset {0} is not part of the target")]
    UnknownOnset(Onset),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("engine is {found}, expected {expected}")]
    EngineState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("could not parse {what} from `{input}`")]
    Parse { what: &'static str, input: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fft(#[from] realfft::FftError),

    #[error(transparent)]
    Decode(#[from] symphonia::core::errors::Error),

    #[error(transparent)]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    #[error(transparent)]
    Resample(#[from] rubato::ResampleError),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Checkpoint(#[from] bincode::Error),

    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    ConfigWrite(#[from] toml::ser::Error),
}
