//! Approximate recordings with combinations of instrument samples using a
//! (μ+λ) evolutionary search scored by spectral distance.

pub mod analysis;
pub mod annotation;
pub mod audio;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fitness;
pub mod individual;
pub mod jaccard;
pub mod library;
pub mod mutation;
pub mod population;
pub mod sample;
pub mod search;
pub mod target;

pub use error::{Error, Result};
