use std::collections::BTreeMap;
use std::sync::Arc;

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analysis;
use crate::error::{Error, Result};
use crate::library::SampleLibrary;
use crate::sample::{SampleKey, SampleRef};
use crate::target::Onset;

/// How a candidate's samples are organised across onsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenotypeLayout {
    /// One mix compared against every onset.
    #[default]
    Flat,
    /// One mix per onset.
    PerOnset,
}

/// A sample in a mix together with its gain.
#[derive(Debug, Clone)]
pub struct Voice {
    pub sample: SampleRef,
    pub loudness: f32,
}

impl Voice {
    pub fn new(sample: SampleRef) -> Self {
        Self {
            sample,
            loudness: 1.0,
        }
    }
}

/// Ordered, never empty list of voices.
#[derive(Debug, Clone)]
pub struct SampleCollection {
    voices: Vec<Voice>,
}

impl SampleCollection {
    pub fn new(voices: Vec<Voice>) -> Result<Self> {
        if voices.is_empty() {
            return Err(Error::InvalidGenotype("sample collection is empty".into()));
        }
        Ok(Self { voices })
    }

    pub fn single(sample: SampleRef) -> Self {
        Self {
            voices: vec![Voice::new(sample)],
        }
    }

    /// Draw `size` samples uniformly from the library.
    pub fn random<R: Rng + ?Sized>(
        library: &SampleLibrary,
        size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let voices = (0..size.max(1))
            .map(|_| library.get_random_sample_uniform(rng).map(Voice::new))
            .collect::<Result<Vec<_>>>()?;
        Self::new(voices)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SampleKey> {
        self.voices.iter().map(|v| &v.sample.key)
    }

    pub fn push(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// Remove the voice at `index`. The last voice can never be removed.
    pub fn remove(&mut self, index: usize) -> Result<Voice> {
        if self.voices.len() <= 1 {
            return Err(Error::InvalidGenotype(
                "cannot remove the last sample of a collection".into(),
            ));
        }
        if index >= self.voices.len() {
            return Err(Error::InvalidParameter(format!(
                "voice index {index} out of range for {} voices",
                self.voices.len()
            )));
        }
        Ok(self.voices.remove(index))
    }

    /// Swap the sample at `index`, keeping its loudness.
    pub fn replace_sample(&mut self, index: usize, sample: SampleRef) -> Result<SampleRef> {
        let len = self.voices.len();
        let voice = self.voices.get_mut(index).ok_or_else(|| {
            Error::InvalidParameter(format!("voice index {index} out of range for {len} voices"))
        })?;
        Ok(std::mem::replace(&mut voice.sample, sample))
    }

    /// Mixdown of all voices, zero-padded to the longest sample.
    pub fn render(&self) -> Vec<f32> {
        let voices: Vec<(&[f32], f32)> = self
            .voices
            .iter()
            .map(|v| (v.sample.waveform.as_slice(), v.loudness))
            .collect();
        analysis::mix(&voices)
    }
}

/// Cache key for a rendered spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Flat,
    Onset(Onset),
}

#[derive(Debug, Clone)]
pub enum Genotype {
    Flat(SampleCollection),
    PerOnset(BTreeMap<Onset, SampleCollection>),
}

impl Genotype {
    pub fn layout(&self) -> GenotypeLayout {
        match self {
            Genotype::Flat(_) => GenotypeLayout::Flat,
            Genotype::PerOnset(_) => GenotypeLayout::PerOnset,
        }
    }

    /// The slot whose mix is compared against `onset`.
    pub fn slot_for(&self, onset: Onset) -> Slot {
        match self {
            Genotype::Flat(_) => Slot::Flat,
            Genotype::PerOnset(_) => Slot::Onset(onset),
        }
    }

    pub fn slots(&self) -> Vec<Slot> {
        match self {
            Genotype::Flat(_) => vec![Slot::Flat],
            Genotype::PerOnset(map) => map.keys().map(|&o| Slot::Onset(o)).collect(),
        }
    }

    pub fn collection(&self, slot: Slot) -> Option<&SampleCollection> {
        match (self, slot) {
            (Genotype::Flat(c), Slot::Flat) => Some(c),
            (Genotype::PerOnset(map), Slot::Onset(o)) => map.get(&o),
            _ => None,
        }
    }

    pub fn collection_mut(&mut self, slot: Slot) -> Option<&mut SampleCollection> {
        match (self, slot) {
            (Genotype::Flat(c), Slot::Flat) => Some(c),
            (Genotype::PerOnset(map), Slot::Onset(o)) => map.get_mut(&o),
            _ => None,
        }
    }

    pub fn collections(&self) -> Box<dyn Iterator<Item = (Slot, &SampleCollection)> + '_> {
        match self {
            Genotype::Flat(c) => Box::new(std::iter::once((Slot::Flat, c))),
            Genotype::PerOnset(map) => Box::new(map.iter().map(|(&o, c)| (Slot::Onset(o), c))),
        }
    }
}

/// Mean of the `ceil(n * phi)` smallest values, using partial selection.
pub fn phi_mean(values: &mut [f32], phi: f32) -> f32 {
    if values.is_empty() {
        return f32::INFINITY;
    }
    let n = values.len();
    // Tolerance keeps e.g. 20 * 0.05 from rounding up to 2.
    let k = ((n as f64 * phi as f64 - 1e-6).ceil() as usize).clamp(1, n);
    if k < n {
        values.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
    }
    values[..k].iter().sum::<f32>() / k as f32
}

/// One candidate mix with its cached fitness state.
///
/// Clones share samples but own their containers, so editing a clone never
/// touches the original.
#[derive(Debug, Clone)]
pub struct Individual {
    genotype: Genotype,
    phi: f32,
    fitness_per_onset: BTreeMap<Onset, f32>,
    fitness: f32,
    dirty: bool,
    spectra: Option<BTreeMap<Slot, Vec<f32>>>,
}

impl Individual {
    pub fn new(genotype: Genotype, phi: f32) -> Result<Self> {
        if !(phi > 0.0 && phi <= 1.0) {
            return Err(Error::InvalidParameter(format!("phi must be in (0, 1], got {phi}")));
        }
        if let Genotype::PerOnset(map) = &genotype {
            if map.is_empty() {
                return Err(Error::InvalidGenotype("genotype has no onsets".into()));
            }
        }
        Ok(Self {
            genotype,
            phi,
            fitness_per_onset: BTreeMap::new(),
            fitness: f32::INFINITY,
            dirty: true,
            spectra: None,
        })
    }

    /// Random candidate; collection sizes 1..=5 are drawn from `size_weights`.
    pub fn random<R: Rng + ?Sized>(
        library: &SampleLibrary,
        layout: GenotypeLayout,
        onsets: &[Onset],
        phi: f32,
        size_weights: &[f32],
        rng: &mut R,
    ) -> Result<Self> {
        let sizes = WeightedIndex::new(size_weights)
            .map_err(|e| Error::InvalidParameter(format!("initial size weights: {e}")))?;
        let genotype = match layout {
            GenotypeLayout::Flat => {
                Genotype::Flat(SampleCollection::random(library, sizes.sample(rng) + 1, rng)?)
            }
            GenotypeLayout::PerOnset => Genotype::PerOnset(
                onsets
                    .iter()
                    .map(|&onset| {
                        SampleCollection::random(library, sizes.sample(rng) + 1, rng)
                            .map(|c| (onset, c))
                    })
                    .collect::<Result<_>>()?,
            ),
        };
        Self::new(genotype, phi)
    }

    pub fn genotype(&self) -> &Genotype {
        &self.genotype
    }

    pub fn phi(&self) -> f32 {
        self.phi
    }

    /// Last aggregate fitness; `INFINITY` until first evaluated.
    pub fn fitness(&self) -> f32 {
        self.fitness
    }

    pub fn fitness_per_onset(&self) -> &BTreeMap<Onset, f32> {
        &self.fitness_per_onset
    }

    pub fn fitness_at(&self, onset: Onset) -> Option<f32> {
        self.fitness_per_onset.get(&onset).copied()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clean and scored at exactly `onsets`.
    pub fn is_scored_for(&self, onsets: &[Onset]) -> bool {
        !self.dirty
            && self.fitness_per_onset.len() == onsets.len()
            && onsets.iter().all(|o| self.fitness_per_onset.contains_key(o))
    }

    pub fn has_cached_spectra(&self) -> bool {
        self.spectra.is_some()
    }

    /// The single place where the genotype changes. Marks the candidate dirty
    /// and drops cached spectra once `f` returns.
    pub fn edit<T>(&mut self, f: impl FnOnce(&mut Genotype) -> T) -> T {
        let out = f(&mut self.genotype);
        self.mark_dirty();
        out
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.spectra = None;
    }

    /// Mixdown compared against `onset`.
    pub fn render(&self, onset: Onset) -> Result<Vec<f32>> {
        self.genotype
            .collection(self.genotype.slot_for(onset))
            .map(SampleCollection::render)
            .ok_or(Error::UnknownOnset(onset))
    }

    pub(crate) fn cached_spectrum(&self, slot: Slot) -> Option<&[f32]> {
        self.spectra.as_ref()?.get(&slot).map(Vec::as_slice)
    }

    pub(crate) fn cache_spectrum(&mut self, slot: Slot, spectrum: Vec<f32>) {
        self.spectra
            .get_or_insert_with(BTreeMap::new)
            .insert(slot, spectrum);
    }

    pub(crate) fn clear_onset_fitness(&mut self) {
        self.fitness_per_onset.clear();
    }

    pub(crate) fn set_onset_fitness(&mut self, onset: Onset, fitness: f32) {
        self.fitness_per_onset.insert(onset, fitness);
    }

    /// φ-aggregate over the per-onset fitness values.
    ///
    /// Only recomputed while dirty; afterwards the flag is cleared and the
    /// spectrum cache is released.
    pub fn aggregate_fitness(&mut self) -> f32 {
        if self.dirty {
            let mut values: Vec<f32> = self.fitness_per_onset.values().copied().collect();
            self.fitness = phi_mean(&mut values, self.phi);
            self.dirty = false;
            self.spectra = None;
        }
        self.fitness
    }

    /// Restore a fully evaluated state, as read back from a checkpoint.
    pub(crate) fn with_fitness(
        mut self,
        fitness: f32,
        fitness_per_onset: BTreeMap<Onset, f32>,
        dirty: bool,
    ) -> Self {
        self.fitness = fitness;
        self.fitness_per_onset = fitness_per_onset;
        self.dirty = dirty;
        self
    }
}

/// Shared handle used by populations and archives.
pub type IndividualRef = Arc<Individual>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Pitch, Sample};

    fn sample(pitch: u8, waveform: Vec<f32>) -> SampleRef {
        Arc::new(Sample::new("Test", "ord", Pitch(pitch), waveform, 8000))
    }

    #[test]
    fn empty_collection_is_rejected() {
        assert!(matches!(
            SampleCollection::new(vec![]),
            Err(Error::InvalidGenotype(_))
        ));
        let mut single = SampleCollection::single(sample(60, vec![1.0]));
        assert!(single.remove(0).is_err());
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn render_pads_and_applies_loudness() {
        let collection = SampleCollection::new(vec![
            Voice::new(sample(60, vec![1.0, 1.0])),
            Voice {
                sample: sample(64, vec![1.0, 1.0, 1.0]),
                loudness: 0.5,
            },
        ])
        .unwrap();
        assert_eq!(collection.render(), vec![1.5, 1.5, 0.5]);
    }

    #[test]
    fn clone_is_independent() {
        let original = Individual::new(
            Genotype::Flat(SampleCollection::single(sample(60, vec![1.0]))),
            1.0,
        )
        .unwrap();
        let mut copy = original.clone();
        copy.edit(|g| {
            if let Some(c) = g.collection_mut(Slot::Flat) {
                c.push(Voice::new(sample(62, vec![0.5])));
            }
        });
        assert_eq!(original.genotype().collection(Slot::Flat).unwrap().len(), 1);
        assert_eq!(copy.genotype().collection(Slot::Flat).unwrap().len(), 2);
        let a = &original.genotype().collection(Slot::Flat).unwrap().voices()[0].sample;
        let b = &copy.genotype().collection(Slot::Flat).unwrap().voices()[0].sample;
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn phi_mean_uses_best_fraction() {
        assert_eq!(phi_mean(&mut [5.0, 1.0, 3.0, 2.0], 0.5), 1.5);
        assert_eq!(phi_mean(&mut [5.0, 1.0, 3.0, 2.0], 1.0), 2.75);
        assert_eq!(phi_mean(&mut [5.0, 1.0, 3.0, 2.0], 0.01), 1.0);
        let mut twenty: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert_eq!(phi_mean(&mut twenty, 0.05), 0.0);
        assert_eq!(phi_mean(&mut [], 0.5), f32::INFINITY);
    }

    #[test]
    fn aggregate_clears_dirty_and_cache() {
        let mut ind = Individual::new(
            Genotype::Flat(SampleCollection::single(sample(60, vec![1.0]))),
            0.5,
        )
        .unwrap();
        assert_eq!(ind.fitness(), f32::INFINITY);
        ind.set_onset_fitness(0, 4.0);
        ind.set_onset_fitness(10, 2.0);
        ind.cache_spectrum(Slot::Flat, vec![1.0]);
        assert_eq!(ind.aggregate_fitness(), 2.0);
        assert!(!ind.is_dirty());
        assert!(!ind.has_cached_spectra());

        // Not dirty: stale per-onset values do not change the aggregate.
        ind.set_onset_fitness(10, 0.0);
        assert_eq!(ind.aggregate_fitness(), 2.0);

        assert!(ind.is_scored_for(&[0, 10]));
        assert!(!ind.is_scored_for(&[0]));
        assert!(!ind.is_scored_for(&[0, 10, 20]));
        ind.mark_dirty();
        assert!(!ind.is_scored_for(&[0, 10]));
    }

    #[test]
    fn invalid_phi_is_rejected() {
        let genotype = Genotype::Flat(SampleCollection::single(sample(60, vec![1.0])));
        assert!(Individual::new(genotype.clone(), 0.0).is_err());
        assert!(Individual::new(genotype, 1.5).is_err());
        assert!(Individual::new(Genotype::PerOnset(BTreeMap::new()), 1.0).is_err());
    }
}
