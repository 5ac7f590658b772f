use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use rand_distr::{Normal, StandardNormal};

use crate::config::MutationConfig;
use crate::error::{Error, Result};
use crate::individual::{Individual, SampleCollection, Voice};
use crate::library::SampleLibrary;

/// The variation operators a mutation step can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Add or remove one sample.
    Count,
    /// Swap one sample for another instrument at the same pitch.
    Instrument,
    /// Move one sample by a random number of semitones.
    Pitch,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [
        MutationKind::Count,
        MutationKind::Instrument,
        MutationKind::Pitch,
    ];
}

/// Applies random variation to candidates, with an annealable mutation count.
#[derive(Debug, Clone)]
pub struct Mutator<'lib> {
    library: &'lib SampleLibrary,
    alpha: f32,
    beta: f32,
    lower_bound: usize,
    upper_bound: f32,
    count_increase_p: Vec<f32>,
    operators: WeightedIndex<f32>,
    pitch_shift: Normal<f32>,
}

impl<'lib> Mutator<'lib> {
    pub fn new(library: &'lib SampleLibrary, config: &MutationConfig) -> Result<Self> {
        let operators = WeightedIndex::new(config.operator_p)
            .map_err(|e| Error::InvalidParameter(format!("operator probabilities: {e}")))?;
        let pitch_shift = Normal::new(0.0, config.pitch_shift_std)
            .map_err(|e| Error::InvalidParameter(format!("pitch shift deviation: {e}")))?;
        if config.lower_bound == 0 || !(config.upper_bound >= config.lower_bound as f32) {
            return Err(Error::InvalidParameter(format!(
                "mutation bounds must satisfy 1 <= lower <= upper, got {}..{}",
                config.lower_bound, config.upper_bound
            )));
        }

        Ok(Self {
            library,
            alpha: config.alpha,
            beta: config.beta,
            lower_bound: config.lower_bound,
            upper_bound: config.upper_bound,
            count_increase_p: config.count_increase_p.clone(),
            operators,
            pitch_shift,
        })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn lower_bound(&self) -> usize {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f32 {
        self.upper_bound
    }

    /// `clip(round(N(0,1) * alpha + beta), lower_bound, upper_bound)`
    pub fn n_mutations<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let z: f32 = rng.sample(StandardNormal);
        let n = (z * self.alpha + self.beta).round();
        n.clamp(self.lower_bound as f32, self.upper_bound.floor()) as usize
    }

    /// Apply a random number of operators, each to a uniformly chosen slot.
    pub fn mutate<R: Rng + ?Sized>(&self, individual: &mut Individual, rng: &mut R) -> Result<()> {
        let n = self.n_mutations(rng);
        for _ in 0..n {
            let slots = individual.genotype().slots();
            let slot = slots[rng.random_range(0..slots.len())];
            let kind = MutationKind::ALL[self.operators.sample(rng)];
            individual.edit(|genotype| match genotype.collection_mut(slot) {
                Some(collection) => self.apply(kind, collection, rng),
                None => Err(Error::InvalidGenotype(format!("missing slot {slot:?}"))),
            })?;
        }
        Ok(())
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        kind: MutationKind,
        collection: &mut SampleCollection,
        rng: &mut R,
    ) -> Result<()> {
        match kind {
            MutationKind::Count => self.count_mutation(collection, rng),
            MutationKind::Instrument => self.instrument_mutation(collection, rng),
            MutationKind::Pitch => self.pitch_mutation(collection, rng),
        }
    }

    /// Probability of growing a collection of `size` samples.
    fn increase_probability(&self, size: usize) -> f32 {
        if size <= 1 {
            return 1.0;
        }
        self.count_increase_p
            .get(size - 1)
            .or(self.count_increase_p.last())
            .copied()
            .unwrap_or(0.0)
    }

    fn count_mutation<R: Rng + ?Sized>(
        &self,
        collection: &mut SampleCollection,
        rng: &mut R,
    ) -> Result<()> {
        let p = self.increase_probability(collection.len());
        if collection.len() <= 1 || rng.random::<f32>() < p {
            let sample = self.library.get_random_sample_uniform(rng)?;
            collection.push(Voice::new(sample));
        } else {
            let index = rng.random_range(0..collection.len());
            collection.remove(index)?;
        }
        Ok(())
    }

    fn instrument_mutation<R: Rng + ?Sized>(
        &self,
        collection: &mut SampleCollection,
        rng: &mut R,
    ) -> Result<()> {
        let index = rng.random_range(0..collection.len());
        let current = &collection.voices()[index].sample.key;
        let pitch = current.pitch;
        let (instrument, style) = self
            .library
            .get_random_instrument_for_pitch(pitch, rng)
            .map_err(|e| match e {
                Error::NoInstrumentForPitch(_) => Error::SampleNotFound {
                    instrument: current.instrument.clone(),
                    style: current.style.clone(),
                    pitch,
                },
                other => other,
            })?;
        let sample = self.library.get_sample(instrument, Some(style), pitch, rng)?;
        collection.replace_sample(index, sample)?;
        Ok(())
    }

    fn pitch_mutation<R: Rng + ?Sized>(
        &self,
        collection: &mut SampleCollection,
        rng: &mut R,
    ) -> Result<()> {
        let index = rng.random_range(0..collection.len());
        let mut key = collection.voices()[index].sample.key.clone();
        let shift = self.pitch_shift.sample(rng).round() as i32;
        key.pitch = self
            .library
            .get_shifted_pitch(&key.instrument, &key.style, key.pitch, shift)?;
        let sample = self.library.sample(&key)?;
        collection.replace_sample(index, sample)?;
        Ok(())
    }

    /// Anneal the mutation count: scale `alpha` and `beta` by `zeta` and shrink
    /// `upper_bound`, never below `lower_bound`.
    pub fn step_size_control(&mut self, zeta: f32) {
        self.alpha *= zeta;
        self.beta *= zeta;
        self.upper_bound = (self.upper_bound * zeta).max(self.lower_bound as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::{Genotype, Slot};
    use crate::sample::{Pitch, Sample};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn library() -> SampleLibrary {
        let mut samples = Vec::new();
        for midi in 55..=70 {
            samples.push(Sample::new("Violin", "arco", Pitch(midi), vec![midi as f32; 8], 8000));
            if midi % 2 == 0 {
                samples.push(Sample::new("Cello", "pizz", Pitch(midi), vec![-(midi as f32); 8], 8000));
            }
        }
        SampleLibrary::from_samples(samples)
    }

    fn single(library: &SampleLibrary) -> SampleCollection {
        let key = crate::sample::SampleKey {
            instrument: "Violin".into(),
            style: "arco".into(),
            pitch: Pitch(60),
        };
        SampleCollection::single(library.sample(&key).unwrap())
    }

    #[test]
    fn count_mutation_never_empties_a_collection() {
        let lib = library();
        let config = MutationConfig {
            count_increase_p: vec![0.0; 5],
            ..MutationConfig::default()
        };
        let mutator = Mutator::new(&lib, &config).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let mut collection = single(&lib);
            mutator.apply(MutationKind::Count, &mut collection, &mut rng).unwrap();
            assert_eq!(collection.len(), 2);
        }

        // A removal-only table shrinks larger collections back to one, never below.
        let mut collection = single(&lib);
        for _ in 0..1000 {
            mutator.apply(MutationKind::Count, &mut collection, &mut rng).unwrap();
            assert!(collection.len() >= 1);
            assert!(collection.len() <= 2);
        }
    }

    #[test]
    fn instrument_mutation_keeps_pitch() {
        let lib = library();
        let mutator = Mutator::new(&lib, &MutationConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut collection = single(&lib);
        let mut seen_cello = false;
        for _ in 0..100 {
            mutator
                .apply(MutationKind::Instrument, &mut collection, &mut rng)
                .unwrap();
            let sample = &collection.voices()[0].sample;
            assert_eq!(sample.pitch(), Pitch(60));
            seen_cello |= sample.instrument() == "Cello";
        }
        assert!(seen_cello);
    }

    #[test]
    fn instrument_mutation_reports_unknown_pitch_as_missing_sample() {
        let lib = library();
        let mutator = Mutator::new(&lib, &MutationConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        let foreign = Arc::new(Sample::new("Harp", "ord", Pitch(90), vec![0.5; 8], 8000));
        let mut collection = SampleCollection::single(foreign);
        let result = mutator.apply(MutationKind::Instrument, &mut collection, &mut rng);
        match result {
            Err(Error::SampleNotFound { instrument, pitch, .. }) => {
                assert_eq!(instrument, "Harp");
                assert_eq!(pitch, Pitch(90));
            }
            other => panic!("expected SampleNotFound, got {other:?}"),
        }
        assert_eq!(collection.voices()[0].sample.instrument(), "Harp");
    }

    #[test]
    fn pitch_mutation_stays_in_range() {
        let lib = library();
        let mutator = Mutator::new(&lib, &MutationConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let mut collection = single(&lib);
        for _ in 0..200 {
            mutator.apply(MutationKind::Pitch, &mut collection, &mut rng).unwrap();
            let sample = &collection.voices()[0].sample;
            assert_eq!(sample.instrument(), "Violin");
            assert!((55..=70).contains(&sample.pitch().midi()));
        }
    }

    #[test]
    fn mutate_marks_dirty_and_respects_bounds() {
        let lib = library();
        let mutator = Mutator::new(&lib, &MutationConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..200 {
            let n = mutator.n_mutations(&mut rng);
            assert!((1..=10).contains(&n));
        }

        let mut ind = Individual::new(Genotype::Flat(single(&lib)), 1.0).unwrap();
        ind.aggregate_fitness();
        assert!(!ind.is_dirty());
        mutator.mutate(&mut ind, &mut rng).unwrap();
        assert!(ind.is_dirty());
        assert!(ind.genotype().collection(Slot::Flat).unwrap().len() >= 1);
    }

    #[test]
    fn step_size_control_halves_twice() {
        let lib = library();
        let mut mutator = Mutator::new(&lib, &MutationConfig::default()).unwrap();
        mutator.step_size_control(0.5);
        mutator.step_size_control(0.5);
        assert_eq!(mutator.alpha(), 1.5);
        assert_eq!(mutator.beta(), 0.75);
        assert_eq!(mutator.upper_bound(), 2.5);
        for _ in 0..10 {
            mutator.step_size_control(0.5);
            assert!(mutator.upper_bound() >= mutator.lower_bound() as f32);
        }
        assert_eq!(mutator.upper_bound(), 1.0);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let lib = library();
        let bad_bounds = MutationConfig {
            lower_bound: 4,
            upper_bound: 2.0,
            ..MutationConfig::default()
        };
        assert!(Mutator::new(&lib, &bad_bounds).is_err());
        let nan_bound = MutationConfig {
            upper_bound: f32::NAN,
            ..MutationConfig::default()
        };
        assert!(Mutator::new(&lib, &nan_bound).is_err());
        let bad_weights = MutationConfig {
            operator_p: [0.0; 3],
            ..MutationConfig::default()
        };
        assert!(Mutator::new(&lib, &bad_weights).is_err());
    }
}
