use crate::analysis::{spectral_distance, SpectralAnalyzer};
use crate::config::SpectralConfig;
use crate::error::{Error, Result};
use crate::individual::Individual;
use crate::target::{Onset, Target};

/// Scores candidates against a target, reusing cached candidate spectra.
pub struct FitnessEvaluator {
    analyzer: SpectralAnalyzer,
}

impl FitnessEvaluator {
    pub fn new(config: SpectralConfig) -> Result<Self> {
        Ok(Self {
            analyzer: SpectralAnalyzer::new(config)?,
        })
    }

    /// Evaluator with the same analysis settings as `target`.
    pub fn for_target(target: &Target) -> Result<Self> {
        Self::new(target.config().clone())
    }

    /// Number of spectral transforms performed so far.
    pub fn transforms(&self) -> usize {
        self.analyzer.transforms()
    }

    /// Distance between the candidate's mix for `onset` and the target spectrum there.
    ///
    /// The candidate spectrum is computed on a cache miss and kept until the next edit.
    pub fn fitness_at_onset(
        &mut self,
        individual: &mut Individual,
        onset: Onset,
        target: &Target,
    ) -> Result<f32> {
        let target_spectrum = target.spectrum(onset)?;
        let slot = individual.genotype().slot_for(onset);

        if individual.cached_spectrum(slot).is_none() {
            let collection = individual
                .genotype()
                .collection(slot)
                .ok_or(Error::UnknownOnset(onset))?;
            let spectrum = self.analyzer.mean_magnitude(&collection.render())?;
            individual.cache_spectrum(slot, spectrum);
        }

        let spectrum = individual
            .cached_spectrum(slot)
            .ok_or(Error::UnknownOnset(onset))?;
        Ok(spectral_distance(spectrum, target_spectrum))
    }

    /// Fill the per-onset fitness for every target onset. Skipped for clean candidates.
    pub fn multi_onset_fitness(&mut self, individual: &mut Individual, target: &Target) -> Result<()> {
        if !individual.is_dirty() {
            return Ok(());
        }
        individual.clear_onset_fitness();
        for &onset in target.onsets() {
            let fitness = self.fitness_at_onset(individual, onset, target)?;
            individual.set_onset_fitness(onset, fitness);
        }
        Ok(())
    }

    /// Full evaluation: per-onset values, then the φ-aggregate.
    pub fn evaluate(&mut self, individual: &mut Individual, target: &Target) -> Result<f32> {
        self.multi_onset_fitness(individual, target)?;
        Ok(individual.aggregate_fitness())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::{Genotype, SampleCollection, Slot};
    use crate::sample::{Pitch, Sample};
    use std::collections::BTreeMap;
    use std::f32::consts::PI;
    use std::sync::Arc;

    fn config() -> SpectralConfig {
        SpectralConfig {
            sample_rate: 8000,
            n_fft: 256,
            hop_length: 64,
            window_len: 1024,
        }
    }

    fn tone(freq: f32, len: usize) -> Arc<Sample> {
        let waveform = (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 8000.0).sin() * 0.5)
            .collect();
        Arc::new(Sample::new("Sine", "ord", Pitch(69), waveform, 8000))
    }

    #[test]
    fn exact_match_has_zero_distance() {
        let sample = tone(440.0, 1500);
        let target = Target::new(sample.waveform.clone(), vec![0], config()).unwrap();
        let mut evaluator = FitnessEvaluator::for_target(&target).unwrap();
        let mut ind =
            Individual::new(Genotype::Flat(SampleCollection::single(sample)), 1.0).unwrap();
        assert_eq!(evaluator.evaluate(&mut ind, &target).unwrap(), 0.0);
    }

    #[test]
    fn second_evaluation_hits_the_cache() {
        let target = Target::new(tone(440.0, 3000).waveform.clone(), vec![0, 1500], config()).unwrap();
        let mut evaluator = FitnessEvaluator::for_target(&target).unwrap();
        let mut ind = Individual::new(
            Genotype::Flat(SampleCollection::single(tone(660.0, 1000))),
            0.5,
        )
        .unwrap();

        let first = evaluator.evaluate(&mut ind, &target).unwrap();
        // Flat genotype: one render serves both onsets.
        assert_eq!(evaluator.transforms(), 1);
        let second = evaluator.evaluate(&mut ind, &target).unwrap();
        assert_eq!(first, second);
        assert_eq!(evaluator.transforms(), 1);
        assert!(first > 0.0);

        ind.edit(|_| ());
        evaluator.evaluate(&mut ind, &target).unwrap();
        assert_eq!(evaluator.transforms(), 2);
    }

    #[test]
    fn per_onset_genotype_scores_each_onset() {
        let low = tone(440.0, 1500);
        let high = tone(880.0, 1500);
        let mut signal = low.waveform.clone();
        signal.extend_from_slice(&high.waveform);
        let target = Target::new(signal, vec![0, 1500], config()).unwrap();
        let mut evaluator = FitnessEvaluator::for_target(&target).unwrap();

        let mut map = BTreeMap::new();
        map.insert(0, SampleCollection::single(low));
        map.insert(1500, SampleCollection::single(high));
        let mut ind = Individual::new(Genotype::PerOnset(map), 1.0).unwrap();
        evaluator.multi_onset_fitness(&mut ind, &target).unwrap();
        assert_eq!(ind.fitness_at(0), Some(0.0));
        assert_eq!(ind.fitness_at(1500), Some(0.0));
        assert!(ind.has_cached_spectra());
        assert!(ind.cached_spectrum(Slot::Onset(1500)).is_some());
        assert_eq!(ind.aggregate_fitness(), 0.0);
    }
}
