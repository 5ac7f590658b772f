use std::path::PathBuf;

use log::{debug, info};
use rand::Rng;

use crate::config::{AppConfig, MutationConfig};
use crate::error::{Error, Result};
use crate::fitness::FitnessEvaluator;
use crate::individual::{GenotypeLayout, Individual};
use crate::library::SampleLibrary;
use crate::mutation::Mutator;
use crate::population::Population;
use crate::target::Target;

/// Redraws allowed for one random individual whose samples cannot be resolved.
const MAX_INIT_ATTEMPTS: usize = 100;

/// Parameters of one (μ+λ) run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub population_size: usize,
    pub offspring: usize,
    pub phi: f32,
    pub max_generations: usize,
    pub zeta: Option<f32>,
    pub early_stop: Option<f32>,
    pub layout: GenotypeLayout,
    pub initial_count_p: Vec<f32>,
    pub log_interval: usize,
    pub snapshot_generation: Option<usize>,
    pub snapshot_path: Option<PathBuf>,
    pub mutation: MutationConfig,
}

impl SearchParams {
    pub fn from_config(config: &AppConfig) -> Self {
        let search = &config.search;
        Self {
            population_size: search.population_size,
            offspring: search.offspring,
            phi: search.phi,
            max_generations: search.max_generations,
            zeta: search.zeta,
            early_stop: search.early_stop,
            layout: search.layout,
            initial_count_p: search.initial_count_p.clone(),
            log_interval: search.log_interval,
            snapshot_generation: search.snapshot_generation,
            snapshot_path: None,
            mutation: config.mutation.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            return Err(Error::InvalidParameter("population size must be positive".into()));
        }
        if self.offspring == 0 {
            return Err(Error::InvalidParameter("offspring count must be positive".into()));
        }
        if !(self.phi > 0.0 && self.phi <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "phi must be in (0, 1], got {}",
                self.phi
            )));
        }
        if let Some(zeta) = self.zeta {
            if !(zeta > 0.0 && zeta < 1.0) {
                return Err(Error::InvalidParameter(format!(
                    "zeta must be in (0, 1), got {zeta}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    MaxGenerations,
    EarlyStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    /// Index of the last completed generation.
    Generating(usize),
    Terminated(Termination),
}

impl EngineState {
    fn name(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initialized => "initialized",
            EngineState::Generating(_) => "generating",
            EngineState::Terminated(_) => "terminated",
        }
    }
}

/// Called after every generation with the current population.
pub trait GenerationObserver {
    fn observe(&mut self, population: &Population, generation: usize);
}

impl<F> GenerationObserver for F
where
    F: FnMut(&Population, usize),
{
    fn observe(&mut self, population: &Population, generation: usize) {
        self(population, generation)
    }
}

impl GenerationObserver for () {
    fn observe(&mut self, _population: &Population, _generation: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationStats {
    pub generation: usize,
    pub best: f32,
    pub mean: f32,
    pub mean_archive: f32,
}

/// Records per-generation statistics and logs them periodically.
#[derive(Debug, Clone, Default)]
pub struct PopulationLogger {
    interval: usize,
    records: Vec<GenerationStats>,
}

impl PopulationLogger {
    pub fn new(interval: usize) -> Self {
        Self {
            interval,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[GenerationStats] {
        &self.records
    }
}

impl GenerationObserver for PopulationLogger {
    fn observe(&mut self, population: &Population, generation: usize) {
        let stats = GenerationStats {
            generation,
            best: population.best().map_or(f32::INFINITY, |b| b.fitness()),
            mean: population.mean_fitness(),
            mean_archive: population.mean_archive_fitness(),
        };
        if self.interval > 0 && generation % self.interval == 0 {
            info!(
                "Generation {}: best {:.4}, mean {:.4}, archive mean {:.4}",
                generation, stats.best, stats.mean, stats.mean_archive
            );
        }
        self.records.push(stats);
    }
}

/// (μ+λ) evolution of sample mixes towards one target.
pub struct Evolution<'a, R: Rng> {
    library: &'a SampleLibrary,
    target: &'a Target,
    evaluator: FitnessEvaluator,
    mutator: Mutator<'a>,
    params: SearchParams,
    rng: R,
    population: Population,
    state: EngineState,
}

impl<'a, R: Rng> Evolution<'a, R> {
    pub fn new(
        library: &'a SampleLibrary,
        target: &'a Target,
        params: SearchParams,
        rng: R,
    ) -> Result<Self> {
        params.validate()?;
        if library.is_empty() {
            return Err(Error::EmptyLibrary);
        }
        Ok(Self {
            library,
            target,
            evaluator: FitnessEvaluator::for_target(target)?,
            mutator: Mutator::new(library, &params.mutation)?,
            params,
            rng,
            population: Population::new(),
            state: EngineState::Uninitialized,
        })
    }

    /// Resume from an existing population instead of drawing a random one.
    ///
    /// Dirty individuals are evaluated, the archive is refreshed for every target
    /// onset and the population is brought to the configured size.
    pub fn with_population(mut self, population: Population) -> Result<Self> {
        self.expect_state(EngineState::Uninitialized)?;
        self.population = population;
        let evaluated = self
            .population
            .reevaluate_dirty(&mut self.evaluator, self.target)?;

        let size = self.params.population_size;
        if self.population.len() > size {
            self.population.remove_worst(self.population.len() - size);
        }
        while self.population.len() < size {
            let individual = self.random_individual()?;
            self.population.insert(individual);
        }

        info!(
            "Resumed population of {} ({} re-evaluated), best {:.4}",
            self.population.len(),
            evaluated,
            self.best_fitness()
        );
        self.state = EngineState::Initialized;
        Ok(self)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn into_population(self) -> Population {
        self.population
    }

    pub fn mutator(&self) -> &Mutator<'a> {
        &self.mutator
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    fn best_fitness(&self) -> f32 {
        self.population
            .best()
            .map_or(f32::INFINITY, |best| best.fitness())
    }

    fn expect_state(&self, expected: EngineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::EngineState {
                expected: expected.name(),
                found: self.state.name(),
            })
        }
    }

    /// Draw and evaluate a random individual, redrawing when a sample is missing.
    fn random_individual(&mut self) -> Result<Individual> {
        let mut last_error = Error::EmptyLibrary;
        for attempt in 0..MAX_INIT_ATTEMPTS {
            let drawn = Individual::random(
                self.library,
                self.params.layout,
                self.target.onsets(),
                self.params.phi,
                &self.params.initial_count_p,
                &mut self.rng,
            );
            match drawn {
                Ok(mut individual) => {
                    self.evaluator.evaluate(&mut individual, self.target)?;
                    return Ok(individual);
                }
                Err(e @ Error::SampleNotFound { .. }) => {
                    debug!("Redrawing initial individual (attempt {}): {e}", attempt + 1);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// Draw μ evaluated individuals, seed the archive and sort.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(EngineState::Uninitialized)?;
        let individuals = (0..self.params.population_size)
            .map(|_| self.random_individual())
            .collect::<Result<Vec<_>>>()?;
        self.population = Population::from_individuals(individuals);
        self.population.init_archive(self.target.onsets());
        self.state = EngineState::Initialized;
        info!(
            "Initialized population of {} over {} onsets, best {:.4}",
            self.population.len(),
            self.target.onsets().len(),
            self.best_fitness()
        );
        Ok(())
    }

    fn reached_early_stop(&self) -> bool {
        self.params
            .early_stop
            .is_some_and(|threshold| self.best_fitness() <= threshold)
    }

    /// Run one generation without an observer.
    pub fn step(&mut self) -> Result<EngineState> {
        self.step_observed(&mut ())
    }

    /// One generation: λ mutated offspring of uniformly drawn parents are inserted
    /// and the λ worst individuals are dropped.
    pub fn step_observed<O: GenerationObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> Result<EngineState> {
        let generation = match self.state {
            EngineState::Initialized => 0,
            EngineState::Generating(last) => last + 1,
            other => {
                return Err(Error::EngineState {
                    expected: "initialized or generating",
                    found: other.name(),
                })
            }
        };

        let lambda = self.params.offspring;
        let mut offspring = Vec::with_capacity(lambda);
        for _ in 0..lambda {
            let index = self.rng.random_range(0..self.population.len());
            let mut child = Individual::clone(&self.population.individuals()[index]);
            self.mutator.mutate(&mut child, &mut self.rng)?;
            self.evaluator.evaluate(&mut child, self.target)?;
            offspring.push(child);
        }
        for child in offspring {
            self.population.insert(child);
        }
        self.population.remove_worst(lambda);

        if let Some(zeta) = self.params.zeta {
            self.mutator.step_size_control(zeta);
        }

        observer.observe(&self.population, generation);

        if self.params.snapshot_generation == Some(generation) {
            if let Some(path) = &self.params.snapshot_path {
                self.population.to_checkpoint().save(path)?;
                info!("Snapshot after generation {generation} written to {}", path.display());
            }
        }

        debug!("Generation {generation}: best {:.4}", self.best_fitness());

        self.state = if self.reached_early_stop() {
            info!(
                "Early stop after generation {generation} with fitness {:.4}",
                self.best_fitness()
            );
            EngineState::Terminated(Termination::EarlyStop)
        } else if generation + 1 >= self.params.max_generations {
            EngineState::Terminated(Termination::MaxGenerations)
        } else {
            EngineState::Generating(generation)
        };
        Ok(self.state)
    }

    /// Initialize if needed and step until a termination condition holds.
    pub fn run<O: GenerationObserver + ?Sized>(&mut self, observer: &mut O) -> Result<Termination> {
        if let EngineState::Terminated(_) = self.state {
            return Err(Error::EngineState {
                expected: "not terminated",
                found: self.state.name(),
            });
        }
        if self.state == EngineState::Uninitialized {
            self.initialize()?;
        }
        if self.state == EngineState::Initialized {
            if self.reached_early_stop() {
                self.state = EngineState::Terminated(Termination::EarlyStop);
            } else if self.params.max_generations == 0 {
                self.state = EngineState::Terminated(Termination::MaxGenerations);
            }
        }

        loop {
            let state = match self.state {
                EngineState::Terminated(_) => self.state,
                _ => self.step_observed(observer)?,
            };
            if let EngineState::Terminated(reason) = state {
                info!(
                    "Search finished ({reason:?}), best {:.4}, archive mean {:.4}",
                    self.best_fitness(),
                    self.population.mean_archive_fitness()
                );
                return Ok(reason);
            }
        }
    }
}

/// Approximate `target` with samples from `library` and return the final population.
pub fn approximate_piece<R: Rng, O: GenerationObserver + ?Sized>(
    library: &SampleLibrary,
    target: &Target,
    params: SearchParams,
    rng: R,
    observer: &mut O,
) -> Result<Population> {
    let mut evolution = Evolution::new(library, target, params, rng)?;
    evolution.run(observer)?;
    Ok(evolution.into_population())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectralConfig;
    use crate::sample::{Pitch, Sample};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f32::consts::PI;

    fn spectral() -> SpectralConfig {
        SpectralConfig {
            sample_rate: 8000,
            n_fft: 128,
            hop_length: 64,
            window_len: 512,
        }
    }

    fn tone(midi: u8) -> Sample {
        let freq = 440.0 * 2f32.powf((midi as f32 - 69.0) / 12.0);
        let waveform = (0..600)
            .map(|i| (2.0 * PI * freq * i as f32 / 8000.0).sin() * 0.3)
            .collect();
        Sample::new("Sine", "ord", Pitch(midi), waveform, 8000)
    }

    fn library() -> SampleLibrary {
        SampleLibrary::from_samples((60..=72).map(tone))
    }

    fn params() -> SearchParams {
        SearchParams {
            population_size: 12,
            offspring: 2,
            phi: 1.0,
            max_generations: 25,
            log_interval: 0,
            ..SearchParams::default()
        }
    }

    #[test]
    fn generations_keep_size_order_and_archive_monotone() {
        let lib = library();
        let target = Target::new(tone(64).waveform, vec![0], spectral()).unwrap();
        let mut evolution = Evolution::new(&lib, &target, params(), StdRng::seed_from_u64(1)).unwrap();

        let mut archive_history = Vec::new();
        let mut generations = Vec::new();
        let mut observer = |population: &Population, generation: usize| {
            assert_eq!(population.len(), 12);
            assert!(population
                .individuals()
                .windows(2)
                .all(|w| w[0].fitness() <= w[1].fitness()));
            archive_history.push(population.archive_record(0).unwrap().fitness);
            generations.push(generation);
        };
        let reason = evolution.run(&mut observer).unwrap();

        assert_eq!(reason, Termination::MaxGenerations);
        assert_eq!(generations, (0..25).collect::<Vec<_>>());
        assert!(archive_history.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(evolution.state(), EngineState::Terminated(Termination::MaxGenerations));
    }

    #[test]
    fn stepping_outside_the_loop_is_an_error() {
        let lib = library();
        let target = Target::new(tone(64).waveform, vec![0], spectral()).unwrap();
        let mut evolution = Evolution::new(&lib, &target, params(), StdRng::seed_from_u64(2)).unwrap();
        assert!(matches!(evolution.step(), Err(Error::EngineState { .. })));

        evolution.initialize().unwrap();
        assert!(evolution.initialize().is_err());
        assert_eq!(evolution.step().unwrap(), EngineState::Generating(0));
        evolution.run(&mut ()).unwrap();
        assert!(matches!(evolution.step(), Err(Error::EngineState { .. })));
        assert!(matches!(evolution.run(&mut ()), Err(Error::EngineState { .. })));
    }

    #[test]
    fn exact_match_stops_early() {
        let lib = SampleLibrary::from_samples([tone(64)]);
        let target = Target::new(tone(64).waveform, vec![0], spectral()).unwrap();
        let params = SearchParams {
            initial_count_p: vec![1.0],
            early_stop: Some(0.0),
            ..params()
        };
        let mut logger = PopulationLogger::new(0);
        let population =
            approximate_piece(&lib, &target, params, StdRng::seed_from_u64(3), &mut logger).unwrap();
        assert_eq!(population.best().unwrap().fitness(), 0.0);
        assert!(logger.records().is_empty());
    }

    #[test]
    fn step_size_control_runs_once_per_generation() {
        let lib = library();
        let target = Target::new(tone(67).waveform, vec![0], spectral()).unwrap();
        let params = SearchParams {
            zeta: Some(0.5),
            max_generations: 3,
            ..params()
        };
        let mut evolution = Evolution::new(&lib, &target, params, StdRng::seed_from_u64(4)).unwrap();
        evolution.run(&mut ()).unwrap();
        assert_eq!(evolution.mutator().alpha(), 6.0 * 0.125);
    }

    #[test]
    fn resumes_from_a_population() {
        let lib = library();
        let target = Target::new(tone(62).waveform, vec![0], spectral()).unwrap();
        let first = approximate_piece(&lib, &target, params(), StdRng::seed_from_u64(5), &mut ()).unwrap();
        let best = first.best().unwrap().fitness();

        let mut smaller = first.clone();
        smaller.remove_worst(4);
        let mut evolution = Evolution::new(&lib, &target, params(), StdRng::seed_from_u64(6))
            .unwrap()
            .with_population(smaller)
            .unwrap();
        assert_eq!(evolution.state(), EngineState::Initialized);
        assert_eq!(evolution.population().len(), 12);
        evolution.run(&mut ()).unwrap();
        assert!(evolution.population().best().unwrap().fitness() <= best);
    }

    #[test]
    fn snapshot_is_written_at_configured_generation() {
        let lib = library();
        let target = Target::new(tone(65).waveform, vec![0], spectral()).unwrap();
        let mut path = std::env::temp_dir();
        path.push(format!(
            "evomix_snapshot_{}.bin",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let params = SearchParams {
            snapshot_generation: Some(3),
            snapshot_path: Some(path.clone()),
            max_generations: 5,
            ..params()
        };
        approximate_piece(&lib, &target, params, StdRng::seed_from_u64(7), &mut ()).unwrap();
        let checkpoint = crate::checkpoint::Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.individuals.len(), 12);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let lib = library();
        let target = Target::new(tone(64).waveform, vec![0], spectral()).unwrap();
        for bad in [
            SearchParams { population_size: 0, ..params() },
            SearchParams { offspring: 0, ..params() },
            SearchParams { phi: 0.0, ..params() },
            SearchParams { zeta: Some(1.0), ..params() },
        ] {
            assert!(Evolution::new(&lib, &target, bad, StdRng::seed_from_u64(0)).is_err());
        }
    }
}
