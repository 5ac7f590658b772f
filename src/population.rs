use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::fitness::FitnessEvaluator;
use crate::individual::{Individual, IndividualRef};
use crate::target::{Onset, Target};

/// Best fitness seen for one onset and the candidate that achieved it.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub fitness: f32,
    pub individual: IndividualRef,
}

/// Outcome of [`Population::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    Consistent,
    /// The populations tracked different onsets; fitness of the listed onsets
    /// must be recomputed before results can be trusted.
    OnsetMismatch(Vec<Onset>),
}

impl MergeStatus {
    pub fn is_consistent(&self) -> bool {
        matches!(self, MergeStatus::Consistent)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            MergeStatus::Consistent => Ok(()),
            MergeStatus::OnsetMismatch(onsets) => Err(Error::OnsetMismatch { onsets }),
        }
    }
}

/// Candidates sorted ascending by fitness, plus a per-onset elitist archive.
///
/// Archive records are only ever replaced by a strictly better fitness and are
/// not affected by truncation of the live population.
#[derive(Debug, Clone, Default)]
pub struct Population {
    individuals: Vec<IndividualRef>,
    archive: BTreeMap<Onset, ArchiveRecord>,
}

fn by_fitness(a: &IndividualRef, b: &IndividualRef) -> std::cmp::Ordering {
    a.fitness().total_cmp(&b.fitness())
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Population of already evaluated individuals; sorts them, archive left empty.
    pub fn from_individuals(individuals: impl IntoIterator<Item = Individual>) -> Self {
        let mut individuals: Vec<IndividualRef> = individuals.into_iter().map(Arc::new).collect();
        individuals.sort_by(by_fitness);
        Self {
            individuals,
            archive: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        individuals: Vec<IndividualRef>,
        archive: BTreeMap<Onset, ArchiveRecord>,
    ) -> Self {
        let mut population = Self {
            individuals,
            archive,
        };
        population.sort();
        population
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn individuals(&self) -> &[IndividualRef] {
        &self.individuals
    }

    pub fn archive(&self) -> &BTreeMap<Onset, ArchiveRecord> {
        &self.archive
    }

    pub fn archive_record(&self, onset: Onset) -> Option<&ArchiveRecord> {
        self.archive.get(&onset)
    }

    /// Head of the sorted sequence.
    pub fn best(&self) -> Option<&IndividualRef> {
        self.individuals.first()
    }

    /// Stable re-sort by stored fitness.
    pub fn sort(&mut self) {
        self.individuals.sort_by(by_fitness);
    }

    /// Insert at the sorted position (before equal fitness) and update the archive.
    pub fn insert(&mut self, individual: Individual) -> IndividualRef {
        let individual = Arc::new(individual);
        let fitness = individual.fitness();
        let pos = self
            .individuals
            .partition_point(|other| other.fitness().total_cmp(&fitness).is_lt());
        self.individuals.insert(pos, Arc::clone(&individual));
        self.update_archive(&individual);
        individual
    }

    fn update_archive(&mut self, individual: &IndividualRef) {
        for (&onset, record) in self.archive.iter_mut() {
            if let Some(fitness) = individual.fitness_at(onset) {
                if fitness < record.fitness {
                    record.fitness = fitness;
                    record.individual = Arc::clone(individual);
                }
            }
        }
    }

    /// Record `individual` for `onset` if it beats the entry, adding missing entries.
    fn offer(&mut self, onset: Onset, individual: &IndividualRef) {
        let Some(fitness) = individual.fitness_at(onset) else {
            return;
        };
        match self.archive.entry(onset) {
            Entry::Vacant(e) => {
                e.insert(ArchiveRecord {
                    fitness,
                    individual: Arc::clone(individual),
                });
            }
            Entry::Occupied(mut e) => {
                if fitness < e.get().fitness {
                    e.insert(ArchiveRecord {
                        fitness,
                        individual: Arc::clone(individual),
                    });
                }
            }
        }
    }

    /// Drop the `n` worst individuals from the tail.
    pub fn remove_worst(&mut self, n: usize) {
        let keep = self.individuals.len().saturating_sub(n);
        self.individuals.truncate(keep);
    }

    /// Seed the archive with the best individual per onset.
    pub fn init_archive(&mut self, onsets: &[Onset]) {
        let individuals = self.individuals.clone();
        for &onset in onsets {
            for individual in &individuals {
                self.offer(onset, individual);
            }
        }
    }

    /// Absorb `other`. Its individuals are marked dirty.
    ///
    /// Archive onsets present in only one of the two populations are adopted and
    /// reported as a mismatch.
    pub fn merge(&mut self, other: Population) -> MergeStatus {
        let mut mismatched: Vec<Onset> = self
            .archive
            .keys()
            .filter(|onset| !other.archive.contains_key(onset))
            .copied()
            .collect();

        for (onset, record) in other.archive {
            match self.archive.entry(onset) {
                Entry::Vacant(e) => {
                    mismatched.push(onset);
                    e.insert(record);
                }
                Entry::Occupied(mut e) => {
                    if record.fitness < e.get().fitness {
                        e.insert(record);
                    }
                }
            }
        }

        for mut individual in other.individuals {
            Arc::make_mut(&mut individual).mark_dirty();
            self.individuals.push(individual);
        }
        self.sort();

        if mismatched.is_empty() {
            MergeStatus::Consistent
        } else {
            mismatched.sort_unstable();
            debug!("Merged populations with mismatched onsets {mismatched:?}");
            MergeStatus::OnsetMismatch(mismatched)
        }
    }

    /// Evaluate every individual that is dirty or was scored on a different set
    /// of onsets than `target`'s, re-sort and refresh the archive for all target
    /// onsets. Returns the number of individuals evaluated.
    pub fn reevaluate_dirty(
        &mut self,
        evaluator: &mut FitnessEvaluator,
        target: &Target,
    ) -> Result<usize> {
        let mut evaluated = 0;
        for individual in &mut self.individuals {
            if !individual.is_scored_for(target.onsets()) {
                let individual = Arc::make_mut(individual);
                individual.mark_dirty();
                evaluator.evaluate(individual, target)?;
                evaluated += 1;
            }
        }
        self.sort();
        let individuals = self.individuals.clone();
        for &onset in target.onsets() {
            for individual in &individuals {
                self.offer(onset, individual);
            }
        }
        Ok(evaluated)
    }

    /// Mean aggregate fitness of the live population.
    pub fn mean_fitness(&self) -> f32 {
        if self.individuals.is_empty() {
            return f32::INFINITY;
        }
        self.individuals.iter().map(|i| i.fitness()).sum::<f32>() / self.individuals.len() as f32
    }

    /// Mean of the archived per-onset fitness values.
    pub fn mean_archive_fitness(&self) -> f32 {
        if self.archive.is_empty() {
            return f32::INFINITY;
        }
        self.archive.values().map(|r| r.fitness).sum::<f32>() / self.archive.len() as f32
    }

    /// Place each archived mix at its onset in a buffer of `len` samples.
    pub fn render_archive(&self, len: usize) -> Result<Vec<f32>> {
        let mut out = vec![0.0; len];
        for (&onset, record) in &self.archive {
            if onset >= len {
                return Err(Error::OnsetOutOfRange { onset, len });
            }
            let mix = record.individual.render(onset)?;
            for (dst, src) in out[onset..].iter_mut().zip(&mix) {
                *dst += src;
            }
        }
        Ok(out)
    }
}
