use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::individual::{Genotype, Individual, IndividualRef, SampleCollection, Voice};
use crate::library::SampleLibrary;
use crate::population::{ArchiveRecord, Population};
use crate::sample::SampleKey;
use crate::target::Onset;

pub const CHECKPOINT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatVoice {
    pub key: SampleKey,
    pub loudness: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlatGenotype {
    Flat(Vec<FlatVoice>),
    PerOnset(BTreeMap<Onset, Vec<FlatVoice>>),
}

/// An individual with sample references reduced to their keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndividual {
    pub genotype: FlatGenotype,
    pub phi: f32,
    pub fitness: f32,
    pub fitness_per_onset: BTreeMap<Onset, f32>,
    pub dirty: bool,
}

/// Archived candidate: an index into the stored population or into the
/// candidates kept only for their archive records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchivedIndividual {
    Member(usize),
    Retired(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatArchiveRecord {
    pub fitness: f32,
    pub individual: ArchivedIndividual,
}

/// Serialized population without waveform data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub individuals: Vec<FlatIndividual>,
    /// Archive holders no longer in the population, each stored once.
    pub retired: Vec<FlatIndividual>,
    pub archive: BTreeMap<Onset, FlatArchiveRecord>,
}

fn flatten_collection(collection: &SampleCollection) -> Vec<FlatVoice> {
    collection
        .voices()
        .iter()
        .map(|v| FlatVoice {
            key: v.sample.key.clone(),
            loudness: v.loudness,
        })
        .collect()
}

fn expand_collection(voices: &[FlatVoice], library: &SampleLibrary) -> Result<SampleCollection> {
    let voices = voices
        .iter()
        .map(|v| {
            Ok(Voice {
                sample: library.sample(&v.key)?,
                loudness: v.loudness,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    SampleCollection::new(voices)
}

impl FlatIndividual {
    pub fn flatten(individual: &Individual) -> Self {
        let genotype = match individual.genotype() {
            Genotype::Flat(c) => FlatGenotype::Flat(flatten_collection(c)),
            Genotype::PerOnset(map) => FlatGenotype::PerOnset(
                map.iter()
                    .map(|(&onset, c)| (onset, flatten_collection(c)))
                    .collect(),
            ),
        };
        Self {
            genotype,
            phi: individual.phi(),
            fitness: individual.fitness(),
            fitness_per_onset: individual.fitness_per_onset().clone(),
            dirty: individual.is_dirty(),
        }
    }

    /// Re-resolve every sample key against `library`.
    pub fn expand(&self, library: &SampleLibrary) -> Result<Individual> {
        let genotype = match &self.genotype {
            FlatGenotype::Flat(voices) => Genotype::Flat(expand_collection(voices, library)?),
            FlatGenotype::PerOnset(map) => Genotype::PerOnset(
                map.iter()
                    .map(|(&onset, voices)| Ok((onset, expand_collection(voices, library)?)))
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(Individual::new(genotype, self.phi)?.with_fitness(
            self.fitness,
            self.fitness_per_onset.clone(),
            self.dirty,
        ))
    }
}

impl Checkpoint {
    pub fn from_population(population: &Population) -> Self {
        let members = population.individuals();
        let individuals = members
            .iter()
            .map(|i| FlatIndividual::flatten(i))
            .collect();
        let mut retired: Vec<&IndividualRef> = Vec::new();
        let archive = population
            .archive()
            .iter()
            .map(|(&onset, record)| {
                let holder = &record.individual;
                let individual = match members.iter().position(|m| Arc::ptr_eq(m, holder)) {
                    Some(index) => ArchivedIndividual::Member(index),
                    None => match retired.iter().position(|r| Arc::ptr_eq(*r, holder)) {
                        Some(index) => ArchivedIndividual::Retired(index),
                        None => {
                            retired.push(holder);
                            ArchivedIndividual::Retired(retired.len() - 1)
                        }
                    },
                };
                (
                    onset,
                    FlatArchiveRecord {
                        fitness: record.fitness,
                        individual,
                    },
                )
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            individuals,
            retired: retired.into_iter().map(|r| FlatIndividual::flatten(r)).collect(),
            archive,
        }
    }

    /// Rebuild the population, resolving samples against `library`.
    pub fn expand(&self, library: &SampleLibrary) -> Result<Population> {
        let individuals: Vec<IndividualRef> = self
            .individuals
            .iter()
            .map(|i| i.expand(library).map(Arc::new))
            .collect::<Result<_>>()?;
        let retired: Vec<IndividualRef> = self
            .retired
            .iter()
            .map(|i| i.expand(library).map(Arc::new))
            .collect::<Result<_>>()?;

        let mut archive = BTreeMap::new();
        for (&onset, record) in &self.archive {
            let (pool, index) = match record.individual {
                ArchivedIndividual::Member(index) => (&individuals, index),
                ArchivedIndividual::Retired(index) => (&retired, index),
            };
            let individual = pool.get(index).cloned().ok_or_else(|| {
                Error::InvalidGenotype(format!(
                    "archive entry for onset {onset} points at missing individual {index}"
                ))
            })?;
            archive.insert(
                onset,
                ArchiveRecord {
                    fitness: record.fitness,
                    individual,
                },
            );
        }

        Ok(Population::from_parts(individuals, archive))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        info!(
            "Wrote checkpoint with {} individuals and {} archive entries to {}",
            self.individuals.len(),
            self.archive.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Self = bincode::deserialize_from(reader)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(Error::InvalidParameter(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }
}

impl Population {
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint::from_population(self)
    }
}
