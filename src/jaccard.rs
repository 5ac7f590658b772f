use std::collections::BTreeSet;

use log::info;

use crate::annotation::{Annotations, Note};
use crate::individual::Individual;
use crate::population::Population;
use crate::sample::Pitch;
use crate::search::GenerationObserver;
use crate::target::Onset;

/// Which part of a note identity is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JaccardMode {
    Instruments,
    Pitches,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Feature<'a> {
    Instrument(&'a str),
    Pitch(Pitch),
    Note(&'a str, Pitch),
}

fn feature(mode: JaccardMode, instrument: &str, pitch: Pitch) -> Feature<'_> {
    match mode {
        JaccardMode::Instruments => Feature::Instrument(instrument),
        JaccardMode::Pitches => Feature::Pitch(pitch),
        JaccardMode::Combined => Feature::Note(instrument, pitch),
    }
}

fn extracted(individual: &Individual, onset: Onset, mode: JaccardMode) -> BTreeSet<Feature<'_>> {
    let genotype = individual.genotype();
    genotype
        .collection(genotype.slot_for(onset))
        .into_iter()
        .flat_map(|c| c.voices())
        .map(|v| feature(mode, v.sample.instrument(), v.sample.pitch()))
        .collect()
}

fn annotated(notes: &[Note], mode: JaccardMode) -> BTreeSet<Feature<'_>> {
    notes
        .iter()
        .map(|n| feature(mode, &n.instrument, n.pitch))
        .collect()
}

/// `(|false positives| + |false negatives|) / |union|`, zero for two empty sets.
fn set_error<T: Ord>(extracted: &BTreeSet<T>, annotated: &BTreeSet<T>) -> f32 {
    let union = extracted.union(annotated).count();
    if union == 0 {
        return 0.0;
    }
    extracted.symmetric_difference(annotated).count() as f32 / union as f32
}

/// Mean Jaccard error of the archived mixes against ground truth.
///
/// Archive onsets and annotated onsets are paired in time order. Returns `None`
/// when there is nothing to compare.
pub fn jaccard_error(
    population: &Population,
    annotations: &Annotations,
    mode: JaccardMode,
) -> Option<f32> {
    let errors: Vec<f32> = population
        .archive()
        .iter()
        .zip(&annotations.events)
        .map(|((&onset, record), event)| {
            set_error(
                &extracted(&record.individual, onset, mode),
                &annotated(&event.notes, mode),
            )
        })
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.iter().sum::<f32>() / errors.len() as f32)
    }
}

/// Instrument, pitch and combined errors (`j_i`, `j_p`, `j_ip`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JaccardScores {
    pub instruments: f32,
    pub pitches: f32,
    pub combined: f32,
}

pub fn jaccard_scores(population: &Population, annotations: &Annotations) -> Option<JaccardScores> {
    Some(JaccardScores {
        instruments: jaccard_error(population, annotations, JaccardMode::Instruments)?,
        pitches: jaccard_error(population, annotations, JaccardMode::Pitches)?,
        combined: jaccard_error(population, annotations, JaccardMode::Combined)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationRecord {
    pub generation: usize,
    pub scores: Option<JaccardScores>,
    pub mean_archive: f32,
}

/// Tracks the archive's Jaccard errors against ground truth during a search.
#[derive(Debug, Clone)]
pub struct AnnotationLogger<'a> {
    annotations: &'a Annotations,
    interval: usize,
    records: Vec<AnnotationRecord>,
}

impl<'a> AnnotationLogger<'a> {
    /// Scores every `interval`-th generation; an interval of 0 is treated as 1.
    pub fn new(annotations: &'a Annotations, interval: usize) -> Self {
        Self {
            annotations,
            interval: interval.max(1),
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }
}

impl GenerationObserver for AnnotationLogger<'_> {
    fn observe(&mut self, population: &Population, generation: usize) {
        if generation % self.interval != 0 {
            return;
        }
        let record = AnnotationRecord {
            generation,
            scores: jaccard_scores(population, self.annotations),
            mean_archive: population.mean_archive_fitness(),
        };
        if let Some(scores) = record.scores {
            info!(
                "Generation {generation}: j_i {:.4}, j_p {:.4}, j_ip {:.4}, archive mean {:.4}",
                scores.instruments, scores.pitches, scores.combined, record.mean_archive
            );
        }
        self.records.push(record);
    }
}
