use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use evomix::annotation::{self, Annotations};
use evomix::audio;
use evomix::checkpoint::Checkpoint;
use evomix::config::AppConfig;
use evomix::fitness::FitnessEvaluator;
use evomix::individual::GenotypeLayout;
use evomix::jaccard::{jaccard_scores, AnnotationLogger};
use evomix::library::SampleLibrary;
use evomix::population::{MergeStatus, Population};
use evomix::search::{approximate_piece, GenerationObserver, PopulationLogger, SearchParams};
use evomix::target::{onsets_from_seconds, Target};
use evomix::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, version, about = "Approximate recordings with instrument samples")]
struct Cli {
    /// Path to config TOML
    #[arg(long, default_value = "evomix.toml", global = true)]
    config: PathBuf,

    /// Sample library root (<instrument>/.../<style>/<name>_<pitch>.wav)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one search against a target recording
    Approximate {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        search: SearchArgs,
        /// Seed for the random generator
        #[arg(long)]
        seed: Option<u64>,
        /// Where to write the final population
        #[arg(long, short, default_value = "population.bin")]
        output: PathBuf,
        /// Render the archived mixes to this WAV file
        #[arg(long)]
        render: Option<PathBuf>,
        /// Write a population snapshot here after `snapshot_generation`
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// ARFF ground truth; Jaccard errors are logged every `log_interval` generations
        #[arg(long)]
        annotations: Option<PathBuf>,
        /// TOML table mapping annotation instrument names to library names
        #[arg(long, requires = "annotations")]
        instrument_map: Option<PathBuf>,
    },
    /// Run independent seeded searches in parallel
    Batch {
        /// Target recordings
        #[arg(required = true)]
        targets: Vec<PathBuf>,
        #[command(flatten)]
        search: SearchArgs,
        /// Runs per target
        #[arg(long, default_value_t = 1)]
        runs: usize,
        /// Seed of the first run; run i uses seed + i
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value = "runs")]
        output_dir: PathBuf,
    },
    /// Compare a population's archive with ARFF annotations
    Evaluate {
        checkpoint: PathBuf,
        annotations: PathBuf,
        /// TOML table mapping annotation instrument names to library names
        #[arg(long)]
        instrument_map: Option<PathBuf>,
    },
    /// Merge populations into one checkpoint
    Merge {
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
        /// Target used to re-evaluate individuals after an onset mismatch
        #[arg(long)]
        target: Option<PathBuf>,
        /// Onset file for the re-evaluation target
        #[arg(long, requires = "target")]
        onsets: Option<PathBuf>,
        #[arg(long, short, default_value = "merged.bin")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Target recording
    target: PathBuf,
    /// Onset times in seconds, whitespace or comma separated
    #[arg(long)]
    onsets: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    Flat,
    PerOnset,
}

impl From<LayoutArg> for GenotypeLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Flat => GenotypeLayout::Flat,
            LayoutArg::PerOnset => GenotypeLayout::PerOnset,
        }
    }
}

/// Overrides for the `[search]` section of the config.
#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(long)]
    population: Option<usize>,
    #[arg(long)]
    offspring: Option<usize>,
    #[arg(long)]
    generations: Option<usize>,
    #[arg(long)]
    phi: Option<f32>,
    #[arg(long)]
    zeta: Option<f32>,
    #[arg(long)]
    early_stop: Option<f32>,
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,
}

impl SearchArgs {
    fn apply(&self, config: &mut AppConfig) {
        let search = &mut config.search;
        if let Some(v) = self.population {
            search.population_size = v;
        }
        if let Some(v) = self.offspring {
            search.offspring = v;
        }
        if let Some(v) = self.generations {
            search.max_generations = v;
        }
        if let Some(v) = self.phi {
            search.phi = v;
        }
        if self.zeta.is_some() {
            search.zeta = self.zeta;
        }
        if self.early_stop.is_some() {
            search.early_stop = self.early_stop;
        }
        if let Some(layout) = self.layout {
            search.layout = layout.into();
        }
    }
}

fn read_onsets(path: &Path, sample_rate: u32) -> Result<Vec<usize>> {
    let text = fs::read_to_string(path)?;
    let seconds = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>().map_err(|_| Error::Parse {
                what: "onset time",
                input: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(onsets_from_seconds(&seconds, sample_rate))
}

fn load_target(path: &Path, onsets: Option<&Path>, config: &AppConfig) -> Result<Target> {
    let onsets = onsets
        .map(|p| read_onsets(p, config.spectral.sample_rate))
        .transpose()?;
    Target::load(path, onsets, config.spectral.clone())
}

fn load_annotations(path: &Path, instrument_map: Option<&Path>) -> Result<Annotations> {
    let mut annotations = annotation::load_arff(path)?;
    if let Some(map) = instrument_map {
        let names: BTreeMap<String, String> = toml::from_str(&fs::read_to_string(map)?)?;
        annotations.rename_instruments(&names);
    }
    Ok(annotations)
}

fn load_library(cli: &Cli, config: &AppConfig) -> Result<SampleLibrary> {
    let root = cli
        .library
        .as_ref()
        .ok_or_else(|| Error::InvalidParameter("--library is required".into()))?;
    SampleLibrary::load_dir(root, config.spectral.sample_rate)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load_or_default(&cli.config);

    match &cli.command {
        Command::Approximate {
            target,
            search,
            seed,
            output,
            render,
            snapshot,
            annotations,
            instrument_map,
        } => {
            search.apply(&mut config);
            let library = load_library(&cli, &config)?;
            let target = load_target(&target.target, target.onsets.as_deref(), &config)?;

            let seed = seed.unwrap_or_else(|| rand::rng().random());
            info!("Seed {seed}");
            let mut params = SearchParams::from_config(&config);
            params.snapshot_path = snapshot.clone();
            let mut logger = PopulationLogger::new(params.log_interval);
            let truth = annotations
                .as_deref()
                .map(|path| load_annotations(path, instrument_map.as_deref()))
                .transpose()?;
            let mut scorer = truth
                .as_ref()
                .map(|truth| AnnotationLogger::new(truth, params.log_interval));
            let mut observer = |population: &Population, generation: usize| {
                logger.observe(population, generation);
                if let Some(scorer) = scorer.as_mut() {
                    scorer.observe(population, generation);
                }
            };

            let population = approximate_piece(
                &library,
                &target,
                params,
                StdRng::seed_from_u64(seed),
                &mut observer,
            )?;
            population.to_checkpoint().save(output)?;

            if let Some(path) = render {
                let mix = population.render_archive(target.signal().len())?;
                audio::write_wav(path, &mix, target.sample_rate())?;
                info!("Rendered archive to {}", path.display());
            }
        }

        Command::Batch {
            targets,
            search,
            runs,
            seed,
            output_dir,
        } => {
            search.apply(&mut config);
            let library = load_library(&cli, &config)?;
            let targets = targets
                .iter()
                .map(|path| -> Result<_> { Ok((path, load_target(path, None, &config)?)) })
                .collect::<Result<Vec<_>>>()?;
            fs::create_dir_all(output_dir)?;

            let jobs: Vec<(usize, usize)> = (0..targets.len())
                .flat_map(|t| (0..*runs).map(move |r| (t, r)))
                .collect();
            let params = SearchParams::from_config(&config);

            let results: Vec<Result<()>> = jobs
                .par_iter()
                .enumerate()
                .map(|(i, &(t, r))| {
                    let (path, target) = &targets[t];
                    let run_seed = seed + i as u64;
                    let population = approximate_piece(
                        &library,
                        target,
                        params.clone(),
                        StdRng::seed_from_u64(run_seed),
                        &mut (),
                    )?;
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("target");
                    let out = output_dir.join(format!("{stem}_{r}.bin"));
                    population.to_checkpoint().save(&out)?;
                    info!(
                        "Run {r} on {} (seed {run_seed}) finished, best {:.4}",
                        path.display(),
                        population.best().map_or(f32::INFINITY, |b| b.fitness())
                    );
                    Ok(())
                })
                .collect();

            let failures = results.iter().filter(|r| r.is_err()).count();
            for err in results.into_iter().filter_map(|r| r.err()) {
                error!("Run failed: {err}");
            }
            if failures > 0 {
                return Err(Error::InvalidParameter(format!(
                    "{failures} of {} runs failed",
                    jobs.len()
                )));
            }
        }

        Command::Evaluate {
            checkpoint,
            annotations,
            instrument_map,
        } => {
            let library = load_library(&cli, &config)?;
            let population = Checkpoint::load(checkpoint)?.expand(&library)?;
            let annotations = load_annotations(annotations, instrument_map.as_deref())?;
            match jaccard_scores(&population, &annotations) {
                Some(scores) => println!(
                    "j_i={:.4} j_p={:.4} j_ip={:.4}",
                    scores.instruments, scores.pitches, scores.combined
                ),
                None => warn!("No annotated onsets to compare"),
            }
        }

        Command::Merge {
            inputs,
            target,
            onsets,
            output,
        } => {
            let library = load_library(&cli, &config)?;
            let mut paths = inputs.iter();
            let mut merged = match paths.next() {
                Some(path) => Checkpoint::load(path)?.expand(&library)?,
                None => return Err(Error::InvalidParameter("nothing to merge".into())),
            };
            let mut status = MergeStatus::Consistent;
            for path in paths {
                if let MergeStatus::OnsetMismatch(onsets) =
                    merged.merge(Checkpoint::load(path)?.expand(&library)?)
                {
                    warn!("{} tracks different onsets: {onsets:?}", path.display());
                    status = MergeStatus::OnsetMismatch(onsets);
                }
            }

            if !status.is_consistent() {
                match target {
                    Some(path) => {
                        let target = load_target(path, onsets.as_deref(), &config)?;
                        let mut evaluator = FitnessEvaluator::for_target(&target)?;
                        let n = merged.reevaluate_dirty(&mut evaluator, &target)?;
                        info!("Re-evaluated {n} individuals against {}", path.display());
                    }
                    None => status.into_result()?,
                }
            }
            merged.to_checkpoint().save(output)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
