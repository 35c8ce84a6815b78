//! Genetic search over full assignments
//!
//! A population of experiments (full download → circuit assignments) is
//! scored in parallel by the timeline integrator, the top slice is carried
//! over verbatim, and the rest of the next generation is bred by uniform
//! per-download crossover between parents drawn from the top percentile,
//! with a small per-download mutation probability. The best assignment of
//! every round is snapshotted to disk, so interrupting the loop loses at
//! most the round in progress.

use std::cmp::Ordering;
use std::path::Path;
use std::time::Instant;

use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::GeneticConfig;
use crate::error::{Error, Result};
use crate::evaluator::integrate;
use crate::report;
use crate::timeline::Timeline;
use crate::types::Assignment;

/// One candidate solution: a full assignment plus its most recent score
#[derive(Clone, Debug)]
pub struct Experiment {
    /// Circuit chosen for every download
    pub assignment: Assignment,
    /// Integrated throughput from the most recent scoring pass, in bytes
    pub score: f64,
}

/// Run the genetic search.
///
/// Terminates after `config.rounds` rounds or `config.stall_rounds` rounds
/// without improvement; with neither set it runs until killed. Returns the
/// best assignment seen across all rounds.
pub fn run(
    catalog: &Catalog,
    config: &GeneticConfig,
    threads: usize,
    output_dir: &Path,
) -> Result<Assignment> {
    config.validate()?;
    let timeline = Timeline::new(catalog);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;
    let mut rng = rand::thread_rng();

    info!(population = config.population, "generating initial population");
    let mut experiments = initial_population(catalog, config, &mut rng);

    let mut best_assignment = experiments[0].assignment.clone();
    let mut best_score = f64::NEG_INFINITY;
    let mut stalled = 0_u64;
    let mut round = 1_u64;

    loop {
        info!(round, "starting round");
        let started = Instant::now();
        score_population(catalog, &timeline, &pool, &mut experiments)?;

        let mut round_best = 0;
        for idx in 1..experiments.len() {
            if experiments[idx].score > experiments[round_best].score {
                round_best = idx;
            }
        }
        let average =
            experiments.iter().map(|e| e.score).sum::<f64>() / experiments.len() as f64;
        info!(
            round,
            average_kib = average / 1024.0,
            best_mib = experiments[round_best].score / 1024.0 / 1024.0,
            elapsed = ?started.elapsed(),
            "round scored, saving best circuit selection"
        );
        report::write_round_snapshot(
            catalog,
            &experiments[round_best].assignment,
            output_dir,
            round,
        )?;

        if experiments[round_best].score > best_score {
            best_score = experiments[round_best].score;
            best_assignment = experiments[round_best].assignment.clone();
            stalled = 0;
        } else {
            stalled += 1;
        }

        if config.rounds.is_some_and(|limit| round >= limit) {
            info!(round, "round limit reached");
            break;
        }
        if config
            .stall_rounds
            .is_some_and(|limit| stalled >= limit)
        {
            info!(round, stalled, "no improvement, stopping");
            break;
        }

        breed(catalog, config, &mut experiments, &mut rng);
        round += 1;
    }

    Ok(best_assignment)
}

/// Draw the initial population, uniformly or bandwidth-weighted per pool
pub(crate) fn initial_population(
    catalog: &Catalog,
    config: &GeneticConfig,
    rng: &mut impl Rng,
) -> Vec<Experiment> {
    (0..config.population)
        .map(|_| {
            let mut assignment = Assignment::new(catalog.download_count());
            for id in catalog.download_ids() {
                let pool = if config.initial_weighted {
                    catalog.weighted_candidates(id)
                } else {
                    catalog.candidates(id)
                };
                assignment.assign(id, pool[rng.gen_range(0..pool.len())]);
            }
            Experiment {
                assignment,
                score: 0.0,
            }
        })
        .collect()
}

/// Score every experiment against the shared catalog and timeline
pub(crate) fn score_population(
    catalog: &Catalog,
    timeline: &Timeline,
    pool: &rayon::ThreadPool,
    experiments: &mut [Experiment],
) -> Result<()> {
    pool.install(|| {
        experiments.par_iter_mut().try_for_each(|experiment| {
            let started = Instant::now();
            experiment.score = integrate(catalog, timeline, &experiment.assignment)?;
            debug!(
                score_mib = experiment.score / 1024.0 / 1024.0,
                elapsed = ?started.elapsed(),
                "experiment scored"
            );
            Ok::<(), Error>(())
        })
    })
}

/// Produce the next generation: elites carried over verbatim, the rest bred
/// by per-download uniform crossover with mutation.
pub(crate) fn breed(
    catalog: &Catalog,
    config: &GeneticConfig,
    experiments: &mut Vec<Experiment>,
    rng: &mut impl Rng,
) {
    let n = experiments.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        experiments[b]
            .score
            .partial_cmp(&experiments[a].score)
            .unwrap_or(Ordering::Equal)
    });

    let elite_count = ((config.elite_percentile * n as f64).ceil() as usize).min(n);
    let breed_count = ((config.breed_percentile * n as f64).ceil() as usize).clamp(1, n);
    let breeders = &order[..breed_count];

    let mut next = Vec::with_capacity(n);
    for &idx in &order[..elite_count] {
        next.push(experiments[idx].clone());
    }
    while next.len() < n {
        let parent1 = &experiments[select_parent(experiments, breeders, config.breed_weighted, rng)];
        let parent2 = &experiments[select_parent(experiments, breeders, config.breed_weighted, rng)];

        let mut child = Assignment::new(catalog.download_count());
        for id in catalog.download_ids() {
            let candidates = catalog.candidates(id);
            let circuit = if rng.gen_bool(config.mutation_probability) {
                candidates[rng.gen_range(0..candidates.len())]
            } else if rng.gen_bool(0.5) {
                parent1.assignment.get(id).unwrap_or(candidates[0])
            } else {
                parent2.assignment.get(id).unwrap_or(candidates[0])
            };
            child.assign(id, circuit);
        }
        next.push(Experiment {
            assignment: child,
            score: 0.0,
        });
    }
    *experiments = next;
}

/// Draw a parent index from the breed pool, uniformly or with
/// `floor(score / 1024)` shares per experiment.
fn select_parent(
    experiments: &[Experiment],
    breeders: &[usize],
    weighted: bool,
    rng: &mut impl Rng,
) -> usize {
    if !weighted {
        return breeders[rng.gen_range(0..breeders.len())];
    }
    let shares: Vec<u64> = breeders
        .iter()
        .map(|&idx| (experiments[idx].score / 1024.0).max(0.0).floor() as u64)
        .collect();
    let total: u64 = shares.iter().sum();
    if total == 0 {
        // Every score scales to zero shares; fall back to a uniform draw.
        return breeders[rng.gen_range(0..breeders.len())];
    }
    let mut ticket = rng.gen_range(0..total);
    for (pos, &share) in shares.iter().enumerate() {
        if ticket < share {
            return breeders[pos];
        }
        ticket -= share;
    }
    breeders[breeders.len() - 1]
}
