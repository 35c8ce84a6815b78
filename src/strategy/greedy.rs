//! Greedy per-download candidate search
//!
//! Downloads are committed one at a time in a configurable order. For each
//! download, every candidate circuit is tried against the assignment built
//! so far, integrating over the ticks known at that point; the candidate
//! with the largest integrated throughput is committed. The known tick set
//! grows as each download's start and end are folded in.

use std::time::Instant;

use tracing::info;

use crate::catalog::Catalog;
use crate::config::SelectionPolicy;
use crate::error::Result;
use crate::evaluator::integrate;
use crate::timeline::Timeline;
use crate::types::{Assignment, CircuitId, DownloadId};

/// Run the greedy search and return the resulting assignment.
///
/// Ties on integrated throughput keep the earliest candidate in pool
/// order; a download whose every candidate scores zero commits its first
/// candidate.
pub fn run(catalog: &Catalog, policy: SelectionPolicy) -> Result<Assignment> {
    let mut order: Vec<DownloadId> = catalog.download_ids().collect();
    match policy {
        SelectionPolicy::Inorder => order.sort_by_key(|&id| catalog.download(id).end_time),
        SelectionPolicy::Longest => {
            order.sort_by_key(|&id| std::cmp::Reverse(catalog.download(id).duration()));
        }
        SelectionPolicy::Shortest => order.sort_by_key(|&id| catalog.download(id).duration()),
    }
    info!(policy = %policy, downloads = order.len(), "running greedy selection");

    let mut timeline = Timeline::default();
    let mut assignment = Assignment::new(catalog.download_count());

    let started = Instant::now();
    let mut recent = [0.0_f64; 10];
    let mut recent_idx = 0;
    let mut last_elapsed = 0.0;

    for (n, &id) in order.iter().enumerate() {
        let download = catalog.download(id);
        timeline.insert(id, download);

        let mut best: Option<(CircuitId, f64)> = None;
        for &candidate in catalog.candidates(id) {
            assignment.assign(id, candidate);
            let fitness = integrate(catalog, &timeline, &assignment)?;
            if best.is_none_or(|(_, score)| fitness > score) {
                best = Some((candidate, fitness));
            }
        }
        let Some((choice, score)) = best else {
            continue; // pools are never empty after catalog assembly
        };
        assignment.assign(id, choice);

        // Rolling estimate of time remaining over the last ten selections
        let elapsed = started.elapsed().as_secs_f64();
        recent[recent_idx] = elapsed - last_elapsed;
        last_elapsed = elapsed;
        recent_idx = (recent_idx + 1) % recent.len();
        let per_download = recent.iter().sum::<f64>() / recent.len() as f64;
        let seconds_left = (order.len() - n - 1) as f64 * per_download;

        let (guard, middle, exit) = catalog.circuit_names(choice);
        info!(
            progress = %format!("{}/{}", n + 1, order.len()),
            client = %download.client,
            guard,
            middle,
            exit,
            fitness = score,
            start = download.start_time as f64 / 1000.0,
            end = download.end_time as f64 / 1000.0,
            seconds_left,
            "selected circuit"
        );
    }

    Ok(assignment)
}
