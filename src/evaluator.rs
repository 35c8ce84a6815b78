//! Max-min fair bandwidth evaluation
//!
//! Two layers shared by every strategy: [`solve`] computes the steady-state
//! per-download throughput of a fixed active set under progressive filling
//! (water-filling) of relay capacity, and [`integrate`] walks the timeline,
//! multiplying each interval's steady-state total by its duration.
//!
//! The solver is pure: results come back in a [`SolveReport`] keyed by
//! download handle, so independent assignments can be scored concurrently
//! against the same catalog.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::{Result, SolverError};
use crate::timeline::Timeline;
use crate::types::{Assignment, DownloadId, RelayId};

/// Residual capacity below which a relay is considered drained
pub const RESIDUAL_EPSILON: f64 = 1e-6;

/// Which optional side outputs a solve should produce
#[derive(Clone, Copy, Debug, Default)]
pub struct Collect {
    /// Record per-relay congestion weights at bottleneck time
    pub weights: bool,
    /// Record surviving/untouched per-relay capacity
    pub available: bool,
}

impl Collect {
    /// Request both congestion weights and surviving capacity
    pub fn all() -> Self {
        Self {
            weights: true,
            available: true,
        }
    }
}

/// Throughput granted to one download by a steady-state solve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Allocation {
    /// Bytes per second granted to the download
    pub bandwidth: f64,
    /// The relay that constrained it
    pub bottleneck: RelayId,
}

/// Result of one steady-state solve
#[derive(Clone, Debug, Default)]
pub struct SolveReport {
    /// Sum of all granted per-download bandwidths
    pub total: f64,
    /// Per-download throughput and bottleneck
    pub allocations: HashMap<DownloadId, Allocation>,
    /// Congestion intensity (`load / share`) per bottleneck relay; relays
    /// that never became a bottleneck have no entry
    pub weights: HashMap<RelayId, f64>,
    /// Untouched capacity of relays outside the active set, and surviving
    /// residual of active relays that were never chosen as bottleneck;
    /// drained relays have no entry
    pub available: HashMap<RelayId, f64>,
}

/// Compute the max-min fair steady state for a fixed active set.
///
/// Every download consumes equally from the three relays of its assigned
/// circuit. Each iteration freezes the relay with the smallest per-download
/// share (ties broken by ascending relay handle) together with every
/// download touching it, so the loop terminates after at most
/// `min(active downloads, active relays)` rounds.
///
/// Fails with [`SolverError`] if a download in `active` has no assignment,
/// or if the chosen bottleneck is not fully drained afterwards; both
/// indicate a defect rather than bad user input.
pub fn solve(
    catalog: &Catalog,
    active: &BTreeSet<DownloadId>,
    assignment: &Assignment,
    collect: Collect,
) -> Result<SolveReport> {
    let relay_count = catalog.relay_count();
    let mut residual = vec![0.0_f64; relay_count];
    let mut alive = vec![false; relay_count];
    let mut ever_active = vec![false; relay_count];
    let mut touching: Vec<Vec<DownloadId>> = vec![Vec::new(); relay_count];
    let mut alive_relays = 0_usize;
    let mut loaded_relays = 0_usize;

    for &download in active {
        let circuit = assignment
            .get(download)
            .ok_or(SolverError::Unassigned { download })?;
        let hops = catalog.circuit(circuit).relays();
        for (slot, &relay) in hops.iter().enumerate() {
            if hops[..slot].contains(&relay) {
                continue;
            }
            let idx = relay.index();
            if touching[idx].is_empty() {
                loaded_relays += 1;
            }
            touching[idx].push(download);
            if !alive[idx] {
                alive[idx] = true;
                ever_active[idx] = true;
                residual[idx] = catalog.relay(relay).capacity as f64;
                alive_relays += 1;
            }
        }
    }

    let mut report = SolveReport::default();

    while alive_relays > 0 && loaded_relays > 0 {
        // Find the choke point: the active relay with the smallest
        // per-download share.
        let mut bottleneck: Option<(usize, f64)> = None;
        for idx in 0..relay_count {
            if !alive[idx] || touching[idx].is_empty() {
                continue;
            }
            if residual[idx] == 0.0 {
                warn!(
                    relay = %catalog.relays()[idx].name,
                    "relay with zero residual still in the active set"
                );
                continue;
            }
            let share = residual[idx] / touching[idx].len() as f64;
            if bottleneck.is_none_or(|(_, best)| share < best) {
                bottleneck = Some((idx, share));
            }
        }
        let Some((bottleneck_idx, share)) = bottleneck else {
            return Err(SolverError::NoBottleneck {
                active: alive_relays,
            }
            .into());
        };
        let bottleneck_relay = RelayId::new(bottleneck_idx as u32);
        let load = touching[bottleneck_idx].len();

        // Snap the residual so the drain below lands exactly on zero.
        residual[bottleneck_idx] = share * load as f64;
        if collect.weights {
            report
                .weights
                .insert(bottleneck_relay, load as f64 / share);
        }

        let frozen = std::mem::take(&mut touching[bottleneck_idx]);
        loaded_relays -= 1;

        for &download in &frozen {
            let circuit = assignment
                .get(download)
                .ok_or(SolverError::Unassigned { download })?;
            let hops = catalog.circuit(circuit).relays();

            report.total += share;
            report.allocations.insert(
                download,
                Allocation {
                    bandwidth: share,
                    bottleneck: bottleneck_relay,
                },
            );

            for &relay in &hops {
                let idx = relay.index();
                residual[idx] -= share;
                if alive[idx] && residual[idx] < RESIDUAL_EPSILON {
                    alive[idx] = false;
                    alive_relays -= 1;
                }
            }
            for (slot, &relay) in hops.iter().enumerate() {
                if hops[..slot].contains(&relay) {
                    continue;
                }
                let idx = relay.index();
                if idx == bottleneck_idx {
                    continue;
                }
                if let Some(pos) = touching[idx].iter().position(|&d| d == download) {
                    touching[idx].swap_remove(pos);
                    if touching[idx].is_empty() {
                        loaded_relays -= 1;
                    }
                }
            }
        }

        // The bottleneck must now be fully drained with no downloads left.
        if alive[bottleneck_idx] {
            return Err(SolverError::ResidualRemains {
                relay: catalog.relay(bottleneck_relay).name.clone(),
                residual: residual[bottleneck_idx],
            }
            .into());
        }
        if !touching[bottleneck_idx].is_empty() {
            return Err(SolverError::DownloadsRemain {
                relay: catalog.relay(bottleneck_relay).name.clone(),
            }
            .into());
        }
    }

    if collect.available {
        for idx in 0..relay_count {
            if !ever_active[idx] {
                report.available.insert(
                    RelayId::new(idx as u32),
                    catalog.relays()[idx].capacity as f64,
                );
            } else if alive[idx] {
                report
                    .available
                    .insert(RelayId::new(idx as u32), residual[idx]);
            }
        }
    }

    Ok(report)
}

/// Integrate an assignment's throughput over the timeline.
///
/// Between consecutive ticks the active set is constant, so each interval
/// contributes `steady-state total × Δt / 1000`. Downloads without an
/// assignment entry are silently skipped, which permits the partial
/// assignments built up by the greedy strategy. The return value is the
/// assignment's fitness in bytes.
pub fn integrate(catalog: &Catalog, timeline: &Timeline, assignment: &Assignment) -> Result<f64> {
    let mut active: BTreeSet<DownloadId> = BTreeSet::new();
    let mut total = 0.0;
    let mut previous: Option<(i64, f64)> = None;

    for &tick in timeline.ticks() {
        for &id in timeline.downloads_at(tick) {
            if assignment.get(id).is_none() {
                continue;
            }
            let download = catalog.download(id);
            if download.start_time == tick {
                active.insert(id);
            }
            if download.end_time == tick {
                active.remove(&id);
            }
        }

        let report = solve(catalog, &active, assignment, Collect::default())?;
        if let Some((last_tick, last_bandwidth)) = previous {
            total += last_bandwidth * (tick - last_tick) as f64 / 1000.0;
        }
        debug!(
            tick,
            active = active.len(),
            bandwidth = report.total,
            total,
            "steady state"
        );
        previous = Some((tick, report.total));
    }

    Ok(total)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CircuitSource;
    use crate::types::{CircuitSpec, DownloadSpec, Relay};

    fn spec(guard: &str, middle: &str, exit: &str) -> CircuitSpec {
        CircuitSpec {
            guard: guard.into(),
            middle: middle.into(),
            exit: exit.into(),
            client: None,
            window_start: 0,
            window_end: 0,
        }
    }

    fn assign_all(catalog: &Catalog, choices: &[u32]) -> Assignment {
        let mut assignment = Assignment::new(catalog.download_count());
        for (idx, &circuit) in choices.iter().enumerate() {
            assignment.assign(DownloadId::new(idx as u32), crate::types::CircuitId::new(circuit));
        }
        assignment
    }

    fn active_set(ids: &[u32]) -> BTreeSet<DownloadId> {
        ids.iter().map(|&id| DownloadId::new(id)).collect()
    }

    fn relay_id(catalog: &Catalog, name: &str) -> RelayId {
        let idx = catalog
            .relays()
            .iter()
            .position(|r| r.name == name)
            .expect("relay exists");
        RelayId::new(idx as u32)
    }

    // -----------------------------------------------------------------------
    // Scenario: single bottleneck
    // -----------------------------------------------------------------------

    #[test]
    fn single_download_is_choked_by_the_smallest_relay() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![DownloadSpec::new("c1", 0, 10_000)];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0]);

        let report = solve(&catalog, &active_set(&[0]), &assignment, Collect::default()).unwrap();
        let alloc = report.allocations[&DownloadId::new(0)];
        assert!((alloc.bandwidth - 100.0).abs() < 1e-9);
        assert_eq!(alloc.bottleneck, relay_id(&catalog, "xexit"));
        assert!((report.total - 100.0).abs() < 1e-9);

        let timeline = Timeline::new(&catalog);
        let fitness = integrate(&catalog, &timeline, &assignment).unwrap();
        assert!((fitness - 1_000.0).abs() < 1e-9, "100 B/s over 10 s");
    }

    // -----------------------------------------------------------------------
    // Scenario: fair split
    // -----------------------------------------------------------------------

    #[test]
    fn two_downloads_split_the_shared_bottleneck_evenly() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 10_000),
            DownloadSpec::new("c2", 0, 10_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0, 0]);

        let report =
            solve(&catalog, &active_set(&[0, 1]), &assignment, Collect::default()).unwrap();
        for id in [0, 1] {
            let alloc = report.allocations[&DownloadId::new(id)];
            assert!((alloc.bandwidth - 50.0).abs() < 1e-9);
            // Bottleneck identity: capacity / load at selection time
            assert_eq!(alloc.bottleneck, relay_id(&catalog, "xexit"));
        }
        assert!((report.total - 100.0).abs() < 1e-9);

        let timeline = Timeline::new(&catalog);
        let fitness = integrate(&catalog, &timeline, &assignment).unwrap();
        assert!((fitness - 1_000.0).abs() < 1e-9);
    }

    // -----------------------------------------------------------------------
    // Scenario: disjoint bottlenecks
    // -----------------------------------------------------------------------

    #[test]
    fn disjoint_circuits_each_get_their_own_minimum() {
        let relays = vec![
            Relay::new("g1", 500),
            Relay::new("m1", 400),
            Relay::new("e1exit", 300),
            Relay::new("g2", 80),
            Relay::new("m2", 90),
            Relay::new("e2exit", 100),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 5_000),
            DownloadSpec::new("c2", 0, 5_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![
                spec("g1", "m1", "e1exit"),
                spec("g2", "m2", "e2exit"),
            ]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0, 1]);

        let report =
            solve(&catalog, &active_set(&[0, 1]), &assignment, Collect::default()).unwrap();
        let first = report.allocations[&DownloadId::new(0)];
        let second = report.allocations[&DownloadId::new(1)];
        assert!((first.bandwidth - 300.0).abs() < 1e-9);
        assert_eq!(first.bottleneck, relay_id(&catalog, "e1exit"));
        assert!((second.bandwidth - 80.0).abs() < 1e-9);
        assert_eq!(second.bottleneck, relay_id(&catalog, "g2"));
        assert!((report.total - 380.0).abs() < 1e-9);
    }

    // -----------------------------------------------------------------------
    // Scenario: staggered intervals
    // -----------------------------------------------------------------------

    #[test]
    fn staggered_intervals_integrate_piecewise() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 5_000),
            DownloadSpec::new("c2", 3_000, 8_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0, 0]);

        let timeline = Timeline::new(&catalog);
        let fitness = integrate(&catalog, &timeline, &assignment).unwrap();
        // [0,3): 100, [3,5): 50+50, [5,8): 100  =>  300 + 200 + 300
        assert!((fitness - 800.0).abs() < 1e-9, "got {fitness}");
    }

    // -----------------------------------------------------------------------
    // Invariants
    // -----------------------------------------------------------------------

    #[test]
    fn capacity_is_conserved_at_every_relay() {
        let relays = vec![
            Relay::new("g1", 250),
            Relay::new("m1", 180),
            Relay::new("e1exit", 120),
            Relay::new("g2", 90),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 1_000),
            DownloadSpec::new("c2", 0, 1_000),
            DownloadSpec::new("c3", 0, 1_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![
                spec("g1", "m1", "e1exit"),
                spec("g2", "m1", "e1exit"),
            ]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0, 1, 0]);

        let report =
            solve(&catalog, &active_set(&[0, 1, 2]), &assignment, Collect::default()).unwrap();

        for (idx, relay) in catalog.relays().iter().enumerate() {
            let relay_id = RelayId::new(idx as u32);
            let mut used = 0.0;
            let mut is_bottleneck_for_someone = false;
            for (&download, alloc) in &report.allocations {
                let circuit = catalog.circuit(assignment.get(download).unwrap());
                if circuit.relays().contains(&relay_id) {
                    used += alloc.bandwidth;
                    if alloc.bottleneck == relay_id {
                        is_bottleneck_for_someone = true;
                    }
                }
            }
            assert!(
                used <= relay.capacity as f64 + RESIDUAL_EPSILON,
                "relay {} oversubscribed: {used} > {}",
                relay.name,
                relay.capacity
            );
            if is_bottleneck_for_someone {
                assert!(
                    (used - relay.capacity as f64).abs() < 1e-6,
                    "bottleneck relay {} must be saturated ({used} vs {})",
                    relay.name,
                    relay.capacity
                );
            }
        }
    }

    #[test]
    fn adding_a_download_only_hurts_its_contemporaries() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 10_000),
            DownloadSpec::new("c2", 0, 10_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0, 0]);

        let alone = solve(&catalog, &active_set(&[0]), &assignment, Collect::default()).unwrap();
        let together =
            solve(&catalog, &active_set(&[0, 1]), &assignment, Collect::default()).unwrap();
        let before = alone.allocations[&DownloadId::new(0)].bandwidth;
        let after = together.allocations[&DownloadId::new(0)].bandwidth;
        assert!(
            after <= before + 1e-9,
            "concurrent arrival must not increase throughput ({before} -> {after})"
        );
    }

    // -----------------------------------------------------------------------
    // Side outputs
    // -----------------------------------------------------------------------

    #[test]
    fn weights_and_available_describe_the_congestion_picture() {
        let relays = vec![
            Relay::new("g1", 100),
            Relay::new("m1", 100),
            Relay::new("x1exit", 100),
            Relay::new("idle", 200),
        ];
        let downloads = vec![DownloadSpec::new("c1", 0, 1_000)];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g1", "m1", "x1exit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0]);

        let report = solve(&catalog, &active_set(&[0]), &assignment, Collect::all()).unwrap();

        // All three relays offer share 100; the first in handle order wins.
        let g1 = relay_id(&catalog, "g1");
        assert_eq!(report.allocations[&DownloadId::new(0)].bottleneck, g1);
        assert!((report.weights[&g1] - 0.01).abs() < 1e-12, "load/share = 1/100");
        assert!(
            !report.weights.contains_key(&relay_id(&catalog, "m1")),
            "non-bottleneck relays get no weight entry"
        );

        // The idle relay keeps its untouched capacity; the drained circuit
        // relays have no entry.
        let idle = relay_id(&catalog, "idle");
        assert!((report.available[&idle] - 200.0).abs() < 1e-9);
        assert!(!report.available.contains_key(&g1));
        assert!(!report.available.contains_key(&relay_id(&catalog, "m1")));
    }

    #[test]
    fn surviving_residual_of_unchoked_relays_is_reported() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![DownloadSpec::new("c1", 0, 1_000)];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0]);

        let report = solve(&catalog, &active_set(&[0]), &assignment, Collect::all()).unwrap();
        // g and m were active, never bottleneck, and survive with 900 each.
        assert!((report.available[&relay_id(&catalog, "g")] - 900.0).abs() < 1e-9);
        assert!((report.available[&relay_id(&catalog, "m")] - 900.0).abs() < 1e-9);
        assert!(!report.available.contains_key(&relay_id(&catalog, "xexit")));
    }

    // -----------------------------------------------------------------------
    // Degradation and errors
    // -----------------------------------------------------------------------

    #[test]
    fn unassigned_active_download_is_a_solver_error() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![DownloadSpec::new("c1", 0, 1_000)];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = Assignment::new(catalog.download_count());

        let result = solve(&catalog, &active_set(&[0]), &assignment, Collect::default());
        assert!(result.is_err());
    }

    #[test]
    fn integrate_skips_downloads_without_an_assignment() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 10_000),
            DownloadSpec::new("c2", 0, 10_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0]); // second download unassigned

        let timeline = Timeline::new(&catalog);
        let fitness = integrate(&catalog, &timeline, &assignment).unwrap();
        assert!((fitness - 1_000.0).abs() < 1e-9, "only the assigned download counts");
    }

    #[test]
    fn zero_length_download_contributes_nothing_and_does_not_linger() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![
            DownloadSpec::new("c1", 0, 10_000),
            DownloadSpec::new("c2", 5_000, 5_000),
        ];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0, 0]);

        let timeline = Timeline::new(&catalog);
        let fitness = integrate(&catalog, &timeline, &assignment).unwrap();
        // If the zero-length download lingered, [5,10) would halve to 50 B/s.
        assert!((fitness - 1_000.0).abs() < 1e-9, "got {fitness}");
    }

    #[test]
    fn empty_active_set_is_a_clean_zero() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 1_000),
            Relay::new("xexit", 100),
        ];
        let downloads = vec![DownloadSpec::new("c1", 0, 1_000)];
        let catalog = Catalog::assemble(
            relays,
            downloads,
            CircuitSource::Listed(vec![spec("g", "m", "xexit")]),
        )
        .unwrap();
        let assignment = assign_all(&catalog, &[0]);

        let report =
            solve(&catalog, &BTreeSet::new(), &assignment, Collect::all()).unwrap();
        assert_eq!(report.total, 0.0);
        assert!(report.allocations.is_empty());
        // With nothing active, every relay reports its full capacity.
        assert_eq!(report.available.len(), catalog.relay_count());
    }
}
