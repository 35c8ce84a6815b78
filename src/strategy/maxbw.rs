//! Whole-universe steady-state upper bound
//!
//! Places every circuit in the universe as its own co-active download and
//! reports the resulting steady-state total. This bounds the instantaneous
//! throughput any assignment could reach if every candidate circuit were
//! used simultaneously.

use std::collections::BTreeSet;

use tracing::info;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::evaluator::{Collect, solve};
use crate::types::{Assignment, CircuitId, DownloadId};

/// Estimate the maximum instantaneous bandwidth of the network.
///
/// The synthetic downloads exist only inside this call; the solver never
/// consults the catalog's download table, only relay capacities and the
/// circuit each handle is mapped to.
pub fn run(catalog: &Catalog) -> Result<f64> {
    let circuit_count = catalog.circuit_count();
    let mut assignment = Assignment::new(circuit_count);
    let mut active: BTreeSet<DownloadId> = BTreeSet::new();
    for idx in 0..circuit_count as u32 {
        assignment.assign(DownloadId::new(idx), CircuitId::new(idx));
        active.insert(DownloadId::new(idx));
    }

    let report = solve(catalog, &active, &assignment, Collect::default())?;
    info!(
        circuits = circuit_count,
        maximum = report.total,
        "maximum bandwidth estimate"
    );
    Ok(report.total)
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

    #[test]
    fn disjoint_circuits_sum_their_minima() {
        let relays = vec![
            Relay::new("g1", 500),
            Relay::new("m1", 400),
            Relay::new("e1exit", 300),
            Relay::new("g2", 80),
            Relay::new("m2", 90),
            Relay::new("e2exit", 100),
        ];
        let catalog = Catalog::assemble(
            relays,
            vec![DownloadSpec::new("c1", 0, 1_000)],
            CircuitSource::Listed(vec![
                spec("g1", "m1", "e1exit"),
                spec("g2", "m2", "e2exit"),
            ]),
        )
        .unwrap();
        let maximum = run(&catalog).unwrap();
        assert!((maximum - 380.0).abs() < 1e-9, "300 + 80, got {maximum}");
    }

    #[test]
    fn estimate_never_exceeds_total_exit_capacity() {
        let relays = vec![
            Relay::new("g", 1_000),
            Relay::new("m", 800),
            Relay::new("fastexit", 600),
            Relay::new("slowexit", 200),
        ];
        let exit_capacity: u64 = relays
            .iter()
            .filter(|r| r.is_exit())
            .map(|r| r.capacity)
            .sum();
        let catalog = Catalog::assemble(
            relays,
            vec![DownloadSpec::new("c1", 0, 1_000)],
            CircuitSource::Full,
        )
        .unwrap();
        let maximum = run(&catalog).unwrap();
        // Every synthetic download drains through some exit, so the total
        // cannot exceed the combined exit capacity.
        assert!(maximum <= exit_capacity as f64 + 1e-9);
        assert!(maximum > 0.0);
    }
}
