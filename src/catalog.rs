//! Catalog of relays, downloads, circuits, and candidate pools
//!
//! The catalog owns every entity for the duration of a run and hands out
//! dense handles into its tables. Candidate pools are built once during
//! assembly and are immutable afterwards; pool 0 is the global pool shared
//! by every download that has no client-scoped circuits of its own.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{
    CandidatePool, Circuit, CircuitId, CircuitScope, CircuitSpec, Download, DownloadId,
    DownloadSpec, PoolId, Relay, RelayId,
};

/// Where the candidate-circuit universe comes from
#[derive(Clone, Debug)]
pub enum CircuitSource {
    /// Every 3-subset of the relay set with an exit member
    Full,
    /// Capacity-greedy bundling without the O(n³) blow-up
    Pruned,
    /// An explicit list, typically parsed from a circuits file
    Listed(Vec<CircuitSpec>),
}

/// Owns relays, downloads, circuits, and candidate pools
#[derive(Clone, Debug)]
pub struct Catalog {
    relays: Vec<Relay>,
    circuits: Vec<Circuit>,
    downloads: Vec<Download>,
    pools: Vec<CandidatePool>,
}

impl Catalog {
    /// Assemble a catalog from relays, download specs, and a circuit source.
    ///
    /// Downloads with `start_time > end_time` are warned about and dropped.
    /// Listed circuits referencing unknown relays are warned about and
    /// dropped. Client-scoped circuits are filtered into the pools of that
    /// client's downloads whose interval lies within the scope window; all
    /// other downloads share the global pool.
    pub fn assemble(
        relays: Vec<Relay>,
        downloads: Vec<DownloadSpec>,
        source: CircuitSource,
    ) -> Result<Self> {
        let (relays, relays_by_name) = dedup_relays(relays);

        let circuits = match source {
            CircuitSource::Full => build_full_universe(&relays),
            CircuitSource::Pruned => build_pruned_universe(&relays),
            CircuitSource::Listed(specs) => resolve_listed(specs, &relays, &relays_by_name),
        };
        if circuits.is_empty() {
            return Err(Error::Catalog(
                "no usable circuits (does the relay set contain an exit?)".into(),
            ));
        }

        let downloads: Vec<DownloadSpec> = downloads
            .into_iter()
            .filter(|spec| {
                if spec.start_time > spec.end_time {
                    warn!(
                        client = %spec.client,
                        start = spec.start_time,
                        end = spec.end_time,
                        "download ends before it starts, skipping"
                    );
                    false
                } else {
                    true
                }
            })
            .collect();

        // Global pool: every unscoped circuit, in construction order.
        let global: Vec<CircuitId> = circuits
            .iter()
            .enumerate()
            .filter(|(_, circuit)| circuit.scope.is_none())
            .map(|(idx, _)| CircuitId::new(idx as u32))
            .collect();

        // Scoped circuits feed the pools of the downloads they cover.
        let mut scoped: HashMap<usize, Vec<CircuitId>> = HashMap::new();
        for (idx, circuit) in circuits.iter().enumerate() {
            let Some(scope) = &circuit.scope else {
                continue;
            };
            let mut matched_client = false;
            for (download_idx, spec) in downloads.iter().enumerate() {
                if spec.client != scope.client {
                    continue;
                }
                matched_client = true;
                if scope.covers(spec.start_time, spec.end_time) {
                    scoped
                        .entry(download_idx)
                        .or_default()
                        .push(CircuitId::new(idx as u32));
                }
            }
            if !matched_client {
                warn!(client = %scope.client, "no downloads for client, dropping scoped circuit");
            }
        }

        let mut pools = vec![CandidatePool {
            circuits: global,
            weighted: Vec::new(),
        }];
        let mut catalog_downloads = Vec::with_capacity(downloads.len());
        for (download_idx, spec) in downloads.into_iter().enumerate() {
            let pool = match scoped.remove(&download_idx) {
                Some(candidates) if !candidates.is_empty() => {
                    let id = PoolId::new(pools.len() as u32);
                    pools.push(CandidatePool {
                        circuits: candidates,
                        weighted: Vec::new(),
                    });
                    id
                }
                _ => {
                    debug!(client = %spec.client, "download uses the global circuit pool");
                    PoolId::new(0)
                }
            };
            catalog_downloads.push(Download {
                client: spec.client,
                start_time: spec.start_time,
                end_time: spec.end_time,
                pool,
            });
        }

        if pools[0].circuits.is_empty()
            && catalog_downloads.iter().any(|d| d.pool == PoolId::new(0))
        {
            return Err(Error::Catalog(
                "global candidate pool is empty but some downloads depend on it".into(),
            ));
        }

        for pool in &mut pools {
            pool.weighted = weighted_view(&pool.circuits, &circuits);
        }

        Ok(Self {
            relays,
            circuits,
            downloads: catalog_downloads,
            pools,
        })
    }

    /// All relays in handle order
    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    /// Number of relays
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Look up a relay by handle
    pub fn relay(&self, id: RelayId) -> &Relay {
        &self.relays[id.index()]
    }

    /// All circuits in handle order
    pub fn circuits(&self) -> &[Circuit] {
        &self.circuits
    }

    /// Number of circuits in the universe
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    /// Look up a circuit by handle
    pub fn circuit(&self, id: CircuitId) -> &Circuit {
        &self.circuits[id.index()]
    }

    /// All downloads in handle order
    pub fn downloads(&self) -> &[Download] {
        &self.downloads
    }

    /// Number of downloads
    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }

    /// Look up a download by handle
    pub fn download(&self, id: DownloadId) -> &Download {
        &self.downloads[id.index()]
    }

    /// Iterate all download handles in order
    pub fn download_ids(&self) -> impl Iterator<Item = DownloadId> + '_ {
        (0..self.downloads.len() as u32).map(DownloadId::new)
    }

    /// The candidate pool a download draws from
    pub fn pool_of(&self, id: DownloadId) -> &CandidatePool {
        &self.pools[self.download(id).pool.index()]
    }

    /// The ordered candidate circuits of a download
    pub fn candidates(&self, id: DownloadId) -> &[CircuitId] {
        &self.pool_of(id).circuits
    }

    /// The bandwidth-weighted candidate view of a download
    pub fn weighted_candidates(&self, id: DownloadId) -> &[CircuitId] {
        &self.pool_of(id).weighted
    }

    /// The names of a circuit's relays in hop order, for logs and reports
    pub fn circuit_names(&self, id: CircuitId) -> (&str, &str, &str) {
        let circuit = self.circuit(id);
        (
            self.relay(circuit.guard).name.as_str(),
            self.relay(circuit.middle).name.as_str(),
            self.relay(circuit.exit).name.as_str(),
        )
    }
}

/// Merge duplicate relay names, keeping the last capacity seen
fn dedup_relays(relays: Vec<Relay>) -> (Vec<Relay>, HashMap<String, RelayId>) {
    let mut out: Vec<Relay> = Vec::with_capacity(relays.len());
    let mut by_name: HashMap<String, RelayId> = HashMap::with_capacity(relays.len());
    for relay in relays {
        match by_name.get(&relay.name) {
            Some(&id) => {
                warn!(relay = %relay.name, "duplicate relay, keeping the later capacity");
                out[id.index()].capacity = relay.capacity;
            }
            None => {
                by_name.insert(relay.name.clone(), RelayId::new(out.len() as u32));
                out.push(relay);
            }
        }
    }
    (out, by_name)
}

/// Rotate a relay triple so an exit-named relay lands in the exit slot.
///
/// Preference order is the last member first, matching the enumeration
/// order of the subset builders. Returns None when no member is an exit.
fn orient_triple(
    relays: &[Relay],
    first: RelayId,
    second: RelayId,
    third: RelayId,
) -> Option<(RelayId, RelayId, RelayId)> {
    if relays[third.index()].is_exit() {
        Some((first, second, third))
    } else if relays[second.index()].is_exit() {
        Some((first, third, second))
    } else if relays[first.index()].is_exit() {
        Some((second, third, first))
    } else {
        None
    }
}

/// Enumerate every unordered 3-subset of the relay set that contains an exit
fn build_full_universe(relays: &[Relay]) -> Vec<Circuit> {
    let n = relays.len();
    let mut circuits = Vec::new();
    for i in 0..n.saturating_sub(2) {
        for j in (i + 1)..(n - 1) {
            for k in (j + 1)..n {
                let (a, b, c) = (
                    RelayId::new(i as u32),
                    RelayId::new(j as u32),
                    RelayId::new(k as u32),
                );
                let Some((guard, middle, exit)) = orient_triple(relays, a, b, c) else {
                    continue;
                };
                let bandwidth = relays[i]
                    .capacity
                    .min(relays[j].capacity)
                    .min(relays[k].capacity);
                circuits.push(Circuit {
                    guard,
                    middle,
                    exit,
                    bandwidth,
                    scope: None,
                });
            }
        }
    }
    circuits
}

/// Capacity-greedy bundling: repeatedly combine the two highest-capacity
/// relays with an exit, charging each circuit's bandwidth against all three.
fn build_pruned_universe(relays: &[Relay]) -> Vec<Circuit> {
    let mut remaining: Vec<(RelayId, u64)> = relays
        .iter()
        .enumerate()
        .map(|(idx, relay)| (RelayId::new(idx as u32), relay.capacity))
        .collect();

    let mut circuits = Vec::new();
    while remaining.len() >= 3 {
        remaining.sort_by(|a, b| b.1.cmp(&a.1));

        let (first, bw1) = remaining.remove(0);
        let (second, bw2) = remaining.remove(0);

        let third = if relays[first.index()].is_exit() || relays[second.index()].is_exit() {
            Some(remaining.remove(0))
        } else {
            remaining
                .iter()
                .position(|(id, _)| relays[id.index()].is_exit())
                .map(|pos| remaining.remove(pos))
        };
        let Some((third, bw3)) = third else {
            break;
        };

        let bandwidth = bw1.min(bw2).min(bw3);
        match orient_triple(relays, first, second, third) {
            Some((guard, middle, exit)) => circuits.push(Circuit {
                guard,
                middle,
                exit,
                bandwidth,
                scope: None,
            }),
            None => warn!(
                first = %relays[first.index()].name,
                second = %relays[second.index()].name,
                third = %relays[third.index()].name,
                "expected an exit in the bundle, none found"
            ),
        }
    }
    circuits
}

/// Resolve listed circuit specs against the relay table
fn resolve_listed(
    specs: Vec<CircuitSpec>,
    relays: &[Relay],
    by_name: &HashMap<String, RelayId>,
) -> Vec<Circuit> {
    let mut circuits = Vec::with_capacity(specs.len());
    for spec in specs {
        let (Some(&guard), Some(&middle), Some(&exit)) = (
            by_name.get(&spec.guard),
            by_name.get(&spec.middle),
            by_name.get(&spec.exit),
        ) else {
            warn!(
                guard = %spec.guard,
                middle = %spec.middle,
                exit = %spec.exit,
                "circuit references unknown relays, skipping"
            );
            continue;
        };
        let bandwidth = relays[guard.index()]
            .capacity
            .min(relays[middle.index()].capacity)
            .min(relays[exit.index()].capacity);
        circuits.push(Circuit {
            guard,
            middle,
            exit,
            bandwidth,
            scope: spec.client.map(|client| CircuitScope {
                client,
                window_start: spec.window_start,
                window_end: spec.window_end,
            }),
        });
    }
    circuits
}

/// Repeat each circuit `max(ceil(bandwidth / 1024), 1)` times, in order
fn weighted_view(pool: &[CircuitId], circuits: &[Circuit]) -> Vec<CircuitId> {
    let mut weighted = Vec::new();
    for &id in pool {
        let replicas = (circuits[id.index()].bandwidth.div_ceil(1024)).max(1) as usize;
        weighted.extend(std::iter::repeat_n(id, replicas));
    }
    weighted
}
