//! Core types for circuit-sched
//!
//! Relays, circuits, and downloads are referenced everywhere by dense
//! integer handles assigned at catalog construction. Handles double as
//! vector indices, which keeps the inner solver loops allocation-free and
//! makes assignment maps cheap to clone for the genetic population.

use serde::{Deserialize, Serialize};

/// Name substring identifying exit relays
///
/// A relay is an exit if and only if its name contains this substring; the
/// name is the sole classification signal.
pub const EXIT_MARKER: &str = "exit";

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Create a new handle
            pub fn new(id: u32) -> Self {
                Self(id)
            }

            /// Get the inner u32 value
            pub fn get(&self) -> u32 {
                self.0
            }

            /// The handle as a vector index
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(id: u32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(
    /// Unique identifier for a relay
    RelayId
);
handle_type!(
    /// Unique identifier for a circuit
    CircuitId
);
handle_type!(
    /// Unique identifier for a download
    DownloadId
);
handle_type!(
    /// Unique identifier for a candidate pool
    PoolId
);

/// A forwarding node with a fixed byte/second capacity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    /// Relay name; exits are recognised by the `exit` substring
    pub name: String,
    /// Advertised capacity in bytes per second
    pub capacity: u64,
}

impl Relay {
    /// Create a new relay
    pub fn new(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }

    /// Whether this relay may serve as the exit hop of a circuit
    pub fn is_exit(&self) -> bool {
        self.name.contains(EXIT_MARKER)
    }
}

/// Client/time scope restricting which downloads may use a circuit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircuitScope {
    /// The client whose downloads may use the circuit
    pub client: String,
    /// Window start in milliseconds; 0 means open on this side
    pub window_start: i64,
    /// Window end in milliseconds; 0 means open on this side
    pub window_end: i64,
}

impl CircuitScope {
    /// Whether a download interval `[start, end]` lies within the window
    pub fn covers(&self, start: i64, end: i64) -> bool {
        (self.window_start == 0 || self.window_start <= start)
            && (self.window_end == 0 || self.window_end >= end)
    }
}

/// An ordered triple (guard, middle, exit) of relays
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// Guard (entry) relay
    pub guard: RelayId,
    /// Middle relay
    pub middle: RelayId,
    /// Exit relay; its name always satisfies the exit predicate for circuits
    /// produced by the universe builders
    pub exit: RelayId,
    /// Precomputed `min(capacity)` over the three relays, bytes per second
    pub bandwidth: u64,
    /// Optional client/time scope
    pub scope: Option<CircuitScope>,
}

impl Circuit {
    /// The three relays in hop order
    pub fn relays(&self) -> [RelayId; 3] {
        [self.guard, self.middle, self.exit]
    }
}

/// A timed byte-transfer demand bound to a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Download {
    /// The client issuing the download
    pub client: String,
    /// Start tick in milliseconds
    pub start_time: i64,
    /// End tick in milliseconds; always `>= start_time`
    pub end_time: i64,
    /// The candidate pool this download draws circuits from
    pub pool: PoolId,
}

impl Download {
    /// Download duration in milliseconds
    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }
}

/// A download read from an input file, before catalog assembly
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadSpec {
    /// The client issuing the download
    pub client: String,
    /// Start tick in milliseconds
    pub start_time: i64,
    /// End tick in milliseconds
    pub end_time: i64,
}

impl DownloadSpec {
    /// Create a new download spec
    pub fn new(client: impl Into<String>, start_time: i64, end_time: i64) -> Self {
        Self {
            client: client.into(),
            start_time,
            end_time,
        }
    }
}

/// A circuit read from an input file, before relay names are resolved
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircuitSpec {
    /// Guard relay name
    pub guard: String,
    /// Middle relay name
    pub middle: String,
    /// Exit relay name
    pub exit: String,
    /// Optional client the circuit is scoped to
    pub client: Option<String>,
    /// Scope window start in milliseconds; 0 = open
    pub window_start: i64,
    /// Scope window end in milliseconds; 0 = open
    pub window_end: i64,
}

/// An ordered set of candidate circuits eligible for some downloads
///
/// Pools are immutable after catalog assembly and shared by handle; pool 0
/// is always the global pool. The weighted view repeats each candidate
/// `max(ceil(bandwidth / 1024), 1)` times, preserving the original order,
/// and is used for bandwidth-proportional sampling.
#[derive(Clone, Debug, Default)]
pub struct CandidatePool {
    /// The candidates in order
    pub circuits: Vec<CircuitId>,
    /// Bandwidth-weighted view of `circuits`
    pub weighted: Vec<CircuitId>,
}

impl CandidatePool {
    /// Number of candidates in the pool
    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    /// Whether the pool has no candidates
    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}

/// A mapping from downloads to their chosen circuits
///
/// Stored densely by download handle. Entries start out unassigned; the
/// greedy and DWC strategies fill them in one download at a time, the
/// genetic strategy assigns every download up front.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    slots: Vec<Option<CircuitId>>,
}

impl Assignment {
    /// Create an assignment with `len` unassigned slots
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Number of slots (assigned or not)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the assignment has no slots at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record the circuit chosen for a download
    pub fn assign(&mut self, download: DownloadId, circuit: CircuitId) {
        self.slots[download.index()] = Some(circuit);
    }

    /// The circuit chosen for a download, if any
    pub fn get(&self, download: DownloadId) -> Option<CircuitId> {
        self.slots.get(download.index()).copied().flatten()
    }

    /// Number of downloads that have a circuit chosen
    pub fn assigned_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
