//! # circuit-sched
//!
//! Offline circuit-assignment simulator for onion-routed anonymity networks.
//!
//! Given a set of relays with advertised capacities, a set of timed downloads
//! bound to clients, and a universe of candidate circuits (guard, middle,
//! exit), the simulator picks one circuit per download so as to maximise the
//! aggregate bytes transferred, under max-min fair sharing of each relay's
//! capacity among the downloads whose circuits touch it.
//!
//! ## Design Philosophy
//!
//! - **Pure evaluation** - the bandwidth solver returns a report instead of
//!   mutating shared state, so independent assignments can be scored in
//!   parallel
//! - **Handle-keyed** - relays, circuits, and downloads are referenced by
//!   dense integer handles assigned at catalog construction
//! - **Graceful on user data** - malformed input lines are warned about and
//!   skipped; algorithmic invariant violations abort the run
//!
//! ## Quick Start
//!
//! ```no_run
//! use circuit_sched::{Catalog, CircuitSource, DownloadSpec, Relay, strategy};
//!
//! fn main() -> circuit_sched::Result<()> {
//!     let relays = vec![
//!         Relay::new("guard1", 1_024_000),
//!         Relay::new("middle1", 2_048_000),
//!         Relay::new("fastexit1", 512_000),
//!     ];
//!     let downloads = vec![DownloadSpec::new("client1", 0, 30_000)];
//!     let catalog = Catalog::assemble(relays, downloads, CircuitSource::Full)?;
//!
//!     let assignment = strategy::dwc::run(&catalog, 4)?;
//!     println!("{} downloads assigned", assignment.assigned_count());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Catalog of relays, downloads, circuits, and candidate pools
pub mod catalog;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Max-min fair bandwidth evaluation
pub mod evaluator;
/// Input file parsing
pub mod input;
/// Best-assignment snapshot and per-client output files
pub mod report;
/// Assignment strategies (genetic, greedy, DWC, maxbw)
pub mod strategy;
/// Tick axis derived from download start/end times
pub mod timeline;
/// Core types and handles
pub mod types;

// Re-export commonly used types
pub use catalog::{Catalog, CircuitSource};
pub use config::{GeneticConfig, GreedyConfig, Mode, SelectionPolicy, SimConfig};
pub use error::{Error, Result, SolverError};
pub use evaluator::{Allocation, Collect, SolveReport, integrate, solve};
pub use timeline::Timeline;
pub use types::{
    Assignment, CandidatePool, Circuit, CircuitId, CircuitScope, CircuitSpec, Download,
    DownloadId, DownloadSpec, PoolId, Relay, RelayId,
};
