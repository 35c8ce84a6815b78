//! Input file parsing
//!
//! Three whitespace-separated text formats feed the simulator:
//!
//! - downloads: `<start_sec> <end_sec> <client>`
//! - relays: `<name> <capacity_bytes_per_sec>`
//! - circuits: `<guard> <middle> <exit> [client [start_sec [end_sec]]]`
//!
//! Blank lines are ignored. Malformed lines are warned about and skipped;
//! only failing to read the file at all is fatal.

use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{CircuitSpec, DownloadSpec, Relay};

/// Convert input seconds to the internal millisecond tick axis at
/// decisecond resolution: `tick = trunc(seconds * 10) * 100`.
fn to_tick(seconds: f64) -> i64 {
    (seconds * 10.0).trunc() as i64 * 100
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents.lines().map(str::to_owned).collect())
}

/// Parse a downloads file into specs, skipping malformed lines
pub fn read_downloads(path: &Path) -> Result<Vec<DownloadSpec>> {
    let mut downloads = Vec::new();
    for line in read_lines(path)? {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let parsed = match fields.as_slice() {
            [start, end, client, ..] => start
                .parse::<f64>()
                .and_then(|s| end.parse::<f64>().map(|e| (s, e, *client)))
                .ok(),
            _ => None,
        };
        let Some((start, end, client)) = parsed else {
            warn!(line = %line, "missing start time, stop time, or client hostname");
            continue;
        };
        downloads.push(DownloadSpec::new(client, to_tick(start), to_tick(end)));
    }
    Ok(downloads)
}

/// Parse a relays file, skipping malformed lines
pub fn read_relays(path: &Path) -> Result<Vec<Relay>> {
    let mut relays = Vec::new();
    for line in read_lines(path)? {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let parsed = match fields.as_slice() {
            [name, capacity, ..] => capacity.parse::<u64>().ok().map(|c| (*name, c)),
            _ => None,
        };
        let Some((name, capacity)) = parsed else {
            warn!(line = %line, "no relay and bandwidth");
            continue;
        };
        relays.push(Relay::new(name, capacity));
    }
    Ok(relays)
}

/// Parse a circuits file, skipping malformed lines.
///
/// The optional trailing fields scope a circuit to one client and a time
/// window (in seconds, converted to milliseconds; zero leaves that side
/// open).
pub fn read_circuits(path: &Path) -> Result<Vec<CircuitSpec>> {
    let mut circuits = Vec::new();
    for line in read_lines(path)? {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 3 {
            warn!(line = %line, "missing guard, middle, or exit");
            continue;
        }

        let window_start = match fields.get(4).map(|s| s.parse::<f64>()) {
            Some(Ok(seconds)) => (seconds * 1_000.0) as i64,
            Some(Err(_)) => {
                warn!(line = %line, "unparsable circuit window start");
                continue;
            }
            None => 0,
        };
        let window_end = match fields.get(5).map(|s| s.parse::<f64>()) {
            Some(Ok(seconds)) => (seconds * 1_000.0) as i64,
            Some(Err(_)) => {
                warn!(line = %line, "unparsable circuit window end");
                continue;
            }
            None => 0,
        };

        circuits.push(CircuitSpec {
            guard: fields[0].to_owned(),
            middle: fields[1].to_owned(),
            exit: fields[2].to_owned(),
            client: fields.get(3).map(|c| (*c).to_owned()),
            window_start,
            window_end,
        });
    }
    Ok(circuits)
}
