//! Best-assignment snapshot and per-client output files
//!
//! The genetic strategy snapshots its best assignment once per round to
//! `<out>/round<K>.txt` (one line per download); DWC writes one
//! `<out>/<client>.txt` per client when it finishes. Times are printed in
//! seconds. Downloads without a chosen circuit are warned about and
//! skipped; I/O failures are fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::types::Assignment;

/// Create the output directory if it does not exist yet
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| Error::WriteFile {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| Error::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Write one round's best assignment to `<dir>/round<K>.txt`.
///
/// Each line holds `client start_sec end_sec guard middle exit`. Returns
/// the path written.
pub fn write_round_snapshot(
    catalog: &Catalog,
    assignment: &Assignment,
    dir: &Path,
    round: u64,
) -> Result<PathBuf> {
    let mut contents = String::new();
    for id in catalog.download_ids() {
        let download = catalog.download(id);
        let Some(circuit) = assignment.get(id) else {
            warn!(
                client = %download.client,
                start = download.start_time as f64 / 1000.0,
                "no circuit selected for download"
            );
            continue;
        };
        let (guard, middle, exit) = catalog.circuit_names(circuit);
        contents.push_str(&format!(
            "{} {:.6} {:.6} {} {} {}\n",
            download.client,
            download.start_time as f64 / 1000.0,
            download.end_time as f64 / 1000.0,
            guard,
            middle,
            exit
        ));
    }

    let path = dir.join(format!("round{round}.txt"));
    write_file(&path, &contents)?;
    Ok(path)
}

/// Write the final assignment partitioned by client: one
/// `<dir>/<client>.txt` per client with lines `start_sec guard,middle,exit`.
pub fn write_client_files(catalog: &Catalog, assignment: &Assignment, dir: &Path) -> Result<()> {
    let mut by_client: HashMap<&str, String> = HashMap::new();
    for id in catalog.download_ids() {
        let download = catalog.download(id);
        let buffer = by_client.entry(download.client.as_str()).or_default();
        let Some(circuit) = assignment.get(id) else {
            warn!(
                client = %download.client,
                start = download.start_time as f64 / 1000.0,
                "no circuit selected for download"
            );
            continue;
        };
        let (guard, middle, exit) = catalog.circuit_names(circuit);
        buffer.push_str(&format!(
            "{:.6} {},{},{}\n",
            download.start_time as f64 / 1000.0,
            guard,
            middle,
            exit
        ));
    }

    for (client, contents) in by_client {
        write_file(&dir.join(format!("{client}.txt")), &contents)?;
    }
    Ok(())
}
