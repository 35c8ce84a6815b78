//! Tick axis derived from download start/end times
//!
//! Ticks are the sorted, deduplicated union of every download's start and
//! end time. The index maps each tick to the downloads that start or end
//! there; the evaluator walks ticks in order and maintains its active set
//! from these events. The greedy strategy folds downloads in one at a time,
//! so insertion is incremental.

use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::types::{Download, DownloadId};

/// The event ticks and the tick → downloads index
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    ticks: Vec<i64>,
    by_tick: HashMap<i64, Vec<DownloadId>>,
}

impl Timeline {
    /// Build the timeline over every download in the catalog
    pub fn new(catalog: &Catalog) -> Self {
        let mut timeline = Self::default();
        for id in catalog.download_ids() {
            timeline.insert(id, catalog.download(id));
        }
        timeline
    }

    /// Fold one download's start and end into the tick axis.
    ///
    /// A zero-length download (`start == end`) is listed once at its tick.
    pub fn insert(&mut self, id: DownloadId, download: &Download) {
        self.insert_tick(id, download.start_time);
        if download.end_time != download.start_time {
            self.insert_tick(id, download.end_time);
        }
    }

    fn insert_tick(&mut self, id: DownloadId, tick: i64) {
        if let Err(pos) = self.ticks.binary_search(&tick) {
            self.ticks.insert(pos, tick);
        }
        self.by_tick.entry(tick).or_default().push(id);
    }

    /// The ticks in ascending order
    pub fn ticks(&self) -> &[i64] {
        &self.ticks
    }

    /// The downloads that start or end at a tick
    pub fn downloads_at(&self, tick: i64) -> &[DownloadId] {
        self.by_tick.get(&tick).map_or(&[], Vec::as_slice)
    }
}
