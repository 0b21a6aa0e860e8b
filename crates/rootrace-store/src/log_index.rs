//! In-memory entry list with by-source and by-day lookups.

use std::collections::{BTreeMap, HashMap};

use crate::types::LogEntry;

pub(crate) const MILLIS_PER_DAY: i64 = 86_400_000;

/// Floor of `epoch_ms / 86_400_000`, correct for pre-1970 instants too.
pub(crate) fn day_bucket(epoch_ms: i64) -> i64 {
    epoch_ms.div_euclid(MILLIS_PER_DAY)
}

#[derive(Debug, Default)]
pub(crate) struct LogIndex {
    entries: Vec<LogEntry>,
    by_source: HashMap<String, Vec<usize>>,
    by_day: BTreeMap<i64, Vec<usize>>,
}

impl LogIndex {
    /// Builds an index over the most recent `capacity` of `entries`.
    pub(crate) fn capped(mut entries: Vec<LogEntry>, capacity: usize) -> Self {
        if entries.len() > capacity {
            entries.drain(..entries.len() - capacity);
        }
        let mut index = Self {
            entries,
            ..Self::default()
        };
        index.rebuild();
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn push(&mut self, entry: LogEntry) {
        let position = self.entries.len();
        self.record(position, &entry);
        self.entries.push(entry);
    }

    /// Drops the oldest entries beyond `capacity`; returns how many were evicted.
    pub(crate) fn enforce_capacity(&mut self, capacity: usize) -> usize {
        if self.entries.len() <= capacity {
            return 0;
        }
        let evicted = self.entries.len() - capacity;
        self.entries.drain(..evicted);
        self.rebuild();
        evicted
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.by_source.clear();
        self.by_day.clear();
    }

    pub(crate) fn by_source(&self, source_id: &str) -> Vec<LogEntry> {
        self.by_source
            .get(source_id)
            .map(|positions| self.collect(positions.iter().copied()))
            .unwrap_or_default()
    }

    /// Entries with `start_ms <= timestamp <= end_ms`, oldest first. Ties keep
    /// insertion order; entries with unparsable timestamps never match.
    pub(crate) fn in_range(&self, start_ms: i64, end_ms: i64) -> Vec<LogEntry> {
        if start_ms > end_ms {
            return Vec::new();
        }
        let mut hits: Vec<(i64, usize)> = self
            .by_day
            .range(day_bucket(start_ms)..=day_bucket(end_ms))
            .flat_map(|(_, positions)| positions.iter().copied())
            .filter_map(|position| {
                let millis = self.entries.get(position)?.timestamp_ms()?;
                (start_ms..=end_ms)
                    .contains(&millis)
                    .then_some((millis, position))
            })
            .collect();
        hits.sort_unstable();
        self.collect(hits.into_iter().map(|(_, position)| position))
    }

    fn collect(&self, positions: impl Iterator<Item = usize>) -> Vec<LogEntry> {
        positions
            .filter_map(|position| self.entries.get(position).cloned())
            .collect()
    }

    fn rebuild(&mut self) {
        self.by_source.clear();
        self.by_day.clear();
        let entries = std::mem::take(&mut self.entries);
        for (position, entry) in entries.iter().enumerate() {
            self.record(position, entry);
        }
        self.entries = entries;
    }

    fn record(&mut self, position: usize, entry: &LogEntry) {
        self.by_source
            .entry(entry.source_id.clone())
            .or_default()
            .push(position);
        if let Some(millis) = entry.timestamp_ms() {
            self.by_day
                .entry(day_bucket(millis))
                .or_default()
                .push(position);
        }
    }
}
