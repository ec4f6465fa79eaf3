//! In-memory head storage implementing the append boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AppendError, Appendable, Appender, SeriesRef, StorageResult};
use crate::labels::Labels;

/// In-memory series store with head-block append semantics.
///
/// Each series accepts samples in strictly increasing timestamp order.
/// Re-sending the newest sample with an identical value is a no-op, while a
/// different value at that timestamp is rejected. Samples older than the
/// configured minimum valid timestamp are out of bounds.
///
/// Series are registered on the first append for their label set, even if
/// that transaction later rolls back. Samples become visible only on commit.
pub struct InMemoryStorage {
    head: Arc<Head>,
}

struct Head {
    series: RwLock<SeriesMap>,
    next_ref: AtomicU64,
    min_valid_timestamp: i64,
}

#[derive(Default)]
struct SeriesMap {
    refs: HashMap<Labels, SeriesRef>,
    series: HashMap<SeriesRef, MemSeries>,
}

struct MemSeries {
    samples: Vec<(i64, f64)>,
}

impl MemSeries {
    fn newest(&self) -> Option<(i64, f64)> {
        self.samples.last().copied()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Creates an empty store accepting any timestamp.
    pub fn new() -> Self {
        Self::with_min_valid_timestamp(i64::MIN)
    }

    /// Creates an empty store that rejects samples older than `min_valid_timestamp`.
    pub fn with_min_valid_timestamp(min_valid_timestamp: i64) -> Self {
        Self {
            head: Arc::new(Head {
                series: RwLock::new(SeriesMap::default()),
                next_ref: AtomicU64::new(1),
                min_valid_timestamp,
            }),
        }
    }

    /// Returns the reference of the series with exactly these labels.
    pub fn series_ref(&self, labels: &Labels) -> Option<SeriesRef> {
        self.head.series.read().refs.get(labels).copied()
    }

    /// Returns the committed `(timestamp_ms, value)` samples of a series.
    pub fn samples(&self, labels: &Labels) -> Vec<(i64, f64)> {
        let map = self.head.series.read();
        map.refs
            .get(labels)
            .and_then(|r| map.series.get(r))
            .map(|s| s.samples.clone())
            .unwrap_or_default()
    }

    /// Number of registered series.
    pub fn series_count(&self) -> usize {
        self.head.series.read().series.len()
    }

    /// Number of committed samples across all series.
    pub fn sample_count(&self) -> usize {
        self.head
            .series
            .read()
            .series
            .values()
            .map(|s| s.samples.len())
            .sum()
    }
}

impl Head {
    fn get_or_create(&self, labels: &Labels) -> SeriesRef {
        if let Some(series_ref) = self.series.read().refs.get(labels) {
            return *series_ref;
        }
        let mut map = self.series.write();
        // another writer may have registered it between the two locks
        if let Some(series_ref) = map.refs.get(labels) {
            return *series_ref;
        }
        let series_ref = self.next_ref.fetch_add(1, Ordering::Relaxed);
        map.refs.insert(labels.clone(), series_ref);
        map.series.insert(
            series_ref,
            MemSeries {
                samples: Vec::new(),
            },
        );
        series_ref
    }

    fn newest(&self, series_ref: SeriesRef) -> Option<(i64, f64)> {
        self.series
            .read()
            .series
            .get(&series_ref)
            .and_then(MemSeries::newest)
    }
}

impl Appendable for InMemoryStorage {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(InMemoryAppender {
            head: self.head.clone(),
            pending: Vec::new(),
            newest_pending: HashMap::new(),
        })
    }
}

struct InMemoryAppender {
    head: Arc<Head>,
    pending: Vec<(SeriesRef, i64, f64)>,
    newest_pending: HashMap<SeriesRef, (i64, f64)>,
}

#[async_trait]
impl Appender for InMemoryAppender {
    fn append(
        &mut self,
        labels: &Labels,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<SeriesRef, AppendError> {
        if labels.is_empty() {
            return Err(AppendError::EmptyLabelSet);
        }
        if timestamp_ms < self.head.min_valid_timestamp {
            return Err(AppendError::OutOfBounds);
        }

        let series_ref = self.head.get_or_create(labels);
        let newest = self
            .newest_pending
            .get(&series_ref)
            .copied()
            .or_else(|| self.head.newest(series_ref));

        if let Some((newest_ts, newest_value)) = newest {
            if timestamp_ms < newest_ts {
                return Err(AppendError::OutOfOrderSample);
            }
            if timestamp_ms == newest_ts {
                if value.to_bits() != newest_value.to_bits() {
                    return Err(AppendError::DuplicateSampleForTimestamp);
                }
                return Ok(series_ref);
            }
        }

        self.pending.push((series_ref, timestamp_ms, value));
        self.newest_pending.insert(series_ref, (timestamp_ms, value));
        Ok(series_ref)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut map = self.head.series.write();
        let mut dropped = 0usize;
        for (series_ref, timestamp_ms, value) in self.pending {
            let Some(series) = map.series.get_mut(&series_ref) else {
                dropped += 1;
                continue;
            };
            // a concurrent commit may have moved this series forward
            if let Some((newest_ts, _)) = series.newest() {
                if timestamp_ms <= newest_ts {
                    dropped += 1;
                    continue;
                }
            }
            series.samples.push((timestamp_ms, value));
        }
        if dropped > 0 {
            tracing::debug!(dropped, "dropped samples overtaken by a concurrent commit");
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        if !self.pending.is_empty() {
            tracing::debug!(pending = self.pending.len(), "rolled back append transaction");
        }
    }
}
