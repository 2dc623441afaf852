//! Per-minute transaction buckets over a trailing retention window.
//!
//! A [`Summary`] is an immutable, cheaply clonable list of [`Bucket`]s. Every
//! operation here returns a new summary; a clone taken earlier keeps seeing
//! exactly what it saw. `now` is always passed in, never read from the clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::model::{Bucket, TransactionEvent, TransactionStatus};

/// Buckets older than this (relative to `now`) are dropped.
pub const DEFAULT_RETENTION_SECS: i64 = 2 * 60 * 60;
/// Upper bound on a configured retention: ten years.
pub const MAX_RETENTION_SECS: i64 = 10 * 366 * 24 * 60 * 60;

pub fn default_retention() -> Duration {
    Duration::seconds(DEFAULT_RETENTION_SECS)
}

/// Zero the seconds and sub-second part of `ts`.
pub fn round_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Sums over every resident bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total: u64,
    pub success: u64,
    pub ongoing: u64,
    pub error: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    buckets: Arc<Vec<Bucket>>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets in insertion order of their first event.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bucket> {
        self.buckets.iter()
    }

    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<&Bucket> {
        let key = round_to_minute(timestamp);
        self.buckets.iter().find(|b| b.timestamp() == key)
    }

    /// Buckets in chronological order, for plotting.
    pub fn sorted(&self) -> Vec<Bucket> {
        let mut out = self.buckets.to_vec();
        out.sort_by_key(|b| b.timestamp());
        out
    }

    pub fn totals(&self) -> Totals {
        self.buckets.iter().fold(Totals::default(), |acc, b| Totals {
            total: acc.total + b.total(),
            success: acc.success + b.success(),
            ongoing: acc.ongoing + b.ongoing(),
            error: acc.error + b.error(),
        })
    }

    /// SHA-256 of the canonical JSON form, hex encoded.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Whether two summaries share the same bucket storage.
    pub fn ptr_eq(&self, other: &Summary) -> bool {
        Arc::ptr_eq(&self.buckets, &other.buckets)
    }

    fn from_vec(buckets: Vec<Bucket>) -> Self {
        Self {
            buckets: Arc::new(buckets),
        }
    }
}

impl<'a> IntoIterator for &'a Summary {
    type Item = &'a Bucket;
    type IntoIter = std::slice::Iter<'a, Bucket>;

    fn into_iter(self) -> Self::IntoIter {
        self.buckets.iter()
    }
}

impl Serialize for Summary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.buckets.iter())
    }
}

fn record_into(buckets: &mut Vec<Bucket>, event: &TransactionEvent) {
    let key = round_to_minute(event.timestamp);
    match buckets.iter_mut().find(|b| b.timestamp() == key) {
        Some(bucket) => bucket.record(event.status),
        None => buckets.push(Bucket::singleton(key, event.status)),
    }
}

/// Bucket a batch of events by minute. No retention filter is applied.
pub fn aggregate<'a, I>(events: I) -> Summary
where
    I: IntoIterator<Item = &'a TransactionEvent>,
{
    let mut buckets = Vec::new();
    for event in events {
        record_into(&mut buckets, event);
    }
    Summary::from_vec(buckets)
}

/// Keep buckets with `timestamp >= now - retention`. A cutoff before the
/// earliest representable time keeps everything.
pub fn filter_window(summary: &Summary, now: DateTime<Utc>, retention: Duration) -> Summary {
    let Some(cutoff) = now.checked_sub_signed(retention) else {
        return summary.clone();
    };
    if summary.iter().all(|b| b.timestamp() >= cutoff) {
        return summary.clone();
    }
    Summary::from_vec(
        summary
            .iter()
            .filter(|b| b.timestamp() >= cutoff)
            .cloned()
            .collect(),
    )
}

/// [`filter_window`] with the default two-hour retention.
pub fn filter_recent(summary: &Summary, now: DateTime<Utc>) -> Summary {
    filter_window(summary, now, default_retention())
}

/// Fold one event into `summary`, then apply the retention filter.
pub fn merge_event_within(
    summary: &Summary,
    event: &TransactionEvent,
    now: DateTime<Utc>,
    retention: Duration,
) -> Summary {
    let mut next = summary.clone();
    // clones the bucket list when the caller still holds `summary`
    record_into(Arc::make_mut(&mut next.buckets), event);
    filter_window(&next, now, retention)
}

/// [`merge_event_within`] with the default two-hour retention.
pub fn merge_event(summary: &Summary, event: &TransactionEvent, now: DateTime<Utc>) -> Summary {
    merge_event_within(summary, event, now, default_retention())
}

#[derive(Debug, Clone)]
enum AggregatorState {
    Uninitialized,
    Ready(Summary),
}

/// Owns the resident summary and threads it through history and live input.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    state: AggregatorState,
    retention: Duration,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(default_retention())
    }
}

impl WindowAggregator {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: AggregatorState::Uninitialized,
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, AggregatorState::Ready(_))
    }

    /// Current summary; empty before initialization.
    pub fn summary(&self) -> Summary {
        match &self.state {
            AggregatorState::Uninitialized => Summary::new(),
            AggregatorState::Ready(summary) => summary.clone(),
        }
    }

    /// Seed from the historical batch. If live events already arrived, the
    /// history is merged into them instead of replacing them.
    pub fn initialize(&mut self, history: &[TransactionEvent], now: DateTime<Utc>) -> Summary {
        let next = match &self.state {
            AggregatorState::Uninitialized => {
                filter_window(&aggregate(history), now, self.retention)
            }
            AggregatorState::Ready(current) => {
                let mut next = current.clone();
                let buckets = Arc::make_mut(&mut next.buckets);
                for event in history {
                    record_into(buckets, event);
                }
                filter_window(&next, now, self.retention)
            }
        };
        self.state = AggregatorState::Ready(next.clone());
        next
    }

    /// Merge one live event.
    pub fn on_event(&mut self, event: &TransactionEvent, now: DateTime<Utc>) -> Summary {
        let current = self.summary();
        let next = merge_event_within(&current, event, now, self.retention);
        self.state = AggregatorState::Ready(next.clone());
        next
    }

    /// Re-apply retention without new input.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Summary {
        match &self.state {
            AggregatorState::Uninitialized => Summary::new(),
            AggregatorState::Ready(current) => {
                let next = filter_window(current, now, self.retention);
                self.state = AggregatorState::Ready(next.clone());
                next
            }
        }
    }

    pub fn count(&self, timestamp: DateTime<Utc>, status: TransactionStatus) -> u64 {
        match &self.state {
            AggregatorState::Uninitialized => 0,
            AggregatorState::Ready(summary) => {
                summary.get(timestamp).map(|b| b.count(status)).unwrap_or(0)
            }
        }
    }
}
