use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::aggregator::WindowAggregator;
use crate::chart::dashboard_series;
use crate::logging::{
    agg_increment, json_log, log, log_dropped_event, log_summary, obj, tick_aggregator, v_num,
    v_str, Domain, Level,
};
use crate::model::{IngestError, TransactionEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub merged: u64,
    pub dropped: u64,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.merged == 0 && self.dropped == 0
    }
}

/// Decode one live message and merge it. A rejected message leaves the
/// aggregator untouched.
pub fn apply_message(
    aggregator: &mut WindowAggregator,
    feed: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<(), IngestError> {
    match TransactionEvent::from_json(text) {
        Ok(event) => {
            let summary = aggregator.on_event(&event, now);
            agg_increment("merged");
            log(
                Level::Debug,
                Domain::Aggregate,
                "event_merged",
                obj(&[
                    ("feed", v_str(feed)),
                    ("status", v_str(event.status.as_str())),
                    ("buckets", json!(summary.len())),
                ]),
            );
            Ok(())
        }
        Err(e) => {
            log_dropped_event(feed, e.reason(), text);
            Err(e)
        }
    }
}

/// Drain every message already waiting in `rx` without blocking.
pub fn process_events(
    rx: &mut mpsc::Receiver<String>,
    aggregator: &mut WindowAggregator,
    feed: &str,
    now: DateTime<Utc>,
) -> DrainReport {
    let mut report = DrainReport::default();
    while let Ok(text) = rx.try_recv() {
        match apply_message(aggregator, feed, &text, now) {
            Ok(()) => report.merged += 1,
            Err(_) => report.dropped += 1,
        }
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    FeedClosed,
}

/// Merge live messages and refresh the window every `tick_every` until
/// `shutdown` resolves or every sender is gone.
///
/// `shutdown` is pinned once, so a signal that fires while a batch is being
/// merged is seen on the next iteration.
pub async fn run_until<F>(
    rx: &mut mpsc::Receiver<String>,
    aggregator: &mut WindowAggregator,
    feed: &str,
    tick_every: Duration,
    shutdown: F,
) -> LoopExit
where
    F: Future,
{
    tokio::pin!(shutdown);
    let mut tick = interval(tick_every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                json_log("shutdown", obj(&[("reason", v_str("signal"))]));
                return LoopExit::Shutdown;
            }
            msg = rx.recv() => {
                let Some(text) = msg else {
                    log(Level::Warn, Domain::Feed, "feed_channel_closed", obj(&[]));
                    return LoopExit::FeedClosed;
                };
                let now = Utc::now();
                let first = apply_message(aggregator, feed, &text, now).is_ok();
                let rest = process_events(rx, aggregator, feed, now);
                if first || rest.merged > 0 {
                    log_summary("event", &aggregator.summary());
                }
            }
            _ = tick.tick() => {
                let summary = aggregator.refresh(Utc::now());
                log_summary("tick", &summary);
                for series in dashboard_series(&summary) {
                    if let Some(last) = series.last() {
                        log(
                            Level::Debug,
                            Domain::Aggregate,
                            "chart_tail",
                            obj(&[
                                ("series", v_str(&series.label)),
                                ("label", v_str(&last.label)),
                                ("value", v_num(last.value)),
                            ]),
                        );
                    }
                }
                tick_aggregator();
            }
        }
    }
}
