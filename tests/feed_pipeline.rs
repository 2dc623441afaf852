//! History bootstrap and live ingestion without a network.
//!
//! A scripted `TransactionSource` stands in for the REST endpoint and an
//! in-memory byte stream stands in for the SSE connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use txpulse::aggregator::WindowAggregator;
use txpulse::feed::history::load_history;
use txpulse::feed::retry::{PermanentFailure, RetryConfig};
use txpulse::feed::sse::sse_events;
use txpulse::feed::TransactionSource;
use txpulse::live_ops::process_events;
use txpulse::model::{HistoryResponse, TransactionStatus};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()
}

fn minute(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
        jitter_factor: 0.0,
    }
}

/// Replies with each scripted result in turn, then repeats the last one.
struct ScriptedSource {
    script: Mutex<Vec<Result<HistoryResponse>>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    fn new(script: Vec<Result<HistoryResponse>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSource for ScriptedSource {
    async fn fetch_recent(&self) -> Result<HistoryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            match script.first() {
                Some(Ok(resp)) => Ok(resp.clone()),
                Some(Err(e)) => match e.downcast_ref::<PermanentFailure>() {
                    Some(p) => Err(p.clone().into()),
                    None => Err(anyhow!("{}", e)),
                },
                None => Err(anyhow!("empty script")),
            }
        }
    }
}

fn history_ok() -> HistoryResponse {
    HistoryResponse {
        success: true,
        data: vec![
            json!({"timestamp": "2024-05-01T10:30:05.120Z", "status": "success"}),
            json!({"timestamp": "2024-05-01T10:30:40Z", "status": "ERROR"}),
            json!({"timestamp": "2024-05-01T10:31:00Z", "status": "ongoing"}),
            // outside the window
            json!({"timestamp": "2024-05-01T07:00:00Z", "status": "success"}),
            // rejected at the boundary
            json!({"timestamp": "2024-05-01T10:31:00Z", "status": "cancelled"}),
            json!({"status": "success"}),
        ],
    }
}

// ---------------------------------------------------------------------------
// History bootstrap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_seeds_the_window() {
    let source = ScriptedSource::new(vec![Ok(history_ok())]);
    let history = load_history(&source, &fast_retry()).await;
    assert_eq!(history.len(), 4);

    let mut agg = WindowAggregator::default();
    let summary = agg.initialize(&history, now());
    assert_eq!(summary.len(), 2);
    let b = summary.get(minute(10, 30)).unwrap();
    assert_eq!((b.total(), b.success(), b.error()), (2, 1, 1));
    assert!(summary.get(minute(7, 0)).is_none());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let source = ScriptedSource::new(vec![
        Err(anyhow!("connection reset")),
        Err(anyhow!("503")),
        Ok(history_ok()),
    ]);
    let history = load_history(&source, &fast_retry()).await;
    assert_eq!(history.len(), 4);
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let source = ScriptedSource::new(vec![Err(PermanentFailure {
        msg: "404 Not Found".to_string(),
    }
    .into())]);
    let history = load_history(&source, &fast_retry()).await;
    assert!(history.is_empty());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn failed_history_starts_empty_and_live_events_still_land() {
    let source = ScriptedSource::new(vec![Err(anyhow!("connection refused"))]);
    let history = load_history(&source, &fast_retry()).await;
    assert!(history.is_empty());
    assert_eq!(source.calls(), 4);

    let mut agg = WindowAggregator::default();
    assert!(agg.initialize(&history, now()).is_empty());

    let (tx, mut rx) = mpsc::channel(4);
    tx.send(r#"{"timestamp":"2024-05-01T10:59:59Z","status":"success"}"#.to_string())
        .await
        .unwrap();
    let report = process_events(&mut rx, &mut agg, "sse", now());
    assert_eq!(report.merged, 1);
    assert_eq!(agg.count(minute(10, 59), TransactionStatus::Success), 1);
}

#[tokio::test]
async fn unsuccessful_response_starts_empty() {
    let source = ScriptedSource::new(vec![Ok(HistoryResponse {
        success: false,
        data: history_ok().data,
    })]);
    assert!(load_history(&source, &fast_retry()).await.is_empty());
}

// ---------------------------------------------------------------------------
// Live feed end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sse_bytes_flow_into_the_summary() {
    let chunks: Vec<Result<Vec<u8>, String>> = vec![
        Ok(b": hello\n\ndata: {\"timestamp\":\"2024-05-01T10:30:10Z\",".to_vec()),
        Ok(b"\"status\":\"ongoing\"}\n\ndata: {broken\n\n".to_vec()),
        Ok(b"data: {\"timestamp\":1714559440000,\"status\":\"Success\"}\n\n".to_vec()),
    ];

    let (tx, mut rx) = mpsc::channel(16);
    let mut events = Box::pin(sse_events(stream::iter(chunks)));
    while let Some(payload) = events.next().await {
        tx.send(payload).await.unwrap();
    }

    let mut agg = WindowAggregator::default();
    let history = load_history(
        &ScriptedSource::new(vec![Ok(history_ok())]),
        &fast_retry(),
    )
    .await;
    agg.initialize(&history, now());
    let before = agg.summary();

    let report = process_events(&mut rx, &mut agg, "sse", now());
    assert_eq!((report.merged, report.dropped), (2, 1));

    let after = agg.summary();
    assert_eq!(after.len(), before.len());
    let b = after.get(minute(10, 30)).unwrap();
    assert_eq!((b.total(), b.success(), b.ongoing(), b.error()), (4, 2, 1, 1));
    // the snapshot taken before the drain still shows the old counts
    assert_eq!(before.get(minute(10, 30)).unwrap().total(), 2);
}
