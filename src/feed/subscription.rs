//! The live feed as a scoped resource.
//!
//! `Subscription::open` spawns one reader task that owns the connection and
//! forwards raw message text into an mpsc channel. The connection is released
//! when the subscription is closed or dropped, or when the receiving side of
//! the channel goes away. Closing is idempotent.

use anyhow::Result;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use url::Url;

use super::retry::RetryConfig;
use super::sse::sse_events;
use super::ws::read_ws_feed;
use super::FeedKind;
use crate::logging::{agg_increment, log, obj, v_str, Domain, Level};
use crate::state::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Sse(Url),
    Ws(Url),
}

impl FeedSource {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(match cfg.feed_kind {
            FeedKind::Sse => FeedSource::Sse(cfg.sse_url()?),
            FeedKind::Ws => FeedSource::Ws(cfg.live_ws_url()?),
        })
    }

    pub fn kind(&self) -> FeedKind {
        match self {
            FeedSource::Sse(_) => FeedKind::Sse,
            FeedSource::Ws(_) => FeedKind::Ws,
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            FeedSource::Sse(url) | FeedSource::Ws(url) => url,
        }
    }
}

pub struct Subscription {
    source: FeedSource,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Validate the configuration and start reading. On error nothing is spawned.
    pub fn open(cfg: &Config, sender: mpsc::Sender<String>) -> Result<Self> {
        let source = FeedSource::from_config(cfg)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.http_timeout_secs.max(1)))
            .build()?;
        let retry = RetryConfig {
            max_retries: u32::MAX,
            base_delay_ms: 500,
            max_delay_ms: cfg.reconnect_max_delay_ms,
            jitter_factor: 0.3,
        };
        Ok(Self::spawn(source, client, sender, retry))
    }

    fn spawn(
        source: FeedSource,
        client: Client,
        sender: mpsc::Sender<String>,
        retry: RetryConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_reader(
            source.clone(),
            client,
            sender,
            shutdown_rx,
            retry,
        ));
        log(
            Level::Info,
            Domain::Feed,
            "subscription_opened",
            obj(&[
                ("feed", v_str(source.kind().as_str())),
                ("url", v_str(source.url().as_str())),
            ]),
        );
        Self {
            source,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
            || self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Ask the reader to release its connection. Returns `false` if this
    /// subscription was already closed.
    pub fn close(&mut self) -> bool {
        match self.shutdown.take() {
            Some(tx) => {
                let _ = tx.send(());
                log(
                    Level::Info,
                    Domain::Feed,
                    "subscription_close_requested",
                    obj(&[("feed", v_str(self.source.kind().as_str()))]),
                );
                true
            }
            None => false,
        }
    }

    /// Close and wait for the reader task to finish.
    pub async fn join(mut self) {
        self.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_once(source: &FeedSource, client: &Client, sender: &mpsc::Sender<String>) -> Result<u64> {
    match source {
        FeedSource::Sse(url) => {
            let resp = client
                .get(url.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await?
                .error_for_status()?;
            let mut events = Box::pin(sse_events(Box::pin(resp.bytes_stream())));
            let mut forwarded = 0;
            while let Some(payload) = events.next().await {
                if sender.send(payload).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Ok(forwarded)
        }
        FeedSource::Ws(url) => read_ws_feed(url, sender).await,
    }
}

async fn run_reader(
    source: FeedSource,
    client: Client,
    sender: mpsc::Sender<String>,
    mut shutdown: oneshot::Receiver<()>,
    retry: RetryConfig,
) {
    let feed = source.kind().as_str();
    let mut attempt: u32 = 0;
    loop {
        let outcome = tokio::select! {
            _ = &mut shutdown => break,
            res = read_once(&source, &client, &sender) => res,
        };
        if sender.is_closed() {
            break;
        }
        match outcome {
            Ok(forwarded) => {
                if forwarded > 0 {
                    attempt = 0;
                }
                log(
                    Level::Info,
                    Domain::Feed,
                    "feed_ended",
                    obj(&[("feed", v_str(feed)), ("forwarded", json!(forwarded))]),
                );
            }
            Err(e) => log(
                Level::Warn,
                Domain::Feed,
                "feed_error",
                obj(&[("feed", v_str(feed)), ("error", v_str(&format!("{:#}", e)))]),
            ),
        }

        agg_increment("reconnect");
        let delay = retry.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sleep(delay) => {}
        }
    }
    log(
        Level::Info,
        Domain::Feed,
        "subscription_closed",
        obj(&[("feed", v_str(feed))]),
    );
}
