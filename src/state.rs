use anyhow::{Context, Result};
use url::Url;

use crate::aggregator::{DEFAULT_RETENTION_SECS, MAX_RETENTION_SECS};
use crate::feed::FeedKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub history_path: String,
    pub sse_path: String,
    pub ws_url: String,
    pub metrics_path: String,
    pub feed_kind: FeedKind,
    pub retention_secs: i64,
    pub tick_secs: u64,
    pub channel_capacity: usize,
    pub http_timeout_secs: u64,
    pub history_retries: u32,
    pub reconnect_max_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:3000".to_string(),
            history_path: "/api/transactions/recent".to_string(),
            sse_path: "/api/transactions/sse".to_string(),
            ws_url: "ws://localhost:8090/ws/structured".to_string(),
            metrics_path: "/api/metrics".to_string(),
            feed_kind: FeedKind::Sse,
            retention_secs: DEFAULT_RETENTION_SECS,
            tick_secs: 30,
            channel_capacity: 1024,
            http_timeout_secs: 10,
            history_retries: 3,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api_base: std::env::var("API_BASE").unwrap_or(d.api_base),
            history_path: std::env::var("HISTORY_PATH").unwrap_or(d.history_path),
            sse_path: std::env::var("SSE_PATH").unwrap_or(d.sse_path),
            ws_url: std::env::var("WS_URL").unwrap_or(d.ws_url),
            metrics_path: std::env::var("METRICS_PATH").unwrap_or(d.metrics_path),
            feed_kind: FeedKind::from_env(),
            retention_secs: env_or("RETENTION_SECS", d.retention_secs).clamp(1, MAX_RETENTION_SECS),
            tick_secs: env_or("TICK_SECS", d.tick_secs).max(1),
            channel_capacity: env_or("CHANNEL_CAPACITY", d.channel_capacity).max(1),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", d.http_timeout_secs),
            history_retries: env_or("HISTORY_RETRIES", d.history_retries),
            reconnect_max_delay_ms: env_or("RECONNECT_MAX_DELAY_MS", d.reconnect_max_delay_ms),
        }
    }

    /// Retention as a duration, clamped to `1..=MAX_RETENTION_SECS` seconds.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs.clamp(1, MAX_RETENTION_SECS))
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.api_base)
            .with_context(|| format!("invalid API_BASE: {}", self.api_base))?;
        base.join(path)
            .with_context(|| format!("invalid path {} for {}", path, self.api_base))
    }

    pub fn history_url(&self) -> Result<Url> {
        self.api_url(&self.history_path)
    }

    pub fn sse_url(&self) -> Result<Url> {
        self.api_url(&self.sse_path)
    }

    pub fn metrics_url(&self) -> Result<Url> {
        self.api_url(&self.metrics_path)
    }

    pub fn live_ws_url(&self) -> Result<Url> {
        let url = Url::parse(&self.ws_url).with_context(|| format!("invalid WS_URL: {}", self.ws_url))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => anyhow::bail!("WS_URL must use ws:// or wss://, got {}://", other),
        }
    }
}
