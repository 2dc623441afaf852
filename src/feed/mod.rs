use anyhow::Result;
use async_trait::async_trait;

use crate::model::HistoryResponse;

pub mod history;
pub mod retry;
pub mod sse;
pub mod subscription;
mod ws;

/// Transport of the live transaction feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedKind {
    Sse,
    Ws,
}

impl FeedKind {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("FEED_KIND").unwrap_or_else(|_| "sse".to_string()))
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ws" | "websocket" => FeedKind::Ws,
            _ => FeedKind::Sse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Sse => "sse",
            FeedKind::Ws => "ws",
        }
    }
}

/// Anything that can serve the recent-transactions batch.
#[async_trait]
pub trait TransactionSource {
    async fn fetch_recent(&self) -> Result<HistoryResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_kind_parse() {
        assert_eq!(FeedKind::parse("ws"), FeedKind::Ws);
        assert_eq!(FeedKind::parse("WebSocket"), FeedKind::Ws);
        assert_eq!(FeedKind::parse("sse"), FeedKind::Sse);
        assert_eq!(FeedKind::parse("bogus"), FeedKind::Sse);
    }
}
