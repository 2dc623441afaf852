use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::time::Duration;
use url::Url;

use super::retry::{
    is_retryable_http_error, is_retryable_network_error, retry_async, PermanentFailure,
    RetryConfig,
};
use super::TransactionSource;
use crate::logging::{log, log_dropped_event, obj, v_str, Domain, Level};
use crate::model::{HistoryResponse, RawTransaction, TransactionEvent};
use crate::state::Config;

/// REST client for the recent-transactions endpoint.
pub struct HistoryClient {
    client: Client,
    url: Url,
}

impl HistoryClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: cfg.history_url()?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn classify(err: reqwest::Error) -> anyhow::Error {
    if is_retryable_network_error(&err) {
        err.into()
    } else {
        PermanentFailure {
            msg: err.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl TransactionSource for HistoryClient {
    async fn fetch_recent(&self) -> Result<HistoryResponse> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("history fetch returned {}: {}", status, body);
            if is_retryable_http_error(status.as_u16()) {
                return Err(anyhow::anyhow!(msg));
            }
            return Err(PermanentFailure { msg }.into());
        }

        let parsed: HistoryResponse = resp.json().await.map_err(classify)?;
        Ok(parsed)
    }
}

/// Validate each record of a history batch. Bad records are dropped one by one.
pub fn decode_history(resp: HistoryResponse) -> Vec<TransactionEvent> {
    if !resp.success {
        log(
            Level::Warn,
            Domain::Feed,
            "history_unsuccessful",
            obj(&[("records", json!(resp.data.len()))]),
        );
        return Vec::new();
    }
    let mut events = Vec::with_capacity(resp.data.len());
    for value in resp.data {
        let preview = value.to_string();
        match RawTransaction::from_value(value).and_then(TransactionEvent::try_from) {
            Ok(event) => events.push(event),
            Err(e) => log_dropped_event("history", e.reason(), &preview),
        }
    }
    events
}

/// Fetch the historical batch, falling back to an empty one on any failure.
pub async fn load_history<S>(source: &S, retry: &RetryConfig) -> Vec<TransactionEvent>
where
    S: TransactionSource + Sync + ?Sized,
{
    match retry_async(retry, "fetch_recent", || source.fetch_recent()).await {
        Ok(resp) => {
            let events = decode_history(resp);
            log(
                Level::Info,
                Domain::Feed,
                "history_loaded",
                obj(&[("events", json!(events.len()))]),
            );
            events
        }
        Err(e) => {
            log(
                Level::Error,
                Domain::Feed,
                "history_failed",
                obj(&[
                    ("error", v_str(&format!("{:#}", e))),
                    ("msg", v_str("starting from an empty summary")),
                ]),
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_keeps_valid_records() {
        let resp = HistoryResponse {
            success: true,
            data: vec![
                json!({"timestamp": "2024-05-01T10:00:05Z", "status": "success"}),
                json!({"timestamp": "2024-05-01T10:00:45Z", "status": "Error"}),
                json!({"timestamp": "later", "status": "success"}),
                json!({"timestamp": "2024-05-01T10:00:45Z", "status": "refunded"}),
                json!(17),
            ],
        };
        let events = decode_history(resp);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn decode_unsuccessful_is_empty() {
        let resp = HistoryResponse {
            success: false,
            data: vec![json!({"timestamp": "2024-05-01T10:00:05Z", "status": "success"})],
        };
        assert!(decode_history(resp).is_empty());
    }

    #[test]
    fn client_builds_url_from_config() {
        let client = HistoryClient::new(&Config::default()).unwrap();
        assert_eq!(client.url().path(), "/api/transactions/recent");
    }
}
