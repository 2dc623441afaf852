//! Cloud function metrics: the per-function series behind the metrics page.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Duration;
use url::Url;

use crate::chart::ChartSeries;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::state::Config;

/// Functions the dashboard knows how to show, in selector order.
pub const CLOUD_FUNCTIONS: [&str; 4] = [
    "kafka-producer",
    "kafka-consumer",
    "mongo-kafka-delete",
    "confluent-manager",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Epoch seconds
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionMetrics {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub invocations_per_second: Vec<MetricPoint>,
    #[serde(default)]
    pub execution_time: Vec<MetricPoint>,
    #[serde(default)]
    pub memory_utilization: Vec<MetricPoint>,
    #[serde(default)]
    pub instance_count: Vec<MetricPoint>,
}

impl FunctionMetrics {
    /// The four panels of the metrics page, titled.
    pub fn panels(&self) -> [(&'static str, &[MetricPoint]); 4] {
        [
            ("Invocations/Second", self.invocations_per_second.as_slice()),
            ("Execution time", self.execution_time.as_slice()),
            ("Memory utilization", self.memory_utilization.as_slice()),
            ("Instance count", self.instance_count.as_slice()),
        ]
    }

    pub fn charts(&self) -> Vec<ChartSeries> {
        self.panels()
            .iter()
            .map(|(title, points)| ChartSeries::from_points(title, points))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Vec<FunctionMetrics>,
}

/// Cycles through [`CLOUD_FUNCTIONS`], wrapping at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionSelector {
    index: usize,
}

impl FunctionSelector {
    pub fn current(&self) -> &'static str {
        CLOUD_FUNCTIONS[self.index]
    }

    pub fn next(&mut self) -> &'static str {
        self.index = (self.index + 1) % CLOUD_FUNCTIONS.len();
        self.current()
    }

    pub fn previous(&mut self) -> &'static str {
        self.index = (self.index + CLOUD_FUNCTIONS.len() - 1) % CLOUD_FUNCTIONS.len();
        self.current()
    }

    /// Jump to a known function; unknown names leave the selection unchanged.
    pub fn select(&mut self, name: &str) -> bool {
        match CLOUD_FUNCTIONS.iter().position(|f| *f == name) {
            Some(i) => {
                self.index = i;
                true
            }
            None => false,
        }
    }
}

pub struct MetricsClient {
    client: Client,
    url: Url,
}

impl MetricsClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: cfg.metrics_url()?,
        })
    }

    pub fn request_url(&self, names: &[&str]) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("functions", &names.join(","));
        url
    }

    pub async fn fetch(&self, names: &[&str]) -> Result<Vec<FunctionMetrics>> {
        let resp = self.client.get(self.request_url(names)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("metrics fetch returned {}: {}", status, body));
        }
        let body: MetricsResponse = resp.json().await?;
        if body.success == Some(false) {
            return Err(anyhow!("metrics endpoint reported failure"));
        }
        log(
            Level::Debug,
            Domain::Metrics,
            "metrics_fetched",
            obj(&[
                ("function", v_str(&names.join(","))),
                ("series", json!(body.data.len())),
            ]),
        );
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_wraps_forward() {
        let mut sel = FunctionSelector::default();
        assert_eq!(sel.current(), "kafka-producer");
        assert_eq!(sel.next(), "kafka-consumer");
        assert_eq!(sel.next(), "mongo-kafka-delete");
        assert_eq!(sel.next(), "confluent-manager");
        assert_eq!(sel.next(), "kafka-producer");
    }

    #[test]
    fn selector_wraps_backward() {
        let mut sel = FunctionSelector::default();
        assert_eq!(sel.previous(), "confluent-manager");
        assert_eq!(sel.previous(), "mongo-kafka-delete");
    }

    #[test]
    fn selector_select() {
        let mut sel = FunctionSelector::default();
        assert!(sel.select("mongo-kafka-delete"));
        assert_eq!(sel.current(), "mongo-kafka-delete");
        assert!(!sel.select("lambda-x"));
        assert_eq!(sel.current(), "mongo-kafka-delete");
    }

    #[test]
    fn decodes_metrics_payload() {
        let body: MetricsResponse = serde_json::from_str(
            r#"{"success":true,"data":[{"function_name":"kafka-producer",
                "invocations_per_second":[{"timestamp":1714557600,"value":1.5}],
                "execution_time":[],"memory_utilization":[{"timestamp":1714557600,"value":0.25}]}]}"#,
        )
        .unwrap();
        let m = &body.data[0];
        assert_eq!(m.invocations_per_second.len(), 1);
        assert!(m.instance_count.is_empty());
        let charts = m.charts();
        assert_eq!(charts.len(), 4);
        assert_eq!(charts[0].label, "Invocations/Second");
        assert_eq!(charts[2].points[0].value, 0.25);
    }

    #[test]
    fn request_url_lists_functions() {
        let client = MetricsClient::new(&Config::default()).unwrap();
        let url = client.request_url(&["kafka-producer", "kafka-consumer"]);
        assert_eq!(url.path(), "/api/metrics");
        assert_eq!(url.query(), Some("functions=kafka-producer%2Ckafka-consumer"));
    }
}
