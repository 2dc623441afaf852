use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Duration;

use txpulse::aggregator::WindowAggregator;
use txpulse::feed::history::{load_history, HistoryClient};
use txpulse::feed::retry::RetryConfig;
use txpulse::feed::subscription::Subscription;
use txpulse::live_ops::run_until;
use txpulse::logging::{json_log, log, log_summary, obj, v_num, v_str, Domain, Level};
use txpulse::metrics::{FunctionSelector, MetricsClient};
use txpulse::state::Config;

async fn report_function_metrics(cfg: &Config) {
    let selector = FunctionSelector::default();
    let client = match MetricsClient::new(cfg) {
        Ok(c) => c,
        Err(e) => {
            log(Level::Warn, Domain::Metrics, "metrics_client", obj(&[("error", v_str(&e.to_string()))]));
            return;
        }
    };
    match client.fetch(&[selector.current()]).await {
        Ok(all) => {
            for m in all {
                for series in m.charts() {
                    log(
                        Level::Info,
                        Domain::Metrics,
                        "function_series",
                        obj(&[
                            ("function", v_str(&m.function_name)),
                            ("series", v_str(&series.label)),
                            ("points", json!(series.points.len())),
                            ("last", series.last().map(|p| v_num(p.value)).unwrap_or_default()),
                        ]),
                    );
                }
            }
        }
        Err(e) => log(
            Level::Warn,
            Domain::Metrics,
            "metrics_failed",
            obj(&[
                ("function", v_str(selector.current())),
                ("error", v_str(&format!("{:#}", e))),
                ("msg", v_str("Error fetching metrics")),
            ]),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "startup",
        obj(&[
            ("api_base", v_str(&cfg.api_base)),
            ("feed", v_str(cfg.feed_kind.as_str())),
            ("retention_secs", json!(cfg.retention_secs)),
        ]),
    );

    let mut aggregator = WindowAggregator::new(cfg.retention());

    let history_client = HistoryClient::new(&cfg)?;
    let retry = RetryConfig {
        max_retries: cfg.history_retries,
        ..Default::default()
    };
    let history = load_history(&history_client, &retry).await;
    let summary = aggregator.initialize(&history, Utc::now());
    log_summary("initialize", &summary);

    report_function_metrics(&cfg).await;

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity);
    let subscription = Subscription::open(&cfg, tx)?;
    let feed = cfg.feed_kind.as_str();

    run_until(
        &mut rx,
        &mut aggregator,
        feed,
        Duration::from_secs(cfg.tick_secs),
        tokio::signal::ctrl_c(),
    )
    .await;

    subscription.join().await;
    log_summary("shutdown", &aggregator.summary());
    Ok(())
}
