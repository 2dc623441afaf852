use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregator::Summary;
use crate::metrics::MetricPoint;
use crate::model::{canonical_timestamp, Bucket};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// One labelled line, ready for a chart surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<ChartPoint>,
}

/// Which bucket counter a transaction chart plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketField {
    Total,
    Success,
    Ongoing,
    Error,
}

impl BucketField {
    pub const ALL: [BucketField; 4] = [
        BucketField::Total,
        BucketField::Success,
        BucketField::Ongoing,
        BucketField::Error,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            BucketField::Total => "Total Transactions",
            BucketField::Success => "Success Transactions",
            BucketField::Ongoing => "Ongoing Transactions",
            BucketField::Error => "Error Transactions",
        }
    }

    pub fn value(&self, bucket: &Bucket) -> u64 {
        match self {
            BucketField::Total => bucket.total(),
            BucketField::Success => bucket.success(),
            BucketField::Ongoing => bucket.ongoing(),
            BucketField::Error => bucket.error(),
        }
    }
}

/// `hh:mm AM` axis label
pub fn clock_label(ts: &DateTime<Utc>) -> String {
    ts.format("%I:%M %p").to_string()
}

impl ChartSeries {
    /// Metric points in given order, labelled `HH:MM:SS` UTC.
    pub fn from_points(label: &str, points: &[MetricPoint]) -> Self {
        let points = points
            .iter()
            .map(|p| ChartPoint {
                label: DateTime::from_timestamp(p.timestamp, 0)
                    .map(|ts| ts.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| p.timestamp.to_string()),
                value: p.value,
            })
            .collect();
        Self {
            label: label.to_string(),
            points,
        }
    }

    /// One counter over the summary's buckets in chronological order.
    pub fn from_summary(summary: &Summary, field: BucketField) -> Self {
        let points = summary
            .sorted()
            .iter()
            .map(|b| ChartPoint {
                label: clock_label(&b.timestamp()),
                value: field.value(b) as f64,
            })
            .collect();
        Self {
            label: field.title().to_string(),
            points,
        }
    }

    pub fn last(&self) -> Option<&ChartPoint> {
        self.points.last()
    }
}

/// Every transaction chart of the dashboard page.
pub fn dashboard_series(summary: &Summary) -> Vec<ChartSeries> {
    BucketField::ALL
        .iter()
        .map(|field| ChartSeries::from_summary(summary, *field))
        .collect()
}

/// Axis key for tooltips and exports.
pub fn axis_key(bucket: &Bucket) -> String {
    canonical_timestamp(&bucket.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::model::{TransactionEvent, TransactionStatus};
    use chrono::TimeZone;

    #[test]
    fn summary_series_is_chronological() {
        let summary = aggregate(&[
            TransactionEvent::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 14, 5, 10).unwrap(),
                TransactionStatus::Error,
            ),
            TransactionEvent::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 13, 59, 0).unwrap(),
                TransactionStatus::Success,
            ),
        ]);
        let series = ChartSeries::from_summary(&summary, BucketField::Error);
        assert_eq!(series.label, "Error Transactions");
        let labels: Vec<_> = series.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["01:59 PM", "02:05 PM"]);
        let values: Vec<_> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0.0, 1.0]);
        assert_eq!(axis_key(&summary.buckets()[0]), "2024-05-01T14:05:00.000Z");
    }

    #[test]
    fn dashboard_has_four_series() {
        let series = dashboard_series(&Summary::new());
        assert_eq!(series.len(), 4);
        assert!(series.iter().all(|s| s.points.is_empty()));
    }

    #[test]
    fn metric_points_labelled_by_time() {
        let series = ChartSeries::from_points(
            "Instance count",
            &[
                MetricPoint { timestamp: 1_714_557_600, value: 2.0 },
                MetricPoint { timestamp: 1_714_557_660, value: 3.0 },
            ],
        );
        assert_eq!(series.points[0].label, "10:00:00");
        assert_eq!(series.last().unwrap().value, 3.0);
    }
}
