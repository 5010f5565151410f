//! Flat time-series representation shipped over remote write.

use chrono::{DateTime, Utc};

pub use crate::exposition::Label;
use crate::exposition::MetricFamily;

/// Reserved label carrying the family name; always first in a label set.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// One label set with exactly one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub labels: Vec<Label>,
    /// Sample timestamp in epoch milliseconds.
    pub timestamp_ms: i64,
    pub value: f64,
}

impl TimeSeries {
    pub fn name(&self) -> Option<&str> {
        self.labels
            .first()
            .filter(|l| l.name == METRIC_NAME_LABEL)
            .map(|l| l.value.as_str())
    }
}

/// Flattens families into one series per metric, stamped with `now`.
///
/// The label set is `__name__` followed by the metric's labels in their
/// existing order. Histograms and summaries ship their sum only. A label
/// named `__name__` on the metric itself is dropped so names stay unique.
pub fn project(families: &[MetricFamily], now: DateTime<Utc>) -> Vec<TimeSeries> {
    let timestamp_ms = now.timestamp_millis();
    let mut series = Vec::with_capacity(crate::exposition::model::metric_count(families));

    for family in families {
        for metric in &family.metrics {
            let mut labels = Vec::with_capacity(metric.labels().len() + 1);
            labels.push(Label::new(METRIC_NAME_LABEL, family.name.clone()));
            labels.extend(
                metric
                    .labels()
                    .iter()
                    .filter(|l| l.name != METRIC_NAME_LABEL)
                    .cloned(),
            );
            series.push(TimeSeries {
                labels,
                timestamp_ms,
                value: metric.value.scalar(),
            });
        }
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::{Histogram, Metric, MetricType, Summary, Value};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn one_series_per_metric_with_name_first() {
        let mut requests = MetricFamily::new("requests_total", MetricType::Counter);
        requests.push(
            Metric::new(Value::Counter(10.0))
                .with_label("code", "200")
                .with_label("method", "get"),
        );
        requests.push(Metric::new(Value::Counter(2.0)).with_label("code", "500"));

        let mut latency = MetricFamily::new("latency_seconds", MetricType::Histogram);
        latency.push(Metric::new(Value::Histogram(Histogram {
            sum: 4.5,
            count: 9,
            buckets: vec![(0.5, 3), (f64::INFINITY, 9)],
        })));

        let mut gc = MetricFamily::new("gc_seconds", MetricType::Summary);
        gc.push(Metric::new(Value::Summary(Summary {
            sum: 1.25,
            count: 5,
            quantiles: vec![(0.99, 0.5)],
        })));

        let empty = MetricFamily::new("nothing", MetricType::Gauge);

        let series = project(&[requests, latency, gc, empty], now());
        assert_eq!(series.len(), 4);
        for s in &series {
            assert_eq!(s.labels[0].name, METRIC_NAME_LABEL);
            assert_eq!(s.timestamp_ms, 1_700_000_000_123);
        }

        assert_eq!(series[0].name(), Some("requests_total"));
        assert_eq!(
            series[0].labels[1..],
            [Label::new("code", "200"), Label::new("method", "get")]
        );
        assert_eq!(series[0].value, 10.0);
        assert_eq!(series[2].value, 4.5);
        assert_eq!(series[3].value, 1.25);
    }

    #[test]
    fn metric_level_name_label_is_not_duplicated() {
        let mut family = MetricFamily::new("up", MetricType::Gauge);
        family.push(Metric::new(Value::Gauge(1.0)).with_label(METRIC_NAME_LABEL, "spoofed"));
        let series = project(&[family], now());
        assert_eq!(series[0].labels.len(), 1);
        assert_eq!(series[0].name(), Some("up"));
    }
}
