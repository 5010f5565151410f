//! Identity-label enrichment.
//!
//! The `EnrichmentDictionary` is built once at startup, wrapped in an `Arc`
//! and only ever read afterwards.

use std::collections::BTreeMap;

use thiserror::Error;

use super::model::{Label, MetricFamily};

/// Identity labels every deployment must resolve before shipping.
pub const REQUIRED_IDENTITY_LABELS: [&str; 4] = ["hostname", "subid", "vpsid", "product"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnrichError {
    #[error("identity label {0:?} is missing or empty")]
    MissingIdentityLabel(String),
}

/// Process-wide mapping from identity-label name to its resolved value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentDictionary {
    labels: BTreeMap<String, String>,
}

impl EnrichmentDictionary {
    /// Builds a dictionary that must contain every [`REQUIRED_IDENTITY_LABELS`] key.
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Result<Self, EnrichError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::with_required(entries, &REQUIRED_IDENTITY_LABELS)
    }

    /// Builds a dictionary that must contain a non-empty value for each of `required`.
    pub fn with_required<K, V>(
        entries: impl IntoIterator<Item = (K, V)>,
        required: &[&str],
    ) -> Result<Self, EnrichError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let labels: BTreeMap<String, String> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let dict = Self { labels };
        for name in required {
            dict.get(name)?;
        }
        Ok(dict)
    }

    /// Looks up an identity label; an absent or empty value is an error.
    pub fn get(&self, name: &str) -> Result<&str, EnrichError> {
        self.labels
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EnrichError::MissingIdentityLabel(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + Clone {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Injects every dictionary entry into every metric that lacks a label of
/// that name. Existing labels always win.
///
/// Metrics of families outside the five classic kinds are left untouched.
pub fn enrich_labels(
    families: Vec<MetricFamily>,
    dict: &EnrichmentDictionary,
) -> Vec<MetricFamily> {
    add_missing_labels(families, dict.iter())
}

/// Adds `labels` to every enrichable metric that lacks them, in order.
pub fn add_missing_labels<'a>(
    mut families: Vec<MetricFamily>,
    labels: impl Iterator<Item = (&'a str, &'a str)> + Clone,
) -> Vec<MetricFamily> {
    for family in &mut families {
        for metric in &mut family.metrics {
            if !metric.value.accepts_identity_labels() {
                continue;
            }
            for (name, value) in labels.clone() {
                metric.add_label_if_absent(name, value);
            }
        }
    }
    families
}

/// Convenience wrapper over [`add_missing_labels`] for owned label lists.
pub fn add_target_labels(families: Vec<MetricFamily>, labels: &[Label]) -> Vec<MetricFamily> {
    add_missing_labels(
        families,
        labels.iter().map(|l| (l.name.as_str(), l.value.as_str())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::model::{Histogram, Metric, MetricType, Summary, Value};

    fn dict() -> EnrichmentDictionary {
        EnrichmentDictionary::with_required([("hostname", "h1"), ("subid", "s1")], &["hostname"])
            .unwrap()
    }

    #[test]
    fn existing_label_wins_and_missing_is_injected() {
        let mut family = MetricFamily::new("up", MetricType::Gauge);
        family.push(Metric::new(Value::Gauge(1.0)).with_label("hostname", "custom"));

        let enriched = enrich_labels(vec![family], &dict());
        let metric = &enriched[0].metrics[0];
        assert_eq!(metric.label("hostname"), Some("custom"));
        assert_eq!(metric.label("subid"), Some("s1"));
        assert_eq!(metric.labels().len(), 2);
    }

    #[test]
    fn enrichment_applies_to_every_classic_kind() {
        let values = [
            Value::Counter(1.0),
            Value::Gauge(1.0),
            Value::Untyped(1.0),
            Value::Histogram(Histogram::default()),
            Value::Summary(Summary::default()),
        ];
        let families: Vec<MetricFamily> = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let mut family = MetricFamily::new(format!("m{i}"), MetricType::Untyped);
                family.push(Metric::new(value));
                family
            })
            .collect();

        for family in enrich_labels(families, &dict()) {
            assert_eq!(family.metrics[0].label("hostname"), Some("h1"), "{}", family.name);
        }
    }

    #[test]
    fn other_kinds_pass_through_unlabeled() {
        let mut family = MetricFamily::new("build", MetricType::Other("info".into()));
        family.push(Metric::new(Value::Other(1.0)).with_label("version", "1"));
        let enriched = enrich_labels(vec![family], &dict());
        assert_eq!(enriched[0].metrics[0].labels().len(), 1);
    }

    #[test]
    fn enrichment_is_idempotent() {
        let mut family = MetricFamily::new("up", MetricType::Counter);
        family.push(Metric::new(Value::Counter(1.0)).with_label("job", "x"));
        let once = enrich_labels(vec![family], &dict());
        let twice = enrich_labels(once.clone(), &dict());
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let err = EnrichmentDictionary::new([("hostname", "h1"), ("subid", "s1")]).unwrap_err();
        assert_eq!(err, EnrichError::MissingIdentityLabel("vpsid".into()));

        let err = EnrichmentDictionary::new([
            ("hostname", ""),
            ("subid", "s"),
            ("vpsid", "v"),
            ("product", "p"),
        ])
        .unwrap_err();
        assert_eq!(err, EnrichError::MissingIdentityLabel("hostname".into()));

        assert!(dict().get("product").is_err());
    }

    #[test]
    fn target_labels_do_not_overwrite() {
        let mut family = MetricFamily::new("req", MetricType::Counter);
        family.push(Metric::new(Value::Counter(1.0)).with_label("pod", "scraped"));
        let labelled = add_target_labels(
            vec![family],
            &[Label::new("pod", "discovered"), Label::new("namespace", "web")],
        );
        assert_eq!(labelled[0].metrics[0].label("pod"), Some("scraped"));
        assert_eq!(labelled[0].metrics[0].label("namespace"), Some("web"));
    }
}
