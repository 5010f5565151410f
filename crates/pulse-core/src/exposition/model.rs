//! Structured family/metric model shared by the parser, the enricher and the
//! time-series projector.

use std::fmt;

/// A single `name="value"` label pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Type tag of a metric family as declared by `# TYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
    /// A type token outside the five classic kinds (`info`, `stateset`, ...).
    Other(String),
}

impl MetricType {
    pub fn from_token(token: &str) -> Self {
        match token {
            "counter" => MetricType::Counter,
            "gauge" => MetricType::Gauge,
            "histogram" => MetricType::Histogram,
            "summary" => MetricType::Summary,
            "untyped" => MetricType::Untyped,
            other => MetricType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Counter => f.write_str("counter"),
            MetricType::Gauge => f.write_str("gauge"),
            MetricType::Histogram => f.write_str("histogram"),
            MetricType::Summary => f.write_str("summary"),
            MetricType::Untyped => f.write_str("untyped"),
            MetricType::Other(name) => f.write_str(name),
        }
    }
}

/// Cumulative histogram payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub sum: f64,
    pub count: u64,
    /// `(upper bound, cumulative count)` in exposition order.
    pub buckets: Vec<(f64, u64)>,
}

/// Summary payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub sum: f64,
    pub count: u64,
    /// `(quantile, value)` in exposition order.
    pub quantiles: Vec<(f64, f64)>,
}

/// Value payload of one metric; the variant always matches the family type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram(Histogram),
    Summary(Summary),
    Other(f64),
}

impl Value {
    /// Returns an empty payload of the right variant for a family type.
    pub fn empty_for(kind: &MetricType) -> Self {
        match kind {
            MetricType::Counter => Value::Counter(0.0),
            MetricType::Gauge => Value::Gauge(0.0),
            MetricType::Untyped => Value::Untyped(0.0),
            MetricType::Histogram => Value::Histogram(Histogram::default()),
            MetricType::Summary => Value::Summary(Summary::default()),
            MetricType::Other(_) => Value::Other(0.0),
        }
    }

    /// The single scalar shipped for this payload.
    ///
    /// Histograms and summaries project to their sum only; bucket and
    /// quantile detail is dropped on the wire.
    pub fn scalar(&self) -> f64 {
        match self {
            Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) | Value::Other(v) => *v,
            Value::Histogram(h) => h.sum,
            Value::Summary(s) => s.sum,
        }
    }

    /// Whether identity labels are injected into metrics carrying this payload.
    pub fn accepts_identity_labels(&self) -> bool {
        !matches!(self, Value::Other(_))
    }
}

/// One labeled member of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    labels: Vec<Label>,
    pub value: Value,
    /// Explicit sample timestamp from the exposition, if any.
    pub timestamp_ms: Option<i64>,
}

impl Metric {
    pub fn new(value: Value) -> Self {
        Self {
            labels: Vec::new(),
            value,
            timestamp_ms: None,
        }
    }

    /// Builder-style label append. Replaces the value of an existing name so
    /// label names stay unique.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_label(name, value);
        self
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    /// Sets a label, overwriting any existing value for the name.
    pub fn set_label(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.labels.iter_mut().find(|l| l.name == name) {
            Some(existing) => existing.value = value,
            None => self.labels.push(Label { name, value }),
        }
    }

    /// Appends a label only if the name is not already present.
    ///
    /// Returns whether the label was added.
    pub fn add_label_if_absent(&mut self, name: &str, value: &str) -> bool {
        if self.has_label(name) {
            return false;
        }
        self.labels.push(Label::new(name, value));
        true
    }
}

/// A named group of metrics sharing a type.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub kind: MetricType,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: MetricType) -> Self {
        Self {
            name: name.into(),
            help: None,
            kind,
            metrics: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Single unlabeled gauge.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        let mut family = Self::new(name, MetricType::Gauge);
        family.metrics.push(Metric::new(Value::Gauge(value)));
        family
    }

    pub fn push(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }
}

/// Total number of metrics across families.
pub fn metric_count(families: &[MetricFamily]) -> usize {
    families.iter().map(|f| f.metrics.len()).sum()
}
