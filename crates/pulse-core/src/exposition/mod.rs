//! Metrics exposition handling: the family model, the text parser and
//! identity-label enrichment.

pub mod enrich;
pub mod model;
pub mod parser;

pub use enrich::{EnrichError, EnrichmentDictionary, add_target_labels, enrich_labels};
pub use model::{Histogram, Label, Metric, MetricFamily, MetricType, Summary, Value};
pub use parser::{ParseError, parse_families, strip_metadata_comments};
