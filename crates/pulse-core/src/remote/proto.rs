//! Remote-write protobuf messages (`prometheus.WriteRequest` and friends).
//!
//! Declared by hand with `prost` derives; field numbers follow the upstream
//! `remote.proto` / `types.proto`. Metadata (field 3) is never sent.

/// Body of one remote-write request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TimeSeries {
    /// Kept in projection order, `__name__` first.
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl From<&crate::series::TimeSeries> for TimeSeries {
    fn from(series: &crate::series::TimeSeries) -> Self {
        Self {
            labels: series
                .labels
                .iter()
                .map(|l| Label {
                    name: l.name.clone(),
                    value: l.value.clone(),
                })
                .collect(),
            samples: vec![Sample {
                value: series.value,
                timestamp: series.timestamp_ms,
            }],
        }
    }
}
