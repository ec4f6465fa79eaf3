//! Wire schema of a remote-write request.
//!
//! Field numbers follow `prometheus.WriteRequest` from the remote-write
//! protocol, so payloads produced by Prometheus decode directly. Fields the
//! receiver does not use (metadata, exemplars, histograms) are skipped by
//! the decoder.

use prost::Message;

/// A batch of series sent in one request (`prometheus.WriteRequest`).
#[derive(Clone, PartialEq, Message)]
pub struct WriteBatch {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

/// One series with its labels and samples (`prometheus.TimeSeries`).
#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

/// A wire label pair (`prometheus.Label`).
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A single data point (`prometheus.Sample`).
#[derive(Clone, Copy, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl WriteBatch {
    /// Total number of samples across all series.
    pub fn sample_count(&self) -> usize {
        self.timeseries.iter().map(|ts| ts.samples.len()).sum()
    }
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { value, timestamp }
    }
}
