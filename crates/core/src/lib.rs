//! otelsync core types: stage keys, synthesis inputs and reconcile outcomes.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Annotation on the parent carrying the local scrape port.
pub const ANNOTATION_PROMETHEUS_PORT: &str = "prometheus.kserve.io/port";
/// Port scraped when the parent does not carry [`ANNOTATION_PROMETHEUS_PORT`].
pub const DEFAULT_PROMETHEUS_PORT: &str = "8080";
/// Annotation on the parent signalling a force-stopped runtime.
pub const ANNOTATION_STOP: &str = "serving.kserve.io/stop";
/// Scrape job name of the single prometheus receiver job.
pub const JOB_NAME_OTEL_COLLECTOR: &str = "otel-collector";

/// Receiver stage keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReceiverKey {
    #[serde(rename = "prometheus")]
    Prometheus,
}

impl ReceiverKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverKey::Prometheus => "prometheus",
        }
    }
}

/// Processor stage keys. Variant order is pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessorKey {
    #[serde(rename = "resourcedetection/env")]
    ResourceDetectionEnv,
    #[serde(rename = "transform")]
    Transform,
    #[serde(rename = "filter/metrics")]
    FilterMetrics,
}

impl ProcessorKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKey::ResourceDetectionEnv => "resourcedetection/env",
            ProcessorKey::Transform => "transform",
            ProcessorKey::FilterMetrics => "filter/metrics",
        }
    }
}

/// Exporter stage keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExporterKey {
    #[serde(rename = "otlp")]
    Otlp,
}

impl ExporterKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExporterKey::Otlp => "otlp",
        }
    }
}

/// Named pipelines under `service.pipelines`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineKey {
    #[serde(rename = "metrics")]
    Metrics,
}

impl PipelineKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKey::Metrics => "metrics",
        }
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        })*
    };
}

display_as_str!(ReceiverKey, ProcessorKey, ExporterKey, PipelineKey, ReconcileOutcome);

/// Parent resource metadata the collector is derived from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentMeta {
    pub name: String,
    pub namespace: String,
    /// Copied verbatim onto the derived object.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ParentMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), annotations: BTreeMap::new() }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(|s| s.as_str())
    }
}

/// Observability parameters shared by every derived collector.
///
/// Values are opaque strings: `scrape_interval` is a duration such as `"30s"`
/// and `endpoint` is a `host:port` or URL. Neither is validated here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineParameters {
    pub scrape_interval: String,
    #[serde(rename = "metricReceiverEndpoint", alias = "endpoint")]
    pub endpoint: String,
}

/// File form of the collector inputs (YAML or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectorSettings {
    #[serde(flatten)]
    pub params: PipelineParameters,
    /// Metric names to keep; empty keeps everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_names: Vec<String>,
}

/// What a single reconcile invocation did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Skipped,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::Deleted => "deleted",
            ReconcileOutcome::Skipped => "skipped",
        }
    }
}
