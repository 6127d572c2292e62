//! `OpenTelemetryCollector` (opentelemetry.io/v1beta1) resource model.
//!
//! Only the fields this crate manages are typed. Reading a stored object
//! never fails on its contents: missing members fall back to empty defaults,
//! members without a typed field land in `extra`, and enum values or stage
//! keys outside the known set are held as [`Lenient::Other`]. All of it takes
//! part in equality, so any drift compares unequal and gets replaced.

use std::collections::BTreeMap;

use kube::CustomResource;
use otelsync_core::{ExporterKey, ProcessorKey, ReceiverKey};
use serde::{Deserialize, Serialize};

/// Members of a stored object that have no typed field here.
pub type Unmodelled = BTreeMap<String, serde_json::Value>;

/// A value from a closed set, or whatever a stored object holds instead.
/// The synthesizer only ever writes `Known`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Lenient<T> {
    Known(T),
    Other(serde_json::Value),
}

impl<T: Default> Default for Lenient<T> {
    fn default() -> Self { Lenient::Known(T::default()) }
}

impl<T> Lenient<T> {
    /// Stand-in for a required member the stored object lacks.
    pub fn absent() -> Self { Lenient::Other(serde_json::Value::Null) }
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self { Lenient::Known(value) }
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "opentelemetry.io",
    version = "v1beta1",
    kind = "OpenTelemetryCollector",
    plural = "opentelemetrycollectors",
    namespaced,
    schema = "disabled",
    derive = "PartialEq"
)]
pub struct OpenTelemetryCollectorSpec {
    #[serde(default)]
    pub mode: Lenient<CollectorMode>,
    #[serde(default)]
    pub config: CollectorConfig,
    /// Operator fields such as `image` or `resources`.
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectorMode {
    #[default]
    Deployment,
    DaemonSet,
    StatefulSet,
    Sidecar,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectorConfig {
    #[serde(default)]
    pub receivers: Receivers,
    #[serde(default)]
    pub processors: Processors,
    #[serde(default)]
    pub exporters: Exporters,
    #[serde(default)]
    pub service: Service,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

// ---- receivers ----

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Receivers {
    #[serde(default)]
    pub prometheus: PrometheusReceiver,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrometheusReceiver {
    #[serde(default)]
    pub config: PrometheusConfig,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub scrape_configs: Vec<ScrapeConfig>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScrapeConfig {
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub scrape_interval: String,
    #[serde(default)]
    pub static_configs: Vec<StaticConfig>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

// ---- processors ----

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Processors {
    #[serde(rename = "resourcedetection/env", default)]
    pub resource_detection: ResourceDetectionProcessor,
    #[serde(default)]
    pub transform: TransformProcessor,
    #[serde(rename = "filter/metrics", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterProcessor>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

impl Processors {
    /// Keys of the configured processors in execution order.
    pub fn keys(&self) -> Vec<ProcessorKey> {
        let mut keys = vec![ProcessorKey::ResourceDetectionEnv, ProcessorKey::Transform];
        if self.filter.is_some() {
            keys.push(ProcessorKey::FilterMetrics);
        }
        keys
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceDetectionProcessor {
    #[serde(default)]
    pub detectors: Vec<String>,
    #[serde(default)]
    pub timeout: String,
    /// Overwrite resource attributes that are already set.
    #[serde(rename = "override", default)]
    pub override_existing: bool,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransformProcessor {
    #[serde(default)]
    pub metric_statements: Vec<StatementGroup>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatementGroup {
    #[serde(default = "Lenient::absent")]
    pub context: Lenient<TransformContext>,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransformContext {
    Resource,
    Scope,
    Metric,
    Datapoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterProcessor {
    #[serde(default)]
    pub metrics: MetricFilter,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricFilter {
    #[serde(default)]
    pub include: MetricMatch,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricMatch {
    #[serde(default)]
    pub match_type: Lenient<MatchType>,
    #[serde(default)]
    pub metric_names: Vec<String>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Strict,
    Regexp,
}

// ---- exporters ----

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Exporters {
    #[serde(default)]
    pub otlp: OtlpExporter,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OtlpExporter {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub compression: Lenient<Compression>,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Compression {
    #[default]
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "zstd")]
    Zstd,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TlsSettings {
    #[serde(default)]
    pub insecure: bool,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

// ---- service ----

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Service {
    #[serde(default)]
    pub pipelines: Pipelines,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pipelines {
    #[serde(default)]
    pub metrics: Pipeline,
    #[serde(flatten)]
    pub extra: Unmodelled,
}

/// Stage wiring of one pipeline; list order is execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    #[serde(default)]
    pub receivers: Vec<Lenient<ReceiverKey>>,
    #[serde(default)]
    pub processors: Vec<Lenient<ProcessorKey>>,
    #[serde(default)]
    pub exporters: Vec<Lenient<ExporterKey>>,
    #[serde(flatten)]
    pub extra: Unmodelled,
}
