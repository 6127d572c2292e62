//! Desired-state synthesis: parent metadata + parameters -> collector object.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use otelsync_core::{
    ExporterKey, ParentMeta, PipelineParameters, ReceiverKey, ANNOTATION_PROMETHEUS_PORT, DEFAULT_PROMETHEUS_PORT,
    JOB_NAME_OTEL_COLLECTOR,
};
use tracing::info;

use crate::crd::{
    CollectorConfig, CollectorMode, Compression, Exporters, FilterProcessor, Lenient, MatchType, MetricFilter,
    MetricMatch, OpenTelemetryCollector, OpenTelemetryCollectorSpec, OtlpExporter, Pipeline, Pipelines,
    PrometheusConfig, PrometheusReceiver, Processors, Receivers, ResourceDetectionProcessor, ScrapeConfig, Service,
    StatementGroup, StaticConfig, TlsSettings, TransformContext, TransformProcessor, Unmodelled,
};

pub const DETECTOR_ENV: &str = "env";
pub const RESOURCE_DETECTION_TIMEOUT: &str = "2s";

/// Datapoint-level copies of the workload identity held on the resource.
pub const STATEMENT_SET_NAMESPACE: &str = r#"set(attributes["namespace"], resource.attributes["k8s.namespace.name"])"#;
pub const STATEMENT_SET_DEPLOYMENT: &str = r#"set(attributes["deployment"], resource.attributes["k8s.deployment.name"])"#;
pub const STATEMENT_SET_POD: &str = r#"set(attributes["pod"], resource.attributes["k8s.pod.name"])"#;

/// Build the collector that should exist for `parent`.
///
/// An empty `metric_names` keeps every scraped metric (no filter stage).
/// Port and endpoint strings are passed through uninterpreted.
pub fn synthesize(parent: &ParentMeta, metric_names: &[String], params: &PipelineParameters) -> OpenTelemetryCollector {
    let port = scrape_port(parent);

    let processors = Processors {
        resource_detection: ResourceDetectionProcessor {
            detectors: vec![DETECTOR_ENV.to_string()],
            timeout: RESOURCE_DETECTION_TIMEOUT.to_string(),
            override_existing: false,
            ..Default::default()
        },
        transform: TransformProcessor {
            metric_statements: vec![StatementGroup {
                context: TransformContext::Datapoint.into(),
                statements: vec![
                    STATEMENT_SET_NAMESPACE.to_string(),
                    STATEMENT_SET_DEPLOYMENT.to_string(),
                    STATEMENT_SET_POD.to_string(),
                ],
                extra: Unmodelled::new(),
            }],
            ..Default::default()
        },
        filter: (!metric_names.is_empty()).then(|| FilterProcessor {
            metrics: MetricFilter {
                include: MetricMatch {
                    match_type: MatchType::Strict.into(),
                    metric_names: metric_names.to_vec(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    let pipeline = Pipeline {
        receivers: vec![ReceiverKey::Prometheus.into()],
        processors: processors.keys().into_iter().map(Lenient::from).collect(),
        exporters: vec![ExporterKey::Otlp.into()],
        ..Default::default()
    };

    let receivers = Receivers {
        prometheus: PrometheusReceiver {
            config: PrometheusConfig {
                scrape_configs: vec![ScrapeConfig {
                    job_name: JOB_NAME_OTEL_COLLECTOR.to_string(),
                    scrape_interval: params.scrape_interval.clone(),
                    static_configs: vec![StaticConfig {
                        targets: vec![format!("localhost:{}", port)],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let exporters = Exporters {
        otlp: OtlpExporter {
            endpoint: params.endpoint.clone(),
            compression: Compression::Disabled.into(),
            // Sidecar traffic stays on loopback / the local network.
            tls: TlsSettings { insecure: true, ..Default::default() },
            ..Default::default()
        },
        ..Default::default()
    };

    let spec = OpenTelemetryCollectorSpec {
        mode: CollectorMode::Sidecar.into(),
        config: CollectorConfig {
            receivers,
            processors,
            exporters,
            service: Service {
                pipelines: Pipelines { metrics: pipeline, ..Default::default() },
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let mut collector = OpenTelemetryCollector::new(&parent.name, spec);
    collector.metadata.namespace = Some(parent.namespace.clone());
    if !parent.annotations.is_empty() {
        collector.metadata.annotations = Some(parent.annotations.clone());
    }
    collector
}

fn scrape_port(parent: &ParentMeta) -> &str {
    match parent.annotation(ANNOTATION_PROMETHEUS_PORT) {
        Some(port) => port,
        None => {
            info!(
                namespace = %parent.namespace,
                name = %parent.name,
                annotation = ANNOTATION_PROMETHEUS_PORT,
                default = DEFAULT_PROMETHEUS_PORT,
                "port annotation missing; using default to configure OTel Collector"
            );
            DEFAULT_PROMETHEUS_PORT
        }
    }
}

/// Project Kubernetes object metadata onto the synthesis input.
pub fn parent_meta(meta: &ObjectMeta) -> ParentMeta {
    ParentMeta {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
    }
}
