use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use otelsync_collector::{parent_meta, synthesize};
use otelsync_core::{CollectorSettings, ParentMeta, PipelineParameters, ReconcileOutcome};
use otelsync_kubehub::{fetch_parent, get_kube_client, KubeStore};
use otelsync_reconcile::Reconciler;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "otelsyncctl", version, about = "Render and reconcile sidecar OTel Collectors")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    /// Namespace of the parent resource
    #[arg(long = "ns", global = true, env = "OTELSYNC_NAMESPACE", default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Args, Debug, Clone)]
struct CollectorArgs {
    /// Parent resource name (the collector gets the same name)
    #[arg(long = "name")]
    name: String,
    /// Parent annotation, repeatable: --annotation prometheus.kserve.io/port=9090
    #[arg(long = "annotation", value_parser = parse_annotation)]
    annotations: Vec<(String, String)>,
    /// Metric name to keep, repeatable (default: keep all)
    #[arg(long = "metric")]
    metrics: Vec<String>,
    /// Scrape interval, e.g. 30s
    #[arg(long = "scrape-interval", env = "OTELSYNC_SCRAPE_INTERVAL")]
    scrape_interval: Option<String>,
    /// Upstream OTLP endpoint (host:port)
    #[arg(long = "endpoint", env = "OTELSYNC_METRICS_ENDPOINT")]
    endpoint: Option<String>,
    /// Settings file (YAML or JSON: scrapeInterval, metricReceiverEndpoint, metricNames)
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the collector that would be reconciled
    Render {
        #[command(flatten)]
        args: CollectorArgs,
    },
    /// Reconcile the collector once against the current cluster
    Reconcile {
        #[command(flatten)]
        args: CollectorArgs,
        /// Parent GVK key (e.g. serving.kserve.io/v1beta1/InferenceService); when set the
        /// parent is fetched, its annotations are used and it becomes the controller owner
        #[arg(long = "parent")]
        parent: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("OTELSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("OTELSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid OTELSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_annotation(s: &str) -> Result<(String, String), String> {
    let (k, v) = s.split_once('=').ok_or_else(|| format!("invalid annotation '{}': expected key=value", s))?;
    if k.is_empty() {
        return Err(format!("invalid annotation '{}': empty key", s));
    }
    Ok((k.to_string(), v.to_string()))
}

fn parse_settings(text: &str) -> Result<CollectorSettings> {
    serde_yaml::from_str(text).context("parsing collector settings")
}

fn read_settings(path: &Path) -> Result<CollectorSettings> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_settings(&text)
}

/// Flags and env override the settings file field by field.
fn merge_settings(file: Option<CollectorSettings>, args: &CollectorArgs) -> Result<(Vec<String>, PipelineParameters)> {
    let mut settings = file.unwrap_or_default();
    if let Some(v) = &args.scrape_interval { settings.params.scrape_interval = v.clone(); }
    if let Some(v) = &args.endpoint { settings.params.endpoint = v.clone(); }
    if !args.metrics.is_empty() { settings.metric_names = args.metrics.clone(); }
    if settings.params.scrape_interval.is_empty() {
        return Err(anyhow!("missing scrape interval: pass --scrape-interval, OTELSYNC_SCRAPE_INTERVAL or scrapeInterval in --config"));
    }
    if settings.params.endpoint.is_empty() {
        return Err(anyhow!("missing endpoint: pass --endpoint, OTELSYNC_METRICS_ENDPOINT or metricReceiverEndpoint in --config"));
    }
    Ok((settings.metric_names, settings.params))
}

fn load_settings(args: &CollectorArgs) -> Result<(Vec<String>, PipelineParameters)> {
    let file = args.config.as_deref().map(read_settings).transpose()?;
    merge_settings(file, args)
}

fn flag_parent(name: &str, namespace: &str, annotations: &[(String, String)]) -> ParentMeta {
    let mut meta = ParentMeta::new(name, namespace);
    meta.annotations.extend(annotations.iter().cloned());
    meta
}

fn render_output<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct ReconcileRow<'a> {
    namespace: &'a str,
    name: &'a str,
    outcome: ReconcileOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { args } => {
            let (metric_names, params) = load_settings(&args)?;
            let parent = flag_parent(&args.name, &cli.namespace, &args.annotations);
            info!(ns = %cli.namespace, name = %args.name, metrics = metric_names.len(), "render invoked");
            render_output(cli.output, &synthesize(&parent, &metric_names, &params))?;
        }
        Commands::Reconcile { args, parent } => {
            let (metric_names, params) = load_settings(&args)?;
            info!(ns = %cli.namespace, name = %args.name, parent = ?parent, "reconcile invoked");
            let client = get_kube_client().await?;
            let store = KubeStore::new(client.clone());

            let fetched = match parent.as_deref() {
                Some(gvk) => Some(fetch_parent(client, gvk, &cli.namespace, &args.name).await?),
                None => None,
            };
            let meta = match &fetched {
                Some(p) => {
                    let mut meta = parent_meta(&p.object.metadata);
                    if meta.namespace.is_empty() { meta.namespace = cli.namespace.clone(); }
                    meta.annotations.extend(args.annotations.iter().cloned());
                    meta
                }
                None => flag_parent(&args.name, &cli.namespace, &args.annotations),
            };

            let mut reconciler = Reconciler::new(store, &meta, &metric_names, &params);
            if let Some(p) = &fetched {
                reconciler.set_controller_reference(&p.object, &p.resource)?;
            }

            let outcome = tokio::select! {
                res = reconciler.reconcile() => res?,
                _ = signal::ctrl_c() => {
                    warn!("Ctrl-C received; reconcile cancelled");
                    return Ok(());
                }
            };
            render_output(cli.output, &ReconcileRow { namespace: &meta.namespace, name: &meta.name, outcome })?;
        }
    }

    Ok(())
}
