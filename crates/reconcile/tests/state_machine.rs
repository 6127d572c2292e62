#![forbid(unsafe_code)]

use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use otelsync_collector::{synthesize, OpenTelemetryCollector};
use otelsync_core::{ParentMeta, PipelineParameters, ReconcileOutcome, ANNOTATION_STOP};
use otelsync_reconcile::{reconcile, MutationOp, ReconcileError, Reconciler};
use otelsync_store::{MemoryStore, OpCounts, StoreError, StoreOp};
use serde_json::json;

fn params(endpoint: &str) -> PipelineParameters {
    PipelineParameters { scrape_interval: "30s".into(), endpoint: endpoint.into() }
}

fn metric_names() -> Vec<String> { vec!["req_count".to_string()] }

fn parent() -> ParentMeta { ParentMeta::new("sklearn-iris", "kserve-test") }

fn stopped_parent() -> ParentMeta { parent().with_annotation(ANNOTATION_STOP, "true") }

fn reconciler(store: &Arc<MemoryStore>, parent: &ParentMeta) -> Reconciler<Arc<MemoryStore>> {
    Reconciler::new(Arc::clone(store), parent, &metric_names(), &params("collector.ns.svc:4317"))
}

#[tokio::test]
async fn create_then_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let r = reconciler(&store, &parent());

    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Created);
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);

    assert_eq!(store.counts(), OpCounts { gets: 2, creates: 1, updates: 0, deletes: 0 });
    let stored = store.peek("kserve-test", "sklearn-iris").await.unwrap();
    assert_eq!(stored.spec, r.desired().spec);
}

#[tokio::test]
async fn stopped_and_absent_is_skipped_without_writes() {
    let store = Arc::new(MemoryStore::new());
    let r = reconciler(&store, &stopped_parent());

    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Skipped);
    assert_eq!(store.counts().writes(), 0);
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn stopped_with_existing_deletes_once() {
    let store = Arc::new(MemoryStore::new());
    // A finalizer keeps the object around in a deleting state after the first delete.
    let mut existing = synthesize(&parent(), &metric_names(), &params("collector.ns.svc:4317"));
    existing.metadata.finalizers = Some(vec!["opentelemetry.io/finalizer".into()]);
    store.seed(existing).await.unwrap();

    let r = reconciler(&store, &stopped_parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Deleted);
    assert_eq!(store.counts().deletes, 1);
    assert!(store.peek("kserve-test", "sklearn-iris").await.unwrap().metadata.deletion_timestamp.is_some());

    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Skipped);
    assert_eq!(store.counts().deletes, 1);
}

#[tokio::test]
async fn stopped_with_existing_removes_object_without_finalizers() {
    let store = Arc::new(MemoryStore::new());
    reconciler(&store, &parent()).reconcile().await.unwrap();

    let r = reconciler(&store, &stopped_parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Deleted);
    assert!(store.peek("kserve-test", "sklearn-iris").await.is_none());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Skipped);
}

#[tokio::test]
async fn spec_change_updates_with_carried_resource_version() {
    let store = Arc::new(MemoryStore::new());
    let old = synthesize(&parent(), &metric_names(), &params("old-collector.ns.svc:4317"));
    let seeded = store.seed(old).await.unwrap();
    let seeded_rv = seeded.resource_version();

    let r = reconciler(&store, &parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Updated);
    assert_eq!(store.counts().updates, 1);

    let stored = store.peek("kserve-test", "sklearn-iris").await.unwrap();
    assert_eq!(stored.spec.config.exporters.otlp.endpoint, "collector.ns.svc:4317");
    // The store only accepts the replace when the seeded token was carried; it then bumps it.
    assert_ne!(stored.resource_version(), seeded_rv);
    assert_eq!(stored.metadata.uid, seeded.metadata.uid);
    // The desired object itself is left untouched.
    assert!(r.desired().metadata.resource_version.is_none());
}

#[tokio::test]
async fn metadata_only_difference_is_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let mut existing = synthesize(&parent(), &metric_names(), &params("collector.ns.svc:4317"));
    existing.metadata.labels = Some([("team".to_string(), "ml".to_string())].into_iter().collect());
    existing.metadata.annotations = Some([("edited-by".to_string(), "kubectl".to_string())].into_iter().collect());
    existing.metadata.resource_version = Some("999".into());
    store.seed(existing).await.unwrap();

    let r = reconciler(&store, &parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
    assert_eq!(store.counts().writes(), 0);
}

#[tokio::test]
async fn metric_list_change_updates() {
    let store = Arc::new(MemoryStore::new());
    store.seed(synthesize(&parent(), &[], &params("collector.ns.svc:4317"))).await.unwrap();

    let r = reconciler(&store, &parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Updated);
    let stored = store.peek("kserve-test", "sklearn-iris").await.unwrap();
    assert!(stored.spec.config.processors.filter.is_some());
}

/// The desired collector as a hand-edited stored copy would read back.
fn edited(edit: impl FnOnce(&mut serde_json::Value)) -> OpenTelemetryCollector {
    let mut v = serde_json::to_value(synthesize(&parent(), &metric_names(), &params("collector.ns.svc:4317"))).unwrap();
    edit(&mut v);
    serde_json::from_value(v).unwrap()
}

#[tokio::test]
async fn unmodelled_drift_is_replaced() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(edited(|v| {
            v["spec"]["config"]["processors"]["batch"] = json!({ "timeout": "1s" });
            v["spec"]["image"] = json!("otel/collector:0.99");
        }))
        .await
        .unwrap();

    let r = reconciler(&store, &parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Updated);
    let stored = store.peek("kserve-test", "sklearn-iris").await.unwrap();
    assert!(stored.spec.config.processors.extra.is_empty());
    assert!(stored.spec.extra.is_empty());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
}

#[tokio::test]
async fn unrecognised_stage_keys_and_values_are_replaced() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(edited(|v| {
            v["spec"]["config"]["service"]["pipelines"]["metrics"]["processors"] =
                json!(["resourcedetection/env", "transform", "batch"]);
            v["spec"]["config"]["exporters"]["otlp"]["compression"] = json!("snappy");
        }))
        .await
        .unwrap();

    let r = reconciler(&store, &parent());
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Updated);
    assert_eq!(store.counts().updates, 1);
    let stored = store.peek("kserve-test", "sklearn-iris").await.unwrap();
    assert_eq!(stored.spec, r.desired().spec);
}

#[tokio::test]
async fn lookup_failure_propagates_without_writes() {
    let store = Arc::new(MemoryStore::new());
    store.inject_failure(StoreOp::Get, "connection refused").await;

    let err = reconciler(&store, &parent()).reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Lookup { .. }), "err={}", err);
    assert!(err.to_string().contains("kserve-test/sklearn-iris"), "err={}", err);
    assert!(err.to_string().contains("connection refused"), "err={}", err);
    assert_eq!(store.counts().writes(), 0);
}

#[tokio::test]
async fn mutation_failures_propagate_with_operation() {
    let store = Arc::new(MemoryStore::new());
    store.inject_failure(StoreOp::Create, "admission webhook denied").await;
    let err = reconciler(&store, &parent()).reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Mutation { op: MutationOp::Create, .. }), "err={}", err);

    // No retry happened: the next call creates.
    assert_eq!(reconciler(&store, &parent()).reconcile().await.unwrap(), ReconcileOutcome::Created);
    assert_eq!(store.counts().creates, 2);

    store.inject_failure(StoreOp::Delete, "forbidden").await;
    let err = reconciler(&store, &stopped_parent()).reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Mutation { op: MutationOp::Delete, .. }), "err={}", err);
}

/// Store that serves a stale read, as a racing writer would leave it.
struct StaleRead {
    inner: MemoryStore,
    stale: OpenTelemetryCollector,
}

#[async_trait::async_trait]
impl otelsync_store::CollectorStore for StaleRead {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<OpenTelemetryCollector>, StoreError> {
        Ok(Some(self.stale.clone()))
    }
    async fn create(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> { self.inner.create(obj).await }
    async fn update(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> { self.inner.update(obj).await }
    async fn delete(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> { self.inner.delete(obj).await }
}

#[tokio::test]
async fn stale_token_conflict_surfaces() {
    let inner = MemoryStore::new();
    let stale = inner.seed(synthesize(&parent(), &[], &params("a:4317"))).await.unwrap();
    // Another writer moves the object on.
    let mut moved = stale.clone();
    moved.spec.config.exporters.otlp.endpoint = "b:4317".into();
    otelsync_store::CollectorStore::update(&inner, &moved).await.unwrap();

    let store = StaleRead { inner, stale };
    let desired = synthesize(&parent(), &metric_names(), &params("collector.ns.svc:4317"));
    let err = reconcile(&desired, &store, &|_: &OpenTelemetryCollector| false).await.unwrap_err();
    match err {
        ReconcileError::Mutation { op: MutationOp::Update, source, .. } => assert!(source.is_conflict()),
        other => panic!("unexpected {}", other),
    }
}

#[tokio::test]
async fn custom_stop_signal_overrides_annotation() {
    let store = Arc::new(MemoryStore::new());
    let r = reconciler(&store, &parent()).with_stop_signal(|_: &OpenTelemetryCollector| true);
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Skipped);
}

#[tokio::test]
async fn owner_reference_is_created_with_the_collector() {
    let store = Arc::new(MemoryStore::new());
    let mut r = reconciler(&store, &parent());
    let owner = ConfigMap {
        metadata: ObjectMeta {
            name: Some("sklearn-iris".into()),
            namespace: Some("kserve-test".into()),
            uid: Some("4a3c1a4e-0000-0000-0000-000000000001".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    r.set_controller_reference(&owner, &()).unwrap();
    assert_eq!(r.reconcile().await.unwrap(), ReconcileOutcome::Created);

    let stored = store.peek("kserve-test", "sklearn-iris").await.unwrap();
    let refs = stored.owner_references();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].uid, "4a3c1a4e-0000-0000-0000-000000000001");
    assert_eq!(refs[0].controller, Some(true));
}
