//! otelsync reconcile: keeps a derived `OpenTelemetryCollector` in line with
//! its parent.
//!
//! One invocation reads the stored collector once and issues at most one
//! write (create, replace or delete). Retries and requeues belong to the
//! calling control loop; every store failure is returned to it.

#![forbid(unsafe_code)]

pub mod ownership;
pub mod stop;

use std::fmt;
use std::time::Instant;

use kube::{Resource, ResourceExt};
use metrics::{counter, histogram};
use otelsync_collector::{object_key, spec_equals, synthesize, OpenTelemetryCollector};
use otelsync_core::{ParentMeta, PipelineParameters, ReconcileOutcome};
use otelsync_store::{CollectorStore, StoreError};
use tracing::{debug, error, info};

pub use ownership::{set_controller_reference, OwnershipError};
pub use stop::{StopAnnotation, StopSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Reading the stored collector failed for a reason other than absence.
    #[error("failed to get existing OTel Collector {key}: {source}")]
    Lookup { key: String, #[source] source: StoreError },
    /// The store rejected a create, replace or delete (stale writes included).
    #[error("failed to {op} OTel Collector {key}: {source}")]
    Mutation { op: MutationOp, key: String, #[source] source: StoreError },
}

fn mutation_failed(op: MutationOp, key: &str, source: StoreError) -> ReconcileError {
    error!(op = %op, key = %key, error = %source, "OTel Collector {} failed", op);
    counter!("otelsync_reconcile_errors_total", 1, "op" => op.as_str());
    ReconcileError::Mutation { op, key: key.to_string(), source }
}

/// Drive the stored collector towards `desired`.
///
/// | stored        | stopped | action               |
/// |---------------|---------|----------------------|
/// | absent        | yes     | `Skipped`            |
/// | absent        | no      | create → `Created`   |
/// | present       | yes     | delete → `Deleted`   |
/// | being deleted | yes     | `Skipped`            |
/// | present       | no      | replace if the spec differs → `Updated`, else `Unchanged` |
pub async fn reconcile<S, P>(
    desired: &OpenTelemetryCollector,
    store: &S,
    stop: &P,
) -> Result<ReconcileOutcome, ReconcileError>
where
    S: CollectorStore + ?Sized,
    P: StopSignal + ?Sized,
{
    let t0 = Instant::now();
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    let key = object_key(desired);

    let existing = store.get(&namespace, &name).await.map_err(|source| {
        counter!("otelsync_reconcile_errors_total", 1, "op" => "get");
        ReconcileError::Lookup { key: key.clone(), source }
    })?;
    let force_stop = stop.is_force_stopped(desired);

    let outcome = match (existing, force_stop) {
        (None, true) => ReconcileOutcome::Skipped,
        (Some(existing), true) => {
            if existing.meta().deletion_timestamp.is_some() {
                debug!(namespace = %namespace, name = %name, "OTel Collector already being deleted");
                ReconcileOutcome::Skipped
            } else {
                info!(namespace = %namespace, name = %name, "Deleting OTel Collector");
                store.delete(&existing).await.map_err(|e| mutation_failed(MutationOp::Delete, &key, e))?;
                ReconcileOutcome::Deleted
            }
        }
        (None, false) => {
            info!(namespace = %namespace, name = %name, "Creating OTel Collector");
            store.create(desired).await.map_err(|e| mutation_failed(MutationOp::Create, &key, e))?;
            ReconcileOutcome::Created
        }
        (Some(existing), false) => {
            if spec_equals(desired, &existing) {
                ReconcileOutcome::Unchanged
            } else {
                let mut replacement = desired.clone();
                replacement.metadata.resource_version = existing.metadata.resource_version.clone();
                info!(namespace = %namespace, name = %name, rv = ?replacement.metadata.resource_version, "Updating OTel Collector");
                store.update(&replacement).await.map_err(|e| mutation_failed(MutationOp::Update, &key, e))?;
                ReconcileOutcome::Updated
            }
        }
    };

    counter!("otelsync_reconcile_total", 1, "outcome" => outcome.as_str());
    histogram!("otelsync_reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    debug!(key = %key, outcome = %outcome, "reconcile finished");
    Ok(outcome)
}

/// Reconciler for one parent: owns the synthesized collector and the store handle.
pub struct Reconciler<S, P = StopAnnotation> {
    store: S,
    stop: P,
    desired: OpenTelemetryCollector,
}

impl<S: CollectorStore> Reconciler<S> {
    pub fn new(store: S, parent: &ParentMeta, metric_names: &[String], params: &PipelineParameters) -> Self {
        Self::from_desired(store, synthesize(parent, metric_names, params))
    }

    pub fn from_desired(store: S, desired: OpenTelemetryCollector) -> Self {
        Self { store, stop: StopAnnotation, desired }
    }
}

impl<S: CollectorStore, P: StopSignal> Reconciler<S, P> {
    /// Replace the force-stop predicate.
    pub fn with_stop_signal<Q: StopSignal>(self, stop: Q) -> Reconciler<S, Q> {
        Reconciler { store: self.store, stop, desired: self.desired }
    }

    pub fn desired(&self) -> &OpenTelemetryCollector { &self.desired }

    /// Record `owner` as controller of the desired collector (before it is created).
    pub fn set_controller_reference<K: Resource>(&mut self, owner: &K, dt: &K::DynamicType) -> Result<(), OwnershipError> {
        set_controller_reference(owner, dt, &mut self.desired)
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ReconcileError> {
        reconcile(&self.desired, &self.store, &self.stop).await
    }
}
