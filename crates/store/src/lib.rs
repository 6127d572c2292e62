//! otelsync store: the CRUD surface the reconciler drives, plus an in-RAM
//! implementation with optimistic concurrency for tests and dry runs.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use otelsync_collector::{object_key, OpenTelemetryCollector};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Store errors. `get` reports a missing object as `Ok(None)`, never `NotFound`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    /// The write carried a stale or missing resourceVersion.
    #[error("conflict: {key} (resourceVersion {sent:?}, stored {stored:?})")]
    Conflict { key: String, sent: Option<String>, stored: Option<String> },
    #[error("backend: {0}")]
    Backend(#[source] BoxError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool { matches!(self, StoreError::Conflict { .. }) }
}

/// Backing store for derived collectors.
#[async_trait::async_trait]
pub trait CollectorStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<OpenTelemetryCollector>, StoreError>;
    async fn create(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError>;
    /// Replace the stored object. Must reject a stale `resourceVersion`.
    async fn update(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError>;
    async fn delete(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: CollectorStore + ?Sized> CollectorStore for Arc<S> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<OpenTelemetryCollector>, StoreError> {
        (**self).get(namespace, name).await
    }
    async fn create(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> { (**self).create(obj).await }
    async fn update(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> { (**self).update(obj).await }
    async fn delete(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> { (**self).delete(obj).await }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
}

/// Per-operation call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub gets: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl OpCounts {
    pub fn writes(&self) -> u64 { self.creates + self.updates + self.deletes }
}

type Key = (String, String);

#[derive(Default)]
struct Inner {
    objects: FxHashMap<Key, OpenTelemetryCollector>,
    rv: u64,
    failures: FxHashMap<StoreOp, String>,
}

impl Inner {
    fn next_rv(&mut self) -> String {
        self.rv += 1;
        self.rv.to_string()
    }

    fn take_failure(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.failures.remove(&op) {
            Some(msg) => Err(StoreError::Backend(msg.into())),
            None => Ok(()),
        }
    }
}

/// In-RAM store keyed by namespace/name.
///
/// Semantics follow the API server closely enough for reconcile tests:
/// monotonically increasing resourceVersion, uid and creationTimestamp
/// assignment on create, rejection of stale updates, and finalizer-aware
/// deletion (objects with finalizers only get a deletionTimestamp).
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    gets: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

fn key_of(obj: &OpenTelemetryCollector) -> Result<Key, StoreError> {
    let ns = obj
        .namespace()
        .ok_or_else(|| StoreError::Backend(format!("{}: namespace required", obj.name_any()).into()))?;
    Ok((ns, obj.name_any()))
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn counts(&self) -> OpCounts {
        OpCounts {
            gets: self.gets.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// Fail the next call of `op` with a backend error.
    pub async fn inject_failure(&self, op: StoreOp, message: impl Into<String>) {
        self.inner.lock().await.failures.insert(op, message.into());
    }

    /// Insert or overwrite an object without counting it as a call. Returns the stored copy.
    pub async fn seed(&self, obj: OpenTelemetryCollector) -> Result<OpenTelemetryCollector, StoreError> {
        let key = key_of(&obj)?;
        let mut inner = self.inner.lock().await;
        let mut stored = obj;
        stored.metadata.resource_version = Some(inner.next_rv());
        stored.metadata.uid.get_or_insert_with(|| Uuid::new_v4().to_string());
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    /// Current stored copy, without counting it as a call.
    pub async fn peek(&self, namespace: &str, name: &str) -> Option<OpenTelemetryCollector> {
        let inner = self.inner.lock().await;
        inner.objects.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub async fn len(&self) -> usize { self.inner.lock().await.objects.len() }
}

#[async_trait::async_trait]
impl CollectorStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<OpenTelemetryCollector>, StoreError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Get)?;
        Ok(inner.objects.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn create(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        let key = key_of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Create)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(object_key(obj)));
        }
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(inner.next_rv());
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.deletion_timestamp = None;
        debug!(key = %object_key(obj), rv = ?stored.metadata.resource_version, "memory store create");
        inner.objects.insert(key, stored);
        Ok(())
    }

    async fn update(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        let key = key_of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Update)?;
        let current = inner.objects.get(&key).ok_or_else(|| StoreError::NotFound(object_key(obj)))?;
        if obj.metadata.resource_version.is_none() || obj.metadata.resource_version != current.metadata.resource_version {
            return Err(StoreError::Conflict {
                key: object_key(obj),
                sent: obj.metadata.resource_version.clone(),
                stored: current.metadata.resource_version.clone(),
            });
        }
        let mut stored = obj.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        stored.metadata.resource_version = Some(inner.next_rv());
        debug!(key = %object_key(obj), rv = ?stored.metadata.resource_version, "memory store update");
        inner.objects.insert(key, stored);
        Ok(())
    }

    async fn delete(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let key = key_of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Delete)?;
        let has_finalizers = match inner.objects.get(&key) {
            Some(current) => !current.finalizers().is_empty(),
            None => return Err(StoreError::NotFound(object_key(obj))),
        };
        if has_finalizers {
            let rv = inner.next_rv();
            if let Some(current) = inner.objects.get_mut(&key) {
                if current.metadata.deletion_timestamp.is_none() {
                    current.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                    current.metadata.resource_version = Some(rv);
                }
            }
            debug!(key = %object_key(obj), "memory store delete pending finalizers");
        } else {
            inner.objects.remove(&key);
            debug!(key = %object_key(obj), "memory store delete");
        }
        Ok(())
    }
}
