//! Controller owner references on the desired collector.
//!
//! Recording the reference lets the API server garbage-collect the collector
//! when its parent goes away. No store call is made here.

use kube::{Resource, ResourceExt};
use otelsync_collector::{object_key, OpenTelemetryCollector};

#[derive(Debug, thiserror::Error)]
pub enum OwnershipError {
    #[error("owner {kind} has no name or uid")]
    MissingIdentity { kind: String },
    #[error("cross-namespace owner references are disallowed: owner in {owner_namespace}, object in {object_namespace}")]
    CrossNamespace { owner_namespace: String, object_namespace: String },
    #[error("object {object} is already controlled by {kind} {name}")]
    AlreadyOwned { object: String, kind: String, name: String },
}

/// Make `owner` the controller of `obj`. Idempotent for the same owner.
pub fn set_controller_reference<K: Resource>(
    owner: &K,
    dt: &K::DynamicType,
    obj: &mut OpenTelemetryCollector,
) -> Result<(), OwnershipError> {
    let mut owner_ref = owner
        .controller_owner_ref(dt)
        .ok_or_else(|| OwnershipError::MissingIdentity { kind: K::kind(dt).to_string() })?;
    owner_ref.block_owner_deletion = Some(true);

    // Cluster-scoped owners may own namespaced objects; namespaced ones only within their namespace.
    if let Some(owner_ns) = owner.meta().namespace.as_deref() {
        let object_ns = obj.namespace().unwrap_or_default();
        if owner_ns != object_ns {
            return Err(OwnershipError::CrossNamespace {
                owner_namespace: owner_ns.to_string(),
                object_namespace: object_ns,
            });
        }
    }

    let object = object_key(obj);
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs.iter().find(|r| r.controller == Some(true) && r.uid != owner_ref.uid) {
        return Err(OwnershipError::AlreadyOwned { object, kind: other.kind.clone(), name: other.name.clone() });
    }
    match refs.iter_mut().find(|r| r.uid == owner_ref.uid) {
        Some(existing) => *existing = owner_ref,
        None => refs.push(owner_ref),
    }
    Ok(())
}
