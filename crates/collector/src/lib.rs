//! otelsync collector: the `OpenTelemetryCollector` resource model and the
//! synthesizer that derives a sidecar metrics pipeline from a parent resource.

#![forbid(unsafe_code)]

pub mod crd;
pub mod synth;

pub use crd::{OpenTelemetryCollector, OpenTelemetryCollectorSpec};
pub use synth::{parent_meta, synthesize};

use kube::ResourceExt;

/// `namespace/name` of a collector, for logs and error messages.
pub fn object_key(obj: &OpenTelemetryCollector) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Structural equality of the whole stored spec, unmodelled members and
/// unrecognised values included. Metadata (labels, annotations,
/// resourceVersion, owner references) is not compared.
pub fn spec_equals(desired: &OpenTelemetryCollector, existing: &OpenTelemetryCollector) -> bool {
    desired.spec == existing.spec
}
