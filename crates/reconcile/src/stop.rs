//! Parent force-stop predicate.

use kube::ResourceExt;
use otelsync_collector::OpenTelemetryCollector;
use otelsync_core::ANNOTATION_STOP;

/// Decides whether the parent asked for its runtime to be stopped.
pub trait StopSignal: Send + Sync {
    fn is_force_stopped(&self, desired: &OpenTelemetryCollector) -> bool;
}

/// Reads the stop annotation that synthesis copied from the parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopAnnotation;

impl StopSignal for StopAnnotation {
    fn is_force_stopped(&self, desired: &OpenTelemetryCollector) -> bool {
        desired
            .annotations()
            .get(ANNOTATION_STOP)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

impl<F> StopSignal for F
where
    F: Fn(&OpenTelemetryCollector) -> bool + Send + Sync,
{
    fn is_force_stopped(&self, desired: &OpenTelemetryCollector) -> bool { self(desired) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otelsync_collector::synthesize;
    use otelsync_core::{ParentMeta, PipelineParameters};

    fn desired(parent: ParentMeta) -> OpenTelemetryCollector {
        synthesize(&parent, &[], &PipelineParameters::default())
    }

    #[test]
    fn stop_annotation_is_case_insensitive() {
        let stop = StopAnnotation;
        assert!(!stop.is_force_stopped(&desired(ParentMeta::new("a", "ns"))));
        assert!(stop.is_force_stopped(&desired(ParentMeta::new("a", "ns").with_annotation(ANNOTATION_STOP, "True"))));
        assert!(!stop.is_force_stopped(&desired(ParentMeta::new("a", "ns").with_annotation(ANNOTATION_STOP, "false"))));
        assert!(!stop.is_force_stopped(&desired(ParentMeta::new("a", "ns").with_annotation(ANNOTATION_STOP, "yes"))));
    }

    #[test]
    fn closures_are_stop_signals() {
        let always = |_: &OpenTelemetryCollector| true;
        assert!(always.is_force_stopped(&desired(ParentMeta::new("a", "ns"))));
    }
}
