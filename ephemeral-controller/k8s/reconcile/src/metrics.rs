use ephemeral_controller_k8s_api::Phase;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ReconcileMetrics {
    passes: Family<PassLabels, Counter>,
    errors: Counter,
    transitions: Family<TransitionLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct PassLabels {
    phase: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct TransitionLabels {
    from: &'static str,
    to: &'static str,
}

/// Pass label used for records whose deletion has begun.
pub(crate) const DELETING: &str = "deleting";

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "passes",
            "Count of reconciliation passes by the phase observed",
            metrics.passes.clone(),
        );
        reg.register(
            "errors",
            "Count of reconciliation passes that returned an error",
            metrics.errors.clone(),
        );
        reg.register(
            "transitions",
            "Count of persisted phase transitions",
            metrics.transitions.clone(),
        );
        metrics
    }

    pub(crate) fn pass(&self, phase: &'static str) {
        self.passes.get_or_create(&PassLabels { phase }).inc();
    }

    pub(crate) fn error(&self) {
        self.errors.inc();
    }

    pub(crate) fn transition(&self, from: Phase, to: Phase) {
        if from != to {
            self.transitions
                .get_or_create(&TransitionLabels {
                    from: from.as_str(),
                    to: to.as_str(),
                })
                .inc();
        }
    }

    #[cfg(test)]
    pub(crate) fn transitions(&self, from: Phase, to: Phase) -> u64 {
        self.transitions
            .get_or_create(&TransitionLabels {
                from: from.as_str(),
                to: to.as_str(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn errors(&self) -> u64 {
        self.errors.get()
    }
}
