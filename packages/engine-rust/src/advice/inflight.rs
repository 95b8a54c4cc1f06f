use std::sync::Arc;

use dashmap::DashMap;
use relay_core::Exchange;

use super::chain::{Advice, AdviceState};
use crate::shutdown::{InFlightGuard, ShutdownController};

/// Per-workflow counts of exchanges currently inside a workflow.
#[derive(Debug, Default)]
pub struct InflightRegistry {
    counts: DashMap<String, u64>,
}

impl InflightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, workflow_id: &str) {
        *self.counts.entry(workflow_id.to_string()).or_insert(0) += 1;
    }

    fn leave(&self, workflow_id: &str) {
        if let Some(mut count) = self.counts.get_mut(workflow_id) {
            *count = count.saturating_sub(1);
        }
    }

    #[must_use]
    pub fn count(&self, workflow_id: &str) -> u64 {
        self.counts.get(workflow_id).map_or(0, |count| *count)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }
}

/// Drop order releases the shutdown guard together with the slot.
struct Inflight {
    _guard: Option<InFlightGuard>,
}

/// Counts exchanges per workflow and holds a shutdown in-flight guard while
/// they are inside.
#[derive(Debug, Clone)]
pub struct InflightAdvice {
    workflow_id: String,
    registry: Arc<InflightRegistry>,
    shutdown: Option<Arc<ShutdownController>>,
}

impl InflightAdvice {
    pub fn new(workflow_id: impl Into<String>, registry: Arc<InflightRegistry>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            registry,
            shutdown: None,
        }
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }
}

impl Advice for InflightAdvice {
    fn name(&self) -> &str {
        "inflight"
    }

    fn has_state(&self) -> bool {
        true
    }

    fn before(&self, _exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
        self.registry.enter(&self.workflow_id);
        let guard = self.shutdown.as_ref().map(|s| s.in_flight_guard());
        Ok(Some(AdviceState::new(Inflight { _guard: guard })))
    }

    fn after(&self, _exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
        self.registry.leave(&self.workflow_id);
        drop(state);
        Ok(())
    }
}
