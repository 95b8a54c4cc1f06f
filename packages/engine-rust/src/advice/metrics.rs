use std::time::Instant;

use metrics::{counter, histogram};
use relay_core::Exchange;

use super::chain::{Advice, AdviceState};

pub const EXCHANGES_TOTAL: &str = "relay_exchanges_total";
pub const EXCHANGES_FAILED_TOTAL: &str = "relay_exchanges_failed_total";
pub const EXCHANGE_DURATION_SECONDS: &str = "relay_exchange_duration_seconds";

/// Records exchange counts and durations per workflow through the `metrics`
/// facade. Nothing is exported unless the application installs a recorder.
#[derive(Debug, Clone)]
pub struct MetricsAdvice {
    workflow_id: String,
}

impl MetricsAdvice {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
        }
    }
}

impl Advice for MetricsAdvice {
    fn name(&self) -> &str {
        "metrics"
    }

    fn has_state(&self) -> bool {
        true
    }

    fn before(&self, _exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
        counter!(EXCHANGES_TOTAL, "workflow" => self.workflow_id.clone()).increment(1);
        Ok(Some(AdviceState::new(Instant::now())))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
        if let Some(started) = state.and_then(|s| s.downcast::<Instant>().ok()) {
            histogram!(EXCHANGE_DURATION_SECONDS, "workflow" => self.workflow_id.clone())
                .record(started.elapsed().as_secs_f64());
        }
        if exchange.is_failed() {
            counter!(EXCHANGES_FAILED_TOTAL, "workflow" => self.workflow_id.clone()).increment(1);
        }
        Ok(())
    }
}
