use std::time::Instant;

use relay_core::Exchange;
use tracing::{info_span, Span};

use super::chain::{Advice, AdviceState};

struct Trace {
    span: Span,
    started: Instant,
}

/// Opens a `workflow` span per exchange and logs its duration and outcome.
#[derive(Debug, Clone)]
pub struct TracingAdvice {
    workflow_id: String,
}

impl TracingAdvice {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
        }
    }
}

impl Advice for TracingAdvice {
    fn name(&self) -> &str {
        "tracing"
    }

    fn has_state(&self) -> bool {
        true
    }

    fn before(&self, exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
        let span = info_span!(
            "workflow",
            workflow = %self.workflow_id,
            exchange_id = %exchange.exchange_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        Ok(Some(AdviceState::new(Trace {
            span,
            started: Instant::now(),
        })))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
        let Some(trace) = state.and_then(|s| s.downcast::<Trace>().ok()) else {
            return Ok(());
        };
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = trace.started.elapsed().as_millis() as u64;
        let outcome = if exchange.is_failed() { "failed" } else { "completed" };

        trace.span.record("duration_ms", duration_ms);
        trace.span.record("outcome", outcome);
        let _entered = trace.span.enter();
        tracing::debug!(
            workflow = %self.workflow_id,
            exchange_id = %exchange.exchange_id(),
            duration_ms,
            outcome,
            "workflow complete"
        );
        Ok(())
    }
}
