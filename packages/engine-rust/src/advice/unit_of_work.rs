use relay_core::{Exchange, UnitOfWork};
use tracing::warn;

use super::chain::{Advice, AdviceState};

/// Marker stored when this advice created the unit of work itself.
struct CreatedHere;

/// Gives every exchange a unit of work and tracks the workflow stack on it.
///
/// When the exchange arrives without a unit of work, one is created and the
/// exchange is finalized in `after`, firing its synchronizations. A unit of
/// work that already existed belongs to an outer workflow and is left open.
#[derive(Debug, Clone)]
pub struct UnitOfWorkAdvice {
    workflow_id: String,
    diagnostic: bool,
}

impl UnitOfWorkAdvice {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            diagnostic: false,
        }
    }

    /// Created units of work carry a diagnostic span around each step.
    #[must_use]
    pub fn with_diagnostic_context(mut self) -> Self {
        self.diagnostic = true;
        self
    }
}

impl Advice for UnitOfWorkAdvice {
    fn name(&self) -> &str {
        "unit-of-work"
    }

    fn has_state(&self) -> bool {
        true
    }

    fn before(&self, exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
        let created = exchange.unit_of_work().is_none();
        if created {
            let uow = if self.diagnostic {
                UnitOfWork::new().with_diagnostic_context()
            } else {
                UnitOfWork::new()
            };
            exchange.attach_unit_of_work(uow);
        }
        exchange.ensure_unit_of_work().push_workflow(self.workflow_id.clone());
        Ok(created.then(|| AdviceState::new(CreatedHere)))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
        if let Some(uow) = exchange.unit_of_work_mut() {
            uow.pop_workflow();
        }
        if state.is_some() {
            if let Err(err) = exchange.done() {
                warn!(
                    exchange_id = %exchange.exchange_id(),
                    workflow = %self.workflow_id,
                    error = %err,
                    "unit of work finalized with errors"
                );
                return Err(err.into());
            }
        }
        Ok(())
    }
}
