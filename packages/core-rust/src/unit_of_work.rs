//! Per-exchange bookkeeping: workflow scope, completion callbacks, and
//! transaction membership.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{info_span, warn, Span};

use crate::error::{panic_message, FinalizationError};
use crate::exchange::Exchange;

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

/// How an exchange finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// A completion callback registered on a unit of work.
///
/// Consumed when it fires, so each synchronization runs at most once.
pub trait Synchronization: Send {
    /// Invoked once when the exchange is marked done.
    fn on_done(self: Box<Self>, exchange: &Exchange, outcome: Outcome);

    /// Whether this callback may be moved to a correlated copy.
    fn allow_handover(&self) -> bool {
        true
    }
}

/// Closure-backed [`Synchronization`].
pub struct FnSynchronization<F> {
    callback: F,
    handover: bool,
}

impl<F> FnSynchronization<F>
where
    F: FnOnce(&Exchange, Outcome) + Send,
{
    /// Forbids moving this callback to a correlated copy.
    #[must_use]
    pub fn pinned(mut self) -> Self {
        self.handover = false;
        self
    }
}

impl<F> Synchronization for FnSynchronization<F>
where
    F: FnOnce(&Exchange, Outcome) + Send,
{
    fn on_done(self: Box<Self>, exchange: &Exchange, outcome: Outcome) {
        (self.callback)(exchange, outcome);
    }

    fn allow_handover(&self) -> bool {
        self.handover
    }
}

/// Wraps a closure as a [`Synchronization`].
pub fn on_completion<F>(callback: F) -> FnSynchronization<F>
where
    F: FnOnce(&Exchange, Outcome) + Send,
{
    FnSynchronization {
        callback,
        handover: true,
    }
}

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// Tracks one exchange's active workflows, pending synchronizations, and
/// transaction membership.
#[derive(Default)]
pub struct UnitOfWork {
    workflows: Vec<String>,
    synchronizations: Vec<Box<dyn Synchronization>>,
    transacted_by: BTreeSet<String>,
    diagnostic: bool,
}

impl UnitOfWork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables diagnostic-context bracketing around every step.
    #[must_use]
    pub fn with_diagnostic_context(mut self) -> Self {
        self.diagnostic = true;
        self
    }

    // -- workflow scope -----------------------------------------------------

    pub fn push_workflow(&mut self, workflow_id: impl Into<String>) {
        self.workflows.push(workflow_id.into());
    }

    pub fn pop_workflow(&mut self) -> Option<String> {
        self.workflows.pop()
    }

    #[must_use]
    pub fn current_workflow(&self) -> Option<&str> {
        self.workflows.last().map(String::as_str)
    }

    #[must_use]
    pub fn workflow_depth(&self) -> usize {
        self.workflows.len()
    }

    // -- synchronizations ---------------------------------------------------

    pub fn add_synchronization(&mut self, sync: impl Synchronization + 'static) {
        self.synchronizations.push(Box::new(sync));
    }

    pub fn add_boxed_synchronization(&mut self, sync: Box<dyn Synchronization>) {
        self.synchronizations.push(sync);
    }

    #[must_use]
    pub fn pending_synchronizations(&self) -> usize {
        self.synchronizations.len()
    }

    /// Moves every synchronization that allows handover into `target`.
    ///
    /// Returns how many were moved. Vetoing callbacks stay here.
    pub fn handover_synchronizations(&mut self, target: &mut UnitOfWork) -> usize {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.synchronizations)
            .into_iter()
            .partition(|s| s.allow_handover());
        self.synchronizations = kept;
        let count = moved.len();
        target.synchronizations.extend(moved);
        count
    }

    // -- transactions -------------------------------------------------------

    pub fn begin_transacted_by(&mut self, key: impl Into<String>) {
        self.transacted_by.insert(key.into());
    }

    pub fn end_transacted_by(&mut self, key: &str) {
        self.transacted_by.remove(key);
    }

    #[must_use]
    pub fn is_transacted_by(&self, key: &str) -> bool {
        self.transacted_by.contains(key)
    }

    #[must_use]
    pub fn is_transacted(&self) -> bool {
        !self.transacted_by.is_empty()
    }

    // -- step bracketing ----------------------------------------------------

    /// Whether steps must be bracketed with the diagnostic context.
    #[must_use]
    pub fn is_before_after_process(&self) -> bool {
        self.diagnostic
    }

    /// Span carrying the exchange id and current workflow, entered around steps.
    #[must_use]
    pub fn diagnostic_span(&self, exchange_id: &str) -> Span {
        info_span!(
            "exchange",
            exchange_id = %exchange_id,
            workflow = self.current_workflow().unwrap_or(""),
        )
    }

    // -- completion ---------------------------------------------------------

    /// Fires every synchronization once, in registration order.
    ///
    /// A panicking synchronization is logged and does not stop the rest.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizationError::SynchronizationPanicked`] if any callback panicked.
    pub fn done(mut self, exchange: &Exchange) -> Result<(), FinalizationError> {
        let outcome = if exchange.failure().is_some() {
            Outcome::Failed
        } else {
            Outcome::Completed
        };
        let syncs = std::mem::take(&mut self.synchronizations);
        let total = syncs.len();
        let mut failed = 0;
        for sync in syncs {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sync.on_done(exchange, outcome))) {
                failed += 1;
                warn!(
                    exchange_id = %exchange.exchange_id(),
                    panic = %panic_message(payload.as_ref()),
                    "synchronization panicked"
                );
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(FinalizationError::SynchronizationPanicked { failed, total })
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("workflows", &self.workflows)
            .field("synchronizations", &self.synchronizations.len())
            .field("transacted_by", &self.transacted_by)
            .field("diagnostic", &self.diagnostic)
            .finish()
    }
}
