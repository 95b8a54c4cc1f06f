//! The message exchange: the unit of work routed through the engine.
//!
//! An exchange is exclusively owned by whichever step currently holds it and is
//! moved, never shared, between steps. Pooled instances are recycled through
//! [`Exchange::reset`], which wipes every trace of the previous cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::{ClockSource, ExchangeClock, SystemClock};
use crate::error::{ExchangeFailure, FinalizationError};
use crate::message::Message;
use crate::types::{EndpointInfo, ExchangePattern, Value};
use crate::unit_of_work::UnitOfWork;

/// Property linking a correlated copy back to the exchange it was copied from.
pub const CORRELATION_ID: &str = "relay.correlationId";

/// One hop recorded by message history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Label of the step that processed the exchange.
    pub node: String,
    /// Workflow the step belongs to, if any.
    pub route_id: Option<String>,
    /// Clock reading when the step started.
    pub started_millis: u64,
    /// Time spent in the step.
    pub elapsed_millis: u64,
}

/// A message exchange.
#[derive(Debug)]
pub struct Exchange {
    exchange_id: String,
    pattern: ExchangePattern,
    message: Message,
    properties: BTreeMap<String, Value>,
    failure: Option<Arc<ExchangeFailure>>,
    from_endpoint: Option<EndpointInfo>,
    clock: ExchangeClock,
    unit_of_work: Option<UnitOfWork>,
    history: Vec<HistoryEntry>,
    route_stop: bool,
    rollback_only: bool,
    transacted: bool,
    done: bool,
}

impl Exchange {
    /// Starts building an exchange with the given id.
    pub fn builder(exchange_id: impl Into<String>) -> ExchangeBuilder {
        ExchangeBuilder {
            exchange_id: exchange_id.into(),
            pattern: ExchangePattern::default(),
            message: Message::default(),
            from_endpoint: None,
            clock_source: None,
        }
    }

    // -- identity -----------------------------------------------------------

    #[must_use]
    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: ExchangePattern) {
        self.pattern = pattern;
    }

    #[must_use]
    pub fn from_endpoint(&self) -> Option<&EndpointInfo> {
        self.from_endpoint.as_ref()
    }

    pub fn set_from_endpoint(&mut self, endpoint: Option<EndpointInfo>) {
        self.from_endpoint = endpoint;
    }

    // -- payload ------------------------------------------------------------

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    // -- failure ------------------------------------------------------------

    #[must_use]
    pub fn failure(&self) -> Option<&Arc<ExchangeFailure>> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Records a failure, replacing any earlier one.
    pub fn set_failure(&mut self, failure: impl Into<ExchangeFailure>) {
        self.failure = Some(Arc::new(failure.into()));
    }

    pub fn take_failure(&mut self) -> Option<Arc<ExchangeFailure>> {
        self.failure.take()
    }

    // -- flags --------------------------------------------------------------

    /// Whether remaining steps should be skipped. Not a failure.
    #[must_use]
    pub fn is_route_stop(&self) -> bool {
        self.route_stop
    }

    pub fn set_route_stop(&mut self, stop: bool) {
        self.route_stop = stop;
    }

    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn set_rollback_only(&mut self, rollback_only: bool) {
        self.rollback_only = rollback_only;
    }

    /// True if marked transacted or if the unit of work is a transaction member.
    #[must_use]
    pub fn is_transacted(&self) -> bool {
        self.transacted
            || self
                .unit_of_work
                .as_ref()
                .is_some_and(UnitOfWork::is_transacted)
    }

    pub fn set_transacted(&mut self, transacted: bool) {
        self.transacted = transacted;
    }

    // -- clock and history --------------------------------------------------

    #[must_use]
    pub fn clock(&self) -> &ExchangeClock {
        &self.clock
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    // -- unit of work -------------------------------------------------------

    #[must_use]
    pub fn unit_of_work(&self) -> Option<&UnitOfWork> {
        self.unit_of_work.as_ref()
    }

    pub fn unit_of_work_mut(&mut self) -> Option<&mut UnitOfWork> {
        self.unit_of_work.as_mut()
    }

    /// Attaches a unit of work, returning the one it replaced.
    pub fn attach_unit_of_work(&mut self, uow: UnitOfWork) -> Option<UnitOfWork> {
        self.unit_of_work.replace(uow)
    }

    pub fn detach_unit_of_work(&mut self) -> Option<UnitOfWork> {
        self.unit_of_work.take()
    }

    /// The attached unit of work, creating an empty one if needed.
    pub fn ensure_unit_of_work(&mut self) -> &mut UnitOfWork {
        self.unit_of_work.get_or_insert_with(UnitOfWork::new)
    }

    // -- lifecycle ----------------------------------------------------------

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Marks the exchange done, detaching its unit of work and firing its
    /// synchronizations. Only the first call has any effect.
    ///
    /// # Errors
    ///
    /// Propagates [`FinalizationError`] when a synchronization panicked. The
    /// exchange is still marked done.
    pub fn done(&mut self) -> Result<(), FinalizationError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        match self.unit_of_work.take() {
            Some(uow) => uow.done(self),
            None => Ok(()),
        }
    }

    /// Prepares the instance for a new routing cycle under a fresh id.
    pub fn reset(&mut self, exchange_id: String) {
        self.exchange_id = exchange_id;
        self.pattern = ExchangePattern::default();
        self.message.clear();
        self.properties.clear();
        self.failure = None;
        self.from_endpoint = None;
        self.clock.reset();
        self.unit_of_work = None;
        self.history.clear();
        self.route_stop = false;
        self.rollback_only = false;
        self.transacted = false;
        self.done = false;
    }

    /// Restarts the clock without touching anything else.
    pub fn restart_clock(&mut self) {
        self.clock.reset();
    }

    /// Copies everything except the unit of work into a new exchange.
    #[must_use]
    pub fn copy_with_id(&self, exchange_id: String) -> Exchange {
        let mut copy = Exchange::builder(exchange_id)
            .clock_source(Arc::clone(self.clock.source()))
            .build();
        self.copy_into(&mut copy);
        copy
    }

    /// Overwrites `target`'s content with this exchange's, keeping `target`'s
    /// id, clock, and unit of work.
    pub fn copy_into(&self, target: &mut Exchange) {
        target.pattern = self.pattern;
        target.message = self.message.clone();
        target.properties = self.properties.clone();
        target.failure = self.failure.clone();
        target.from_endpoint = self.from_endpoint.clone();
        target.history = self.history.clone();
        target.route_stop = self.route_stop;
        target.rollback_only = self.rollback_only;
        target.transacted = self.transacted;
    }
}

/// Builder for [`Exchange`].
pub struct ExchangeBuilder {
    exchange_id: String,
    pattern: ExchangePattern,
    message: Message,
    from_endpoint: Option<EndpointInfo>,
    clock_source: Option<Arc<dyn ClockSource>>,
}

impl ExchangeBuilder {
    #[must_use]
    pub fn pattern(mut self, pattern: ExchangePattern) -> Self {
        self.pattern = pattern;
        self
    }

    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        self.message = message;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.message.body = body.into();
        self
    }

    #[must_use]
    pub fn from_endpoint(mut self, endpoint: EndpointInfo) -> Self {
        self.from_endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn clock_source(mut self, source: Arc<dyn ClockSource>) -> Self {
        self.clock_source = Some(source);
        self
    }

    #[must_use]
    pub fn build(self) -> Exchange {
        let source = self
            .clock_source
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        Exchange {
            exchange_id: self.exchange_id,
            pattern: self.pattern,
            message: self.message,
            properties: BTreeMap::new(),
            failure: None,
            from_endpoint: self.from_endpoint,
            clock: ExchangeClock::start(source),
            unit_of_work: None,
            history: Vec::new(),
            route_stop: false,
            rollback_only: false,
            transacted: false,
            done: false,
        }
    }
}
