use std::fmt;
use std::sync::Arc;

use relay_core::{
    ClockSource, EndpointInfo, Exchange, ExchangePattern, FinalizationError, IdGenerator,
    SystemClock, UuidIdGenerator, CORRELATION_ID,
};
use thiserror::Error;
use tracing::{debug, warn};

use super::bag::ExchangeBag;
use super::stats::{PoolStatistics, PoolStats};
use crate::config::PoolConfig;

/// Why an exchange was not returned to the pool. The instance is dropped.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("pool is full")]
    PoolFull,
    #[error("pooling is disabled")]
    PoolingDisabled,
    #[error("exchange finalization failed: {0}")]
    Finalization(#[from] FinalizationError),
}

/// Creates exchanges and reclaims them for reuse.
///
/// Pooled instances are reset when released, so a reused exchange carries no
/// body, headers, properties, failure or unit of work from its previous cycle.
/// Instances handed out are owned by the caller; releasing moves them back,
/// which rules out use after release.
pub struct PooledExchangeFactory {
    bag: Option<ExchangeBag>,
    capacity: usize,
    stats: PoolStats,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn ClockSource>,
}

impl PooledExchangeFactory {
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        let capacity = usize::try_from(config.capacity).unwrap_or(0);
        Self {
            bag: (capacity > 0).then(|| ExchangeBag::new(capacity)),
            capacity,
            stats: PoolStats::new(config.statistics_enabled),
            ids: Arc::new(UuidIdGenerator),
            clock: Arc::new(SystemClock::new()),
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn with_clock_source(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn is_pooling_enabled(&self) -> bool {
        self.bag.is_some()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idle instances currently held.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.bag.as_ref().map_or(0, ExchangeBag::len)
    }

    /// A pooled instance with its clock restarted, or a new one.
    pub fn create(&self, from: Option<EndpointInfo>, pattern: ExchangePattern) -> Exchange {
        let mut exchange = self.acquire();
        exchange.set_from_endpoint(from);
        exchange.set_pattern(pattern);
        exchange
    }

    /// Duplicates `source`'s content. The unit of work is never copied.
    pub fn create_copy(&self, source: &Exchange) -> Exchange {
        let mut copy = self.acquire();
        source.copy_into(&mut copy);
        copy
    }

    /// Copy for fan-out: fresh message id and a correlation property pointing
    /// at `source`.
    ///
    /// With `handover`, pending synchronizations move from `source` to the
    /// copy, except those that refuse handover. Each still fires exactly once.
    pub fn create_correlated_copy(&self, source: &mut Exchange, handover: bool) -> Exchange {
        let mut copy = self.create_copy(source);
        copy.message_mut().message_id = Some(self.ids.next_id());
        copy.set_property(CORRELATION_ID, source.exchange_id());

        if handover {
            if let Some(uow) = source.unit_of_work_mut() {
                if uow.pending_synchronizations() > 0 {
                    let moved = uow.handover_synchronizations(copy.ensure_unit_of_work());
                    debug!(
                        from = %source.exchange_id(),
                        to = %copy.exchange_id(),
                        moved,
                        "handed over synchronizations"
                    );
                }
            }
        }
        copy
    }

    /// Marks the exchange done and offers it back to the pool.
    ///
    /// # Errors
    ///
    /// Every error means the instance was discarded. None of them is a
    /// routing failure.
    pub fn try_release(&self, mut exchange: Exchange) -> Result<(), ReleaseError> {
        if let Err(err) = exchange.done() {
            self.stats.record_discarded();
            warn!(
                exchange_id = %exchange.exchange_id(),
                error = %err,
                "discarding exchange after failed finalization"
            );
            return Err(err.into());
        }
        let Some(bag) = self.bag.as_ref() else {
            self.stats.record_discarded();
            return Err(ReleaseError::PoolingDisabled);
        };

        exchange.reset(self.ids.next_id());
        match bag.offer(exchange) {
            Ok(()) => {
                self.stats.record_released();
                Ok(())
            }
            Err(_dropped) => {
                self.stats.record_discarded();
                Err(ReleaseError::PoolFull)
            }
        }
    }

    /// [`try_release`](Self::try_release), reporting only whether the
    /// instance went back to the pool.
    pub fn release(&self, exchange: Exchange) -> bool {
        match self.try_release(exchange) {
            Ok(()) => true,
            Err(err) => {
                debug!(reason = %err, "exchange not pooled");
                false
            }
        }
    }

    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Drops every idle instance and reports counters that look like a leak.
    pub fn shutdown(&self) -> PoolStatistics {
        let drained = self.bag.as_ref().map_or(0, ExchangeBag::drain);
        let stats = self.stats.snapshot();
        if self.stats.is_enabled() && stats.outstanding() > 0 {
            warn!(
                outstanding = stats.outstanding(),
                created = stats.created,
                acquired = stats.acquired,
                released = stats.released,
                discarded = stats.discarded,
                "exchanges were never released; possible leak"
            );
        }
        debug!(drained, "exchange pool shut down");
        stats
    }

    fn acquire(&self) -> Exchange {
        if let Some(mut exchange) = self.bag.as_ref().and_then(ExchangeBag::poll) {
            self.stats.record_acquired();
            exchange.restart_clock();
            return exchange;
        }
        self.stats.record_created();
        Exchange::builder(self.ids.next_id())
            .clock_source(Arc::clone(&self.clock))
            .build()
    }
}

impl Default for PooledExchangeFactory {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

impl fmt::Debug for PooledExchangeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledExchangeFactory")
            .field("capacity", &self.capacity)
            .field("pool_size", &self.pool_size())
            .field("statistics", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
