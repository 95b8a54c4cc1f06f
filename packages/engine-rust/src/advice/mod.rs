//! Advice chains and the built-in advices.

mod chain;
mod history;
mod inflight;
mod metrics;
mod trace;
mod unit_of_work;

pub use chain::{Advice, AdviceChain, AdviceChainBuilder, AdviceState, AdviceStates};
pub use history::MessageHistoryAdvice;
pub use inflight::{InflightAdvice, InflightRegistry};
pub use self::metrics::{
    MetricsAdvice, EXCHANGES_FAILED_TOTAL, EXCHANGES_TOTAL, EXCHANGE_DURATION_SECONDS,
};
pub use trace::TracingAdvice;
pub use unit_of_work::UnitOfWorkAdvice;

#[cfg(test)]
pub(crate) use chain::tests as testing;
