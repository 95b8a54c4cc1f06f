//! Relay core: the message exchange data model shared by the routing engine.
//!
//! Exchanges, messages, units of work with their completion callbacks,
//! per-exchange clocks, and injectable id generators.

pub mod clock;
pub mod error;
pub mod exchange;
pub mod ids;
pub mod message;
pub mod types;
pub mod unit_of_work;

pub use clock::{ClockSource, ExchangeClock, ManualClock, SystemClock};
pub use error::{AdvicePhase, ExchangeFailure, FinalizationError};
pub use exchange::{Exchange, ExchangeBuilder, HistoryEntry, CORRELATION_ID};
pub use ids::{IdGenerator, SequenceIdGenerator, UuidIdGenerator};
pub use message::Message;
pub use types::{EndpointInfo, ExchangePattern, Value};
pub use unit_of_work::{on_completion, FnSynchronization, Outcome, Synchronization, UnitOfWork};
