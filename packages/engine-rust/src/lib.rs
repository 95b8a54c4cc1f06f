//! Relay engine: the asynchronous dispatch core.
//!
//! - [`reactive`]: per-thread trampolining scheduler
//! - [`advice`]: before/after hooks wrapped around every step
//! - [`dispatch`]: advised steps and the transacted/reactive policy
//! - [`pool`]: pooled exchange factory
//! - [`routing`]: pipelines, workflows and `tower` adapters

pub mod advice;
pub mod config;
pub mod dispatch;
pub mod pool;
pub mod reactive;
pub mod routing;
pub mod shutdown;
pub mod telemetry;

pub use advice::{Advice, AdviceChain, AdviceState};
pub use config::{
    AdviceConfig, ConfigError, EngineConfig, PoolConfig, SchedulerConfig, TelemetryConfig,
};
pub use dispatch::{
    await_completion, AdvisedStep, CallbackDropped, Completion, DoneCallback, FnStep, Step,
};
pub use pool::{PoolStatistics, PooledExchangeFactory, ReleaseError};
pub use reactive::{ReactiveExecutor, Task};
pub use routing::{Pipeline, RoutingService, ServiceError, ServiceStep, Workflow};
pub use shutdown::{LifecycleState, ShutdownController};
