//! Reactive scheduler: per-thread trampolines that keep continuation chains
//! at constant stack depth.

mod executor;
mod stats;
mod task;
mod worker;

pub use executor::ReactiveExecutor;
pub use stats::{SchedulerStatistics, SchedulerStats};
pub use task::Task;
pub use worker::Worker;
