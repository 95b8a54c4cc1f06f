//! Exchange pooling.

mod bag;
mod factory;
mod stats;

pub use factory::{PooledExchangeFactory, ReleaseError};
pub use stats::PoolStatistics;
