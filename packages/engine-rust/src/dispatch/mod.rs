//! Advised dispatch: runs a step inside its advice chain and picks the
//! synchronous or reactive path for each exchange.

mod advised;
mod bridge;
mod policy;
mod step;

pub use advised::{AdvisedStep, AfterProcessHook};
pub use bridge::{await_completion, CallbackDropped};
pub use step::{run_guarded, Completion, DoneCallback, FnStep, Step};
