use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use relay_core::Exchange;
use thiserror::Error;

use super::step::Step;
use crate::reactive::ReactiveExecutor;

const PARK_INTERVAL: Duration = Duration::from_millis(5);

/// The step dropped its completion callback without calling it. The exchange
/// went with it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("step dropped its completion callback")]
pub struct CallbackDropped;

enum SlotState {
    Pending,
    Completed(Exchange),
    Abandoned,
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// Owned by the completion callback. Dropping it uncalled abandons the slot.
struct Filler(Arc<Slot>);

impl Filler {
    fn complete(self, exchange: Exchange) {
        *self.0.state.lock() = SlotState::Completed(exchange);
        self.0.ready.notify_all();
    }
}

impl Drop for Filler {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Abandoned;
            self.0.ready.notify_all();
        }
    }
}

/// Drives an asynchronous step to completion on the calling thread.
///
/// While waiting, tasks queued on the calling thread's worker are pumped one at
/// a time so a completion routed back to this thread can still run. Blocks
/// until the step invokes its callback or drops it.
///
/// # Errors
///
/// [`CallbackDropped`] when the callback is dropped without being called.
pub fn await_completion<S: Step + ?Sized>(
    executor: &ReactiveExecutor,
    step: &S,
    exchange: Exchange,
) -> Result<Exchange, CallbackDropped> {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        ready: Condvar::new(),
    });
    let filler = Filler(Arc::clone(&slot));
    step.process_async(exchange, Box::new(move |ex, _| filler.complete(ex)));

    let mut guard = slot.state.lock();
    loop {
        match std::mem::replace(&mut *guard, SlotState::Pending) {
            SlotState::Completed(ex) => return Ok(ex),
            SlotState::Abandoned => return Err(CallbackDropped),
            SlotState::Pending => {}
        }
        let pumped = MutexGuard::unlocked(&mut guard, || executor.execute_from_queue());
        if !pumped && matches!(*guard, SlotState::Pending) {
            slot.ready.wait_for(&mut guard, PARK_INTERVAL);
        }
    }
}
