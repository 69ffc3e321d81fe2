use bevy::log::debug;

use crate::executor::CoroHandle;

/// The suspension point reached when a coroutine body completes. It notifies every waiter and
/// then releases the reference the frame holds on itself.
#[derive(Debug)]
pub struct FinalSuspend {
    awaiting_coroutines: Vec<CoroHandle>,
}

impl FinalSuspend {
    pub(crate) fn new(awaiting_coroutines: Vec<CoroHandle>) -> Self {
        Self {
            awaiting_coroutines,
        }
    }

    /// A finished coroutine always suspends here.
    pub fn await_ready(&self) -> bool {
        false
    }

    /// The waiters to notify, in registration order.
    pub fn awaiting(&self) -> &[CoroHandle] {
        &self.awaiting_coroutines
    }

    /// Resume each waiter in turn, except those whose guarded owner was destroyed while they
    /// were suspended: those are released without being resumed, together with whatever waits
    /// on them. Then release `finished`.
    ///
    /// `finished` may be destroyed by this call and must not be used afterwards.
    pub fn await_suspend(self, finished: &CoroHandle) {
        for waiter in self.awaiting_coroutines {
            match waiter.with_promise(|promise| promise.features().owner_is_gone()) {
                Some(true) => {
                    debug!("Owner of {waiter:?} is gone, releasing it instead of resuming");
                    waiter.release();
                }
                Some(false) => waiter.resume(),
                None => debug!("{waiter:?} was destroyed while waiting on {finished:?}"),
            }
        }

        // Destroys the frame only if its Task is already gone.
        finished.deref_coroutine();
    }

    /// Never called, the frame may not exist anymore.
    pub fn await_resume(&self) {}
}
