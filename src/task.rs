use oneshot::Receiver;

use crate::awaiter::Awaiter;
use crate::executor::CoroHandle;

const ERR_NO_RESULT: &str = "A task was awaited but never produced its result.
That is most likely because its coroutine was destroyed
before finishing.";

/// A running (or finished) coroutine returning a `T`.
///
/// A task holds a reference on its frame, released when it is dropped. The frame outlives the
/// task if the coroutine is still running. Awaiting a task from another coroutine suspends that
/// coroutine until this one finishes.
#[must_use = "dropping a task does not stop its coroutine, but loses its result"]
pub struct Task<T> {
    handle: CoroHandle,
    result: Receiver<T>,
}

impl<T> Task<T> {
    pub(crate) fn new(handle: CoroHandle, result: Receiver<T>) -> Self {
        handle.ref_coroutine();
        Self { handle, result }
    }

    pub fn handle(&self) -> &CoroHandle {
        &self.handle
    }

    /// Returns true once the coroutine finished, or if it was destroyed.
    pub fn is_ready(&self) -> bool {
        self.handle.is_done()
    }

    /// Take the value returned by the coroutine, if it finished and the value was not taken yet.
    pub fn take_result(&self) -> Option<T> {
        self.result.try_recv().ok()
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.handle.deref_coroutine();
    }
}

impl<T> Awaiter for Task<T> {
    type Output = T;

    fn await_ready(&self) -> bool {
        self.is_ready()
    }

    fn await_suspend(&mut self, waiter: CoroHandle) {
        self.handle.add_awaiting_coroutine(waiter);
    }

    fn await_resume(self) -> T {
        self.take_result().expect(ERR_NO_RESULT)
    }
}

impl<T> Awaiter for &mut Task<T> {
    type Output = T;

    fn await_ready(&self) -> bool {
        self.is_ready()
    }

    fn await_suspend(&mut self, waiter: CoroHandle) {
        self.handle.add_awaiting_coroutine(waiter);
    }

    fn await_resume(self) -> T {
        self.take_result().expect(ERR_NO_RESULT)
    }
}
