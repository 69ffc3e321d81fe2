use std::future::Future;

use crate::awaiter::{AwaitTransform, CoAwait};
use crate::executor::CoroHandle;
use crate::task::Task;

const ERR_NO_EXECUTOR: &str = "A coroutine was polled after its executor was dropped.
That is most likely because its future was moved out of the
executor and polled by something else.";

/// The first parameter of any coroutine. Through it the coroutine awaits values, starts
/// sub-coroutines and reaches its own frame.
pub struct Scope {
    handle: CoroHandle,
}

impl Scope {
    pub(crate) fn new(handle: CoroHandle) -> Self {
        Self { handle }
    }

    /// Handle to the frame of this coroutine.
    pub fn handle(&self) -> &CoroHandle {
        &self.handle
    }

    /// Await `expr` from this coroutine, after mapping it to its awaiter with [`AwaitTransform`].
    ///
    /// Only the executor can resume the returned future. Awaiting a foreign future directly in
    /// a coroutine body leaves the coroutine suspended forever.
    pub fn co_await<'s, E>(&'s self, expr: E) -> CoAwait<'s, E::Awaiter<'s>>
    where
        E: AwaitTransform + 's,
    {
        CoAwait::new(self, expr.await_transform(self))
    }

    /// Start a sub-coroutine on the same executor. It runs right away, until it first suspends.
    pub fn spawn<F, Fut, T>(&self, coroutine: F) -> Task<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        self.handle
            .executor()
            .expect(ERR_NO_EXECUTOR)
            .spawn(coroutine)
    }
}
