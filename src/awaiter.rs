use std::future::{Future, Ready};
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;

use crate::executor::CoroHandle;
use crate::scope::Scope;

/// The suspend protocol of a single suspension point.
///
/// When awaited through [`Scope::co_await`], [`await_ready`](Awaiter::await_ready) is checked
/// first. If it returns false, [`await_suspend`](Awaiter::await_suspend) is given the handle of
/// the awaiting coroutine, which is then suspended until someone resumes that handle. Once
/// resumed (or if it was ready), [`await_resume`](Awaiter::await_resume) produces the result.
pub trait Awaiter {
    type Output;

    fn await_ready(&self) -> bool;

    fn await_suspend(&mut self, waiter: CoroHandle);

    fn await_resume(self) -> Self::Output;
}

/// Typed dispatch of the values a coroutine can `co_await`, from most to least specific:
///
/// 1. [`ThisCoro`](crate::features::ThisCoro) resolves to the coroutine's own features.
/// 2. [`Task`](crate::task::Task)s are awaiters themselves and pass through unchanged.
/// 3. Any other [`Awaiter`] passes through unchanged.
/// 4. Values without an awaiter of their own are wrapped by an adapter.
pub trait AwaitTransform: Sized {
    type Awaiter<'s>: Awaiter
    where
        Self: 's;

    fn await_transform<'s>(self, scope: &'s Scope) -> Self::Awaiter<'s>
    where
        Self: 's;
}

impl<A: Awaiter> AwaitTransform for A {
    type Awaiter<'s> = A where A: 's;

    fn await_transform<'s>(self, _scope: &'s Scope) -> Self::Awaiter<'s>
    where
        Self: 's,
    {
        self
    }
}

/// Adapter for an already computed value.
pub struct ReadyAwaiter<T> {
    value: Ready<T>,
}

impl<T> Awaiter for ReadyAwaiter<T> {
    type Output = T;

    fn await_ready(&self) -> bool {
        true
    }

    fn await_suspend(&mut self, _waiter: CoroHandle) {
        unreachable!("a ready value never suspends")
    }

    fn await_resume(self) -> T {
        self.value.into_inner()
    }
}

impl<T> AwaitTransform for Ready<T> {
    type Awaiter<'s> = ReadyAwaiter<T> where T: 's;

    fn await_transform<'s>(self, _scope: &'s Scope) -> Self::Awaiter<'s>
    where
        Self: 's,
    {
        ReadyAwaiter { value: self }
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum AwaitState {
    Init,
    Suspended,
}

/// The [`Future`] driving an [`Awaiter`] inside a coroutine body. Only the [`Executor`] knows
/// how to resume it, awaiting it from any other context never completes.
///
/// [`Executor`]: crate::executor::Executor
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct CoAwait<'s, A> {
    scope: &'s Scope,
    awaiter: Option<A>,
    state: AwaitState,
}

impl<'s, A: Awaiter> CoAwait<'s, A> {
    pub(crate) fn new(scope: &'s Scope, awaiter: A) -> Self {
        Self {
            scope,
            awaiter: Some(awaiter),
            state: AwaitState::Init,
        }
    }
}

const ERR_POLLED_AFTER_DONE: &str = "CoAwait polled after completion";

impl<'s, A: Awaiter> Future for CoAwait<'s, A> {
    type Output = A::Output;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.state {
            AwaitState::Init => {
                let awaiter = this.awaiter.as_mut().expect(ERR_POLLED_AFTER_DONE);
                if awaiter.await_ready() {
                    let awaiter = this.awaiter.take().expect(ERR_POLLED_AFTER_DONE);
                    return Poll::Ready(awaiter.await_resume());
                }

                *this.state = AwaitState::Suspended;
                awaiter.await_suspend(this.scope.handle().clone());
                Poll::Pending
            }
            AwaitState::Suspended => {
                let awaiter = this.awaiter.take().expect(ERR_POLLED_AFTER_DONE);
                Poll::Ready(awaiter.await_resume())
            }
        }
    }
}
