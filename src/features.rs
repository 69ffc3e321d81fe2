use crate::awaiter::{AwaitTransform, Awaiter};
use crate::executor::CoroHandle;
use crate::owner::WeakOwner;
use crate::scope::Scope;

/// Request for the features of the coroutine that awaits it. Only obtainable through
/// [`this_coro`], and only meaningful as the argument of [`Scope::co_await`].
pub struct ThisCoro {
    _private: (),
}

/// A special awaitable that resolves to the [`Features`] of the current coroutine.
///
/// ```ignore
/// let features = scope.co_await(this_coro()).await;
/// features.guard_owner(Some(WeakOwner::new(&window)));
/// ```
pub fn this_coro() -> ThisCoro {
    ThisCoro { _private: () }
}

/// Per-frame configuration, stored in the promise of every coroutine. It can't be cloned, and
/// is only reachable from outside through the [`Features`] borrow of its own coroutine.
#[derive(Debug)]
pub struct CoroutineFeatures {
    guarded_owner: Option<WeakOwner>,
}

impl CoroutineFeatures {
    pub(crate) fn new() -> Self {
        Self {
            guarded_owner: None,
        }
    }

    /// Bind the coroutine lifetime to `owner`. Passing `None` stops observing.
    pub fn guard_owner(&mut self, owner: Option<WeakOwner>) {
        self.guarded_owner = owner;
    }

    /// The currently guarded owner. `None` if no owner was ever set (or it was cleared). A
    /// returned owner that is not alive anymore means the coroutine must not be resumed.
    pub fn guarded_owner(&self) -> Option<&WeakOwner> {
        self.guarded_owner.as_ref()
    }

    /// Returns true if an owner is guarded and has been destroyed since.
    pub(crate) fn owner_is_gone(&self) -> bool {
        self.guarded_owner
            .as_ref()
            .is_some_and(|owner| !owner.is_alive())
    }
}

/// Borrow of the current coroutine's [`CoroutineFeatures`], resolved by awaiting [`this_coro`].
///
/// It borrows the [`Scope`] of the coroutine, so it can't be moved into another coroutine.
pub struct Features<'s> {
    scope: &'s Scope,
}

impl<'s> Features<'s> {
    /// Watches `owner`. If it is destroyed while the coroutine is suspended on a [`Task`], the
    /// coroutine is released instead of being resumed. Pass `None` to stop observing.
    ///
    /// [`Task`]: crate::task::Task
    pub fn guard_owner(&self, owner: Option<WeakOwner>) {
        self.scope
            .handle()
            .with_promise(|promise| promise.features_mut().guard_owner(owner));
    }

    /// See [`CoroutineFeatures::guarded_owner`].
    pub fn guarded_owner(&self) -> Option<WeakOwner> {
        self.scope
            .handle()
            .with_promise(|promise| promise.features().guarded_owner().cloned())
            .flatten()
    }

    /// Handle to the coroutine these features belong to.
    pub fn coroutine(&self) -> &CoroHandle {
        self.scope.handle()
    }
}

/// Awaiter returned by the await transform of [`ThisCoro`]. Never suspends.
pub struct FeaturesAwaiter<'s> {
    scope: &'s Scope,
}

impl<'s> Awaiter for FeaturesAwaiter<'s> {
    type Output = Features<'s>;

    fn await_ready(&self) -> bool {
        true
    }

    fn await_suspend(&mut self, _waiter: CoroHandle) {
        unreachable!("awaiting the features of a coroutine never suspends")
    }

    fn await_resume(self) -> Self::Output {
        Features { scope: self.scope }
    }
}

impl AwaitTransform for ThisCoro {
    type Awaiter<'s> = FeaturesAwaiter<'s>;

    fn await_transform<'s>(self, scope: &'s Scope) -> Self::Awaiter<'s>
    where
        Self: 's,
    {
        FeaturesAwaiter { scope }
    }
}
