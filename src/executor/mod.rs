use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::Context;
use std::task::Poll;

use bevy::log::{debug, trace, warn};
use bevy::utils::HashMap;
use tinyset::SetU64;

use crate::promise::{PromiseBase, RefStatus, SuspendPolicy};
use crate::scope::Scope;
use crate::task::Task;

use self::frame::{Frame, HeapBody};

mod frame;
mod waker;

/// Identifier of a coroutine frame. Never reused by an [`Executor`].
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct CoroId(u64);

impl CoroId {
    pub fn to_bits(self) -> u64 {
        self.0
    }
}

/// Owns every coroutine frame and implements their lifecycle: creation, resumption and
/// destruction. Everything runs on the thread resuming the coroutines, without any queue.
///
/// Cloning an [`Executor`] gives another handle to the same frames. Don't move one into a
/// coroutine body, the frames would keep themselves alive.
#[derive(Clone, Default)]
pub struct Executor {
    table: Rc<RefCell<FrameTable>>,
}

#[derive(Clone)]
pub(crate) struct WeakExecutor {
    table: Weak<RefCell<FrameTable>>,
}

/// `running` and `current` hold the same frames. `current` keeps the nesting order for
/// [`Executor::current`], `running` answers the reentrancy check of [`Executor::resume`] without
/// scanning the stack.
struct FrameTable {
    frames: HashMap<CoroId, Slot>,
    running: SetU64,
    current: Vec<CoroHandle>,
    next_id: u64,
    destroyed: u64,
}

impl Default for FrameTable {
    fn default() -> Self {
        Self {
            frames: HashMap::default(),
            running: SetU64::new(),
            current: Vec::new(),
            next_id: 0,
            destroyed: 0,
        }
    }
}

struct Slot {
    promise: PromiseBase,
    body: Option<HeapBody>,
    done: bool,
    released: bool,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor able to hold `capacity` frames without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        let table = FrameTable {
            frames: HashMap::with_capacity_and_hasher(capacity, Default::default()),
            ..Default::default()
        };
        Self {
            table: Rc::new(RefCell::new(table)),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakExecutor {
        WeakExecutor {
            table: Rc::downgrade(&self.table),
        }
    }

    /// Start a new coroutine. Its body runs right away, until it first suspends or finishes,
    /// before this function returns.
    pub fn spawn<F, Fut, T>(&self, coroutine: F) -> Task<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        let handle = self.allocate();
        let future = coroutine(Scope::new(handle.clone()));

        let (result_sender, receiver) = oneshot::channel();
        let body: HeapBody = Box::pin(Frame::new(future, result_sender));

        let policy = {
            let mut table = self.table.borrow_mut();
            match table.frames.get_mut(&handle.id) {
                Some(slot) => {
                    slot.body = Some(body);
                    slot.promise.initial_suspend()
                }
                // Destroyed from within the closure.
                None => SuspendPolicy::Always,
            }
        };

        let task = Task::new(handle.clone(), receiver);
        trace!("Spawned {handle:?}");

        if policy == SuspendPolicy::Never {
            self.resume(&handle);
        }

        task
    }

    fn allocate(&self) -> CoroHandle {
        let mut table = self.table.borrow_mut();
        let id = CoroId(table.next_id);
        table.next_id += 1;
        table.frames.insert(
            id,
            Slot {
                promise: PromiseBase::new(),
                body: None,
                done: false,
                released: false,
            },
        );

        CoroHandle {
            id,
            executor: self.downgrade(),
        }
    }

    /// Resume a suspended coroutine, until it suspends again or finishes. When it finishes, its
    /// waiters are notified before this function returns.
    pub fn resume(&self, handle: &CoroHandle) {
        let mut body = {
            let mut table = self.table.borrow_mut();
            if table.running.contains(handle.id.0) {
                warn!("Cannot resume {handle:?}, it is already running");
                return;
            }
            let Some(slot) = table.frames.get_mut(&handle.id) else {
                debug!("Cannot resume {handle:?}, it was destroyed");
                return;
            };
            if slot.done {
                warn!("Cannot resume {handle:?}, it has already finished");
                return;
            }
            if slot.released {
                warn!("Cannot resume {handle:?}, it was released");
                return;
            }
            let Some(body) = slot.body.take() else {
                return;
            };
            table.running.insert(handle.id.0);
            table.current.push(handle.clone());
            body
        };

        trace!("Resuming {handle:?}");
        let waker = waker::create();
        let mut cx = Context::from_waker(&waker);
        let result = body.as_mut().poll(&mut cx);

        let (orphan, finished) = {
            let mut table = self.table.borrow_mut();
            table.current.pop();
            table.running.remove(handle.id.0);
            match (table.frames.get_mut(&handle.id), result) {
                (Some(slot), Poll::Pending) => {
                    slot.body = Some(body);
                    (None, false)
                }
                (Some(slot), Poll::Ready(())) => {
                    slot.done = true;
                    (Some(body), true)
                }
                (None, _) => {
                    debug!("{handle:?} was destroyed while running");
                    (Some(body), false)
                }
            }
        };
        // Dropped outside the borrow, it may release other frames.
        drop(orphan);

        if finished {
            self.final_suspend(handle);
        }
    }

    fn final_suspend(&self, handle: &CoroHandle) {
        let final_suspend = {
            let mut table = self.table.borrow_mut();
            match table.frames.get_mut(&handle.id) {
                Some(slot) => slot.promise.final_suspend(),
                None => return,
            }
        };

        trace!("{handle:?} finished");
        if !final_suspend.await_ready() {
            final_suspend.await_suspend(handle);
        }
    }

    /// Run `f` on the promise of `handle`, if its frame still exists. `f` must not call back into
    /// the executor.
    pub(crate) fn with_promise<R>(
        &self,
        handle: &CoroHandle,
        f: impl FnOnce(&mut PromiseBase) -> R,
    ) -> Option<R> {
        let mut table = self.table.borrow_mut();
        let slot = table.frames.get_mut(&handle.id)?;
        Some(f(&mut slot.promise))
    }

    /// Register `waiter` to be resumed once `awaited` finishes. A released frame never finishes,
    /// so waiting on one releases `waiter` right away.
    pub fn add_awaiting_coroutine(&self, awaited: &CoroHandle, waiter: CoroHandle) {
        let abandoned = {
            let mut table = self.table.borrow_mut();
            match table.frames.get_mut(&awaited.id) {
                Some(slot) if slot.released => Some(waiter),
                Some(slot) => {
                    slot.promise.add_awaiting_coroutine(waiter);
                    None
                }
                None => {
                    warn!("Cannot wait on {awaited:?}, it was destroyed");
                    None
                }
            }
        };

        if let Some(waiter) = abandoned {
            debug!("Releasing {waiter:?}, {awaited:?} was released and will never finish");
            self.release_coroutine(&waiter);
        }
    }

    pub fn has_awaiting_coroutine(&self, handle: &CoroHandle) -> bool {
        self.with_promise(handle, |promise| promise.has_awaiting_coroutine())
            .unwrap_or(false)
    }

    pub fn ref_coroutine(&self, handle: &CoroHandle) {
        self.with_promise(handle, |promise| promise.ref_coroutine());
    }

    /// Release a reference on `handle`, destroying its frame if it was the last one.
    pub fn deref_coroutine(&self, handle: &CoroHandle) {
        if let Some(RefStatus::Destroy) = self.with_promise(handle, |p| p.deref_coroutine()) {
            self.destroy_frame(handle);
        }
    }

    /// Destroy the frame of `handle` right away, whatever its reference count.
    pub fn destroy_coroutine(&self, handle: &CoroHandle) {
        if let Some(RefStatus::Destroy) = self.with_promise(handle, |p| p.destroy_coroutine()) {
            self.destroy_frame(handle);
        }
    }

    /// Give up on a suspended coroutine: it will never be resumed. The reference the frame holds
    /// on itself is released, and the coroutines waiting on it are given up on in turn.
    pub(crate) fn release_coroutine(&self, handle: &CoroHandle) {
        let abandoned = {
            let mut table = self.table.borrow_mut();
            let Some(slot) = table.frames.get_mut(&handle.id) else {
                return;
            };
            if slot.released || slot.done {
                return;
            }
            slot.released = true;
            slot.promise.take_awaiting_coroutines()
        };

        self.deref_coroutine(handle);

        for waiter in abandoned {
            debug!("Releasing {waiter:?}, {handle:?} will never finish");
            self.release_coroutine(&waiter);
        }
    }

    fn destroy_frame(&self, handle: &CoroHandle) {
        let Some(mut slot) = self.table.borrow_mut().frames.remove(&handle.id) else {
            return;
        };
        self.table.borrow_mut().destroyed += 1;
        trace!("Destroying {handle:?}");

        let abandoned = if slot.done {
            Vec::new()
        } else {
            slot.promise.take_awaiting_coroutines()
        };

        // Dropping the body may release other frames.
        drop(slot);

        for waiter in abandoned {
            debug!("Releasing {waiter:?}, {handle:?} was destroyed before finishing");
            self.release_coroutine(&waiter);
        }
    }

    /// Returns true if the frame of `handle` still exists.
    pub fn is_alive(&self, handle: &CoroHandle) -> bool {
        self.table.borrow().frames.contains_key(&handle.id)
    }

    /// Returns true if the coroutine of `handle` finished, or if its frame was destroyed.
    pub fn is_done(&self, handle: &CoroHandle) -> bool {
        self.table
            .borrow()
            .frames
            .get(&handle.id)
            .map_or(true, |slot| slot.done)
    }

    pub fn ref_count(&self, handle: &CoroHandle) -> Option<usize> {
        self.table
            .borrow()
            .frames
            .get(&handle.id)
            .map(|slot| slot.promise.ref_count())
    }

    /// The innermost coroutine currently being resumed.
    pub fn current(&self) -> Option<CoroHandle> {
        self.table.borrow().current.last().cloned()
    }

    /// Number of frames not destroyed yet.
    pub fn live_frames(&self) -> usize {
        self.table.borrow().frames.len()
    }

    /// Number of frames destroyed so far.
    pub fn destroyed_frames(&self) -> u64 {
        self.table.borrow().destroyed
    }
}

impl WeakExecutor {
    pub(crate) fn upgrade(&self) -> Option<Executor> {
        self.table.upgrade().map(|table| Executor { table })
    }
}

/// Opaque handle to a coroutine frame. It does not keep the frame alive: once the frame is
/// destroyed, every operation on the handle does nothing.
#[derive(Clone)]
pub struct CoroHandle {
    id: CoroId,
    executor: WeakExecutor,
}

impl CoroHandle {
    pub fn id(&self) -> CoroId {
        self.id
    }

    pub fn executor(&self) -> Option<Executor> {
        self.executor.upgrade()
    }

    /// See [`Executor::resume`].
    pub fn resume(&self) {
        if let Some(executor) = self.executor() {
            executor.resume(self);
        }
    }

    /// See [`Executor::destroy_coroutine`].
    pub fn destroy(&self) {
        if let Some(executor) = self.executor() {
            executor.destroy_coroutine(self);
        }
    }

    pub fn is_done(&self) -> bool {
        self.executor()
            .map_or(true, |executor| executor.is_done(self))
    }

    pub fn is_alive(&self) -> bool {
        self.executor()
            .is_some_and(|executor| executor.is_alive(self))
    }

    pub fn ref_count(&self) -> Option<usize> {
        self.executor()?.ref_count(self)
    }

    pub fn has_awaiting_coroutine(&self) -> bool {
        self.executor()
            .is_some_and(|executor| executor.has_awaiting_coroutine(self))
    }

    pub(crate) fn add_awaiting_coroutine(&self, waiter: CoroHandle) {
        if let Some(executor) = self.executor() {
            executor.add_awaiting_coroutine(self, waiter);
        }
    }

    pub(crate) fn ref_coroutine(&self) {
        if let Some(executor) = self.executor() {
            executor.ref_coroutine(self);
        }
    }

    pub(crate) fn deref_coroutine(&self) {
        if let Some(executor) = self.executor() {
            executor.deref_coroutine(self);
        }
    }

    pub(crate) fn release(&self) {
        if let Some(executor) = self.executor() {
            executor.release_coroutine(self);
        }
    }

    pub(crate) fn with_promise<R>(&self, f: impl FnOnce(&mut PromiseBase) -> R) -> Option<R> {
        self.executor()?.with_promise(self, f)
    }
}

impl PartialEq for CoroHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.executor.table.ptr_eq(&other.executor.table)
    }
}

impl Eq for CoroHandle {}

impl fmt::Debug for CoroHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coroutine({})", self.id.0)
    }
}
