use std::cell::RefCell;
use std::rc::Rc;

use crate::awaiter::Awaiter;
use crate::executor::CoroHandle;

/// A suspension point resumed from the outside, typically by an event loop.
///
/// Coroutines awaiting [`Notify::notified`] stay suspended until [`Notify::notify_all`] (or
/// [`Notify::notify_one`]) is called. There are no permits: a notification sent while nobody
/// waits is lost.
#[derive(Clone, Default)]
pub struct Notify {
    waiters: Rc<RefCell<Vec<CoroHandle>>>,
}

impl Notify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> Notified {
        Notified {
            notify: self.clone(),
        }
    }

    /// Resume every coroutine currently waiting, in the order they started waiting. Coroutines
    /// starting to wait while this runs are left for the next notification.
    pub fn notify_all(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            waiter.resume();
        }
    }

    /// Resume the coroutine waiting the longest. Returns false if nobody was waiting.
    pub fn notify_one(&self) -> bool {
        let waiter = {
            let mut waiters = self.waiters.borrow_mut();
            if waiters.is_empty() {
                return false;
            }
            waiters.remove(0)
        };
        waiter.resume();
        true
    }

    /// Number of coroutines waiting.
    pub fn waiting(&self) -> usize {
        self.waiters.borrow().len()
    }
}

/// Awaiter of a [`Notify`].
#[must_use = "awaiters do nothing unless co_awaited"]
pub struct Notified {
    notify: Notify,
}

impl Awaiter for Notified {
    type Output = ();

    fn await_ready(&self) -> bool {
        false
    }

    fn await_suspend(&mut self, waiter: CoroHandle) {
        self.notify.waiters.borrow_mut().push(waiter);
    }

    fn await_resume(self) {}
}
