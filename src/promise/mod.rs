use bevy::log::warn;

use crate::executor::CoroHandle;
use crate::features::CoroutineFeatures;

use self::final_suspend::FinalSuspend;

pub mod final_suspend;

/// Whether a coroutine suspends at one of its implicit suspension points.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SuspendPolicy {
    Never,
    Always,
}

/// Outcome of releasing a reference on a frame.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[must_use = "a frame whose count reached zero must be destroyed"]
pub enum RefStatus {
    /// Someone still references the frame.
    Alive,
    /// The count reached zero, the frame must be destroyed now and never touched again.
    Destroy,
}

/// State owned by every coroutine frame: its reference count, the coroutines suspended until it
/// finishes, and its [`CoroutineFeatures`].
///
/// The frame starts with one reference, held by the frame itself and released at final suspend.
/// Every [`Task`](crate::task::Task) pointing to the frame holds one more.
#[derive(Debug)]
pub struct PromiseBase {
    ref_count: usize,
    awaiting_coroutines: Vec<CoroHandle>,
    features: CoroutineFeatures,
}

impl Default for PromiseBase {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseBase {
    pub fn new() -> Self {
        let mut promise = Self {
            ref_count: 0,
            awaiting_coroutines: Vec::new(),
            features: CoroutineFeatures::new(),
        };
        promise.ref_coroutine();
        promise
    }

    /// Coroutines start running as soon as they are spawned.
    pub fn initial_suspend(&self) -> SuspendPolicy {
        SuspendPolicy::Never
    }

    /// The terminal suspension point, handing over every registered waiter.
    pub fn final_suspend(&mut self) -> FinalSuspend {
        FinalSuspend::new(std::mem::take(&mut self.awaiting_coroutines))
    }

    /// Register a coroutine to resume once this one finishes. Waiters are resumed in the order
    /// they were added.
    pub fn add_awaiting_coroutine(&mut self, awaiting: CoroHandle) {
        self.awaiting_coroutines.push(awaiting);
    }

    pub fn has_awaiting_coroutine(&self) -> bool {
        !self.awaiting_coroutines.is_empty()
    }

    pub(crate) fn awaiting_coroutines(&self) -> &[CoroHandle] {
        &self.awaiting_coroutines
    }

    /// Remove and return the registered waiters without resuming them.
    pub(crate) fn take_awaiting_coroutines(&mut self) -> Vec<CoroHandle> {
        std::mem::take(&mut self.awaiting_coroutines)
    }

    pub fn ref_coroutine(&mut self) {
        self.ref_count += 1;
    }

    /// Release one reference. On [`RefStatus::Destroy`] the caller must destroy the frame.
    pub fn deref_coroutine(&mut self) -> RefStatus {
        if self.ref_count == 0 {
            warn!("Released a reference on a frame nobody references");
            return RefStatus::Destroy;
        }

        self.ref_count -= 1;
        if self.ref_count == 0 {
            RefStatus::Destroy
        } else {
            RefStatus::Alive
        }
    }

    /// Drop every reference at once, for forced teardown.
    pub fn destroy_coroutine(&mut self) -> RefStatus {
        self.ref_count = 0;
        RefStatus::Destroy
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn features(&self) -> &CoroutineFeatures {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut CoroutineFeatures {
        &mut self.features
    }
}
