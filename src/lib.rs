pub mod awaiter;
pub mod executor;
pub mod features;
pub mod notify;
pub mod owner;
pub mod plugin;
pub mod promise;
pub mod scope;
pub mod task;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::awaiter::{AwaitTransform, Awaiter};

    #[doc(hidden)]
    pub use crate::executor::{CoroHandle, Executor};

    #[doc(hidden)]
    pub use crate::features::{this_coro, Features};

    #[doc(hidden)]
    pub use crate::notify::Notify;

    #[doc(hidden)]
    pub use crate::owner::WeakOwner;

    #[doc(hidden)]
    pub use crate::plugin::CoroutinePlugin;

    #[doc(hidden)]
    pub use crate::scope::Scope;

    #[doc(hidden)]
    pub use crate::task::Task;
}

#[cfg(test)]
mod test {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use bevy::prelude::{App, World};

    use super::prelude::*;

    /// Coroutine suspended on `awaited`, guarding `owner` if any, that logs `id` once resumed.
    fn waiter(
        executor: &Executor,
        awaited: Task<u32>,
        owner: Option<WeakOwner>,
        id: usize,
        resumed: &Rc<RefCell<Vec<usize>>>,
    ) -> Task<()> {
        let resumed = Rc::clone(resumed);
        executor.spawn(move |scope: Scope| async move {
            let features = scope.co_await(this_coro()).await;
            features.guard_owner(owner);
            let value = scope.co_await(awaited).await;
            assert_eq!(value, 42);
            resumed.borrow_mut().push(id);
        })
    }

    /// A task finishing with 42 once `notify` fires.
    fn pending_value(executor: &Executor, notify: &Notify) -> Task<u32> {
        let n = notify.clone();
        executor.spawn(move |scope: Scope| async move {
            scope.co_await(n.notified()).await;
            42
        })
    }

    /// Coroutine awaiting a shared task through a relay, so that several of them can wait on
    /// the same frame.
    fn relay(executor: &Executor, source: &Rc<RefCell<Option<Task<u32>>>>) -> Task<u32> {
        let source = Rc::clone(source);
        executor.spawn(move |scope: Scope| async move {
            let task = source.borrow_mut().take().unwrap();
            let value = scope.co_await(task).await;
            value
        })
    }

    #[test]
    fn waiters_resume_in_registration_order() {
        let executor = Executor::new();
        let notify = Notify::new();
        let shared = pending_value(&executor, &notify);
        let shared_handle = shared.handle().clone();
        let resumed = Rc::new(RefCell::new(Vec::new()));

        // Every waiter awaits the same frame through its own relay task.
        let slot = Rc::new(RefCell::new(Some(shared)));
        let first = relay(&executor, &slot);
        let mut waiters = Vec::new();
        for id in 0..4 {
            let relay_resumed = Rc::clone(&resumed);
            let handle = shared_handle.clone();
            let r = executor.spawn(move |scope: Scope| async move {
                let waiter = ManualWait(handle);
                scope.co_await(waiter).await;
                relay_resumed.borrow_mut().push(id);
            });
            waiters.push(r);
        }

        assert!(shared_handle.has_awaiting_coroutine());
        notify.notify_all();

        assert_eq!(*resumed.borrow(), [0, 1, 2, 3]);
        assert_eq!(first.take_result(), Some(42));
        assert!(waiters.iter().all(|w| w.is_ready()));
    }

    /// Waits on the frame of a handle without holding a task to it.
    struct ManualWait(CoroHandle);

    impl Awaiter for ManualWait {
        type Output = ();

        fn await_ready(&self) -> bool {
            self.0.is_done()
        }

        fn await_suspend(&mut self, waiter: CoroHandle) {
            let executor = self.0.executor().unwrap();
            executor.add_awaiting_coroutine(&self.0, waiter);
        }

        fn await_resume(self) {}
    }

    #[test]
    fn only_waiters_with_dead_owners_are_released() {
        let executor = Executor::new();
        let notify = Notify::new();
        let resumed = Rc::new(RefCell::new(Vec::new()));

        let owners: Vec<Rc<()>> = (0..6).map(|_| Rc::new(())).collect();
        let mut tasks = Vec::new();
        for (id, owner) in owners.iter().enumerate() {
            let guard = (id % 3 != 0).then(|| WeakOwner::from_rc(owner));
            let awaited = pending_value(&executor, &notify);
            tasks.push(waiter(&executor, awaited, guard, id, &resumed));
        }

        // 0 and 3 are unguarded, 1 and 4 keep their owner, 2 and 5 lose it.
        let mut owners = owners;
        owners.remove(5);
        owners.remove(2);

        notify.notify_all();
        assert_eq!(*resumed.borrow(), [0, 1, 3, 4]);

        let waiter_handles: Vec<_> = tasks.iter().map(|t| t.handle().clone()).collect();
        assert!(tasks[2].take_result().is_none());
        // Released waiters keep only the reference of their task.
        assert_eq!(waiter_handles[2].ref_count(), Some(1));
        assert!(!tasks[2].is_ready());

        drop(tasks);
        assert!(waiter_handles.iter().all(|h| !h.is_alive()));
        assert_eq!(executor.live_frames(), 0);
    }

    #[test]
    fn destroyed_owner_prevents_resumption() {
        let executor = Executor::new();
        let notify = Notify::new();
        let called = Rc::new(Cell::new(0));
        let c = Rc::clone(&called);
        let obj = Rc::new(String::from("dialog"));
        let owner = WeakOwner::from_rc(&obj);

        let task = {
            let awaited = pending_value(&executor, &notify);
            executor.spawn(move |scope: Scope| async move {
                let features = scope.co_await(this_coro()).await;
                features.guard_owner(Some(owner));
                scope.co_await(awaited).await;
                c.set(c.get() + 1);
            })
        };

        drop(obj);
        notify.notify_all();
        assert_eq!(called.get(), 0);

        drop(task);
        assert_eq!(executor.live_frames(), 0);
    }

    #[test]
    fn cleared_guard_resumes_normally() {
        let executor = Executor::new();
        let notify = Notify::new();
        let called = Rc::new(Cell::new(0));
        let c = Rc::clone(&called);
        let obj = Rc::new(());
        let owner = WeakOwner::from_rc(&obj);

        let awaited = pending_value(&executor, &notify);
        let task = executor.spawn(move |scope: Scope| async move {
            let features = scope.co_await(this_coro()).await;
            features.guard_owner(Some(owner));
            features.guard_owner(None);
            assert!(features.guarded_owner().is_none());
            scope.co_await(awaited).await;
            c.set(c.get() + 1);
        });

        drop(obj);
        notify.notify_all();
        assert_eq!(called.get(), 1);
        assert!(task.is_ready());
    }

    #[test]
    fn released_coroutine_releases_its_waiters() {
        let mut world = World::new();
        let obj_x = world.spawn_empty().id();
        let owner = WeakOwner::from_entity(&mut world, obj_x).unwrap();

        let executor = Executor::new();
        let notify = Notify::new();
        let a_resumed = Rc::new(Cell::new(0));
        let c_resumed = Rc::new(Cell::new(0));

        let a_count = Rc::clone(&a_resumed);
        let n = notify.clone();
        let task_a = executor.spawn(move |scope: Scope| async move {
            let features = scope.co_await(this_coro()).await;
            features.guard_owner(Some(owner));
            let b = scope.spawn(move |scope: Scope| async move {
                scope.co_await(n.notified()).await;
            });
            scope.co_await(b).await;
            a_count.set(a_count.get() + 1);
        });
        let a = task_a.handle().clone();

        let c_count = Rc::clone(&c_resumed);
        let task_c = executor.spawn(move |scope: Scope| async move {
            scope.co_await(task_a).await;
            c_count.set(c_count.get() + 1);
        });
        let c = task_c.handle().clone();
        assert!(a.has_awaiting_coroutine());
        assert_eq!(executor.live_frames(), 3);

        world.despawn(obj_x);
        notify.notify_all();

        assert_eq!(a_resumed.get(), 0);
        assert_eq!(c_resumed.get(), 0);
        // Only the tasks are left: task_a inside c, task_c here.
        assert_eq!(a.ref_count(), Some(1));
        assert_eq!(c.ref_count(), Some(1));
        assert!(!a.has_awaiting_coroutine());

        drop(task_c);
        assert!(!c.is_alive());
        assert!(!a.is_alive());
        assert_eq!(executor.live_frames(), 0);
        assert_eq!(executor.destroyed_frames(), 3);
    }

    #[test]
    fn finished_guarded_coroutine_releases_dead_waiter() {
        let executor = Executor::new();
        let notify = Notify::new();
        let obj = Rc::new(());
        let owner = WeakOwner::from_rc(&obj);
        let resumed = Rc::new(Cell::new(false));
        let r = Rc::clone(&resumed);

        let a = pending_value(&executor, &notify);
        let c = executor.spawn(move |scope: Scope| async move {
            let features = scope.co_await(this_coro()).await;
            features.guard_owner(Some(owner));
            scope.co_await(a).await;
            r.set(true);
        });

        drop(obj);
        notify.notify_all();
        assert!(!resumed.get());
        // a finished, its task lives on inside the released c.
        assert_eq!(executor.live_frames(), 2);
        drop(c);
        assert_eq!(executor.live_frames(), 0);
    }

    #[test]
    fn awaiting_released_coroutine_releases_the_waiter() {
        let executor = Executor::new();
        let notify = Notify::new();
        let obj = Rc::new(());
        let owner = WeakOwner::from_rc(&obj);
        let c_resumed = Rc::new(Cell::new(false));

        let n = notify.clone();
        let task_a = executor.spawn(move |scope: Scope| async move {
            let features = scope.co_await(this_coro()).await;
            features.guard_owner(Some(owner));
            let b = scope.spawn(move |scope: Scope| async move {
                scope.co_await(n.notified()).await;
            });
            scope.co_await(b).await;
        });
        let a = task_a.handle().clone();

        drop(obj);
        notify.notify_all();
        assert_eq!(a.ref_count(), Some(1));
        assert!(!task_a.is_ready());

        // a is released already, c starts waiting on it afterwards.
        let r = Rc::clone(&c_resumed);
        let task_c = executor.spawn(move |scope: Scope| async move {
            scope.co_await(task_a).await;
            r.set(true);
        });
        let c = task_c.handle().clone();
        assert!(!a.has_awaiting_coroutine());
        assert_eq!(c.ref_count(), Some(1));

        drop(task_c);
        assert!(!c_resumed.get());
        assert!(!c.is_alive());
        assert!(!a.is_alive());
        assert_eq!(executor.live_frames(), 0);
        assert_eq!(executor.destroyed_frames(), 3);
    }

    #[test]
    fn destroyed_waiter_is_skipped_at_final_suspend() {
        let executor = Executor::new();
        let notify = Notify::new();
        let awaited = pending_value(&executor, &notify);
        let handle = awaited.handle().clone();
        let steps = Rc::new(Cell::new(0));
        let s = Rc::clone(&steps);

        let w = executor.spawn(move |scope: Scope| async move {
            let features = scope.co_await(this_coro()).await;
            assert!(features.guarded_owner().is_none());
            s.set(1);
            scope.co_await(ManualWait(handle)).await;
            s.set(2);
        });
        assert_eq!(steps.get(), 1);
        assert!(awaited.handle().has_awaiting_coroutine());

        w.handle().destroy();
        assert!(w.is_ready());
        assert_eq!(w.take_result(), None);
        // The stale entry stays registered until the awaited frame finishes.
        assert!(awaited.handle().has_awaiting_coroutine());

        notify.notify_all();
        assert_eq!(steps.get(), 1);
        assert_eq!(awaited.take_result(), Some(42));
        assert!(!awaited.handle().has_awaiting_coroutine());
        assert_eq!(awaited.handle().ref_count(), Some(1));
        assert_eq!(executor.live_frames(), 1);

        drop(w);
        drop(awaited);
        assert_eq!(executor.live_frames(), 0);
        assert_eq!(executor.destroyed_frames(), 2);
    }

    /// Deterministic xorshift, enough to shuffle interleavings.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    #[test]
    fn random_interleavings_destroy_every_frame_once() {
        for seed in 1..50u64 {
            let mut rng = Rng(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let executor = Executor::new();
            let notifies: Vec<Notify> = (0..3).map(|_| Notify::new()).collect();
            let mut owners: Vec<Rc<()>> = (0..3).map(|_| Rc::new(())).collect();
            let mut tasks: Vec<Task<u32>> = Vec::new();
            let mut spawned = 0u64;

            for _ in 0..40 {
                match rng.below(5) {
                    0 => {
                        let n = notifies[rng.below(3)].clone();
                        tasks.push(executor.spawn(move |scope: Scope| async move {
                            scope.co_await(n.notified()).await;
                            1
                        }));
                        spawned += 1;
                    }
                    1 if !tasks.is_empty() => {
                        let awaited = tasks.swap_remove(rng.below(tasks.len()));
                        let guard = owners
                            .get(rng.below(owners.len() + 1))
                            .map(WeakOwner::from_rc);
                        tasks.push(executor.spawn(move |scope: Scope| async move {
                            let features = scope.co_await(this_coro()).await;
                            features.guard_owner(guard);
                            let value = scope.co_await(awaited).await;
                            value + 1
                        }));
                        spawned += 1;
                    }
                    2 if !tasks.is_empty() => {
                        drop(tasks.swap_remove(rng.below(tasks.len())));
                    }
                    3 if !owners.is_empty() => {
                        owners.swap_remove(rng.below(owners.len()));
                    }
                    _ => notifies[rng.below(3)].notify_all(),
                }
                assert!(executor.destroyed_frames() + executor.live_frames() as u64 == spawned);
                // Frames referenced by a task or a waiter list are never destroyed.
                assert!(tasks.iter().all(|t| t.handle().is_alive()), "seed {seed}");
                for task in &tasks {
                    let waiters = task
                        .handle()
                        .with_promise(|promise| promise.awaiting_coroutines().to_vec())
                        .unwrap_or_default();
                    assert!(waiters.iter().all(CoroHandle::is_alive), "seed {seed}");
                }
            }

            for notify in &notifies {
                notify.notify_all();
            }
            drop(tasks);

            assert_eq!(executor.live_frames(), 0, "seed {seed}");
            assert_eq!(executor.destroyed_frames(), spawned, "seed {seed}");
        }
    }

    #[test]
    fn plugin_provides_executor() {
        let mut app = App::new();
        app.add_plugins(CoroutinePlugin);

        let entity = app.world.spawn_empty().id();
        let owner = WeakOwner::from_entity(&mut app.world, entity).unwrap();
        let notify = Notify::new();
        let called = Rc::new(Cell::new(false));

        let task = {
            let executor = app.world.non_send_resource::<Executor>();
            let awaited = pending_value(executor, &notify);
            let c = Rc::clone(&called);
            executor.spawn(move |scope: Scope| async move {
                let features = scope.co_await(this_coro()).await;
                features.guard_owner(Some(owner));
                scope.co_await(awaited).await;
                c.set(true);
            })
        };

        app.world.despawn(entity);
        notify.notify_all();
        assert!(!called.get());
        drop(task);
        assert_eq!(app.world.non_send_resource::<Executor>().live_frames(), 0);
    }
}
