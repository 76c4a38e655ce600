use loom::cell::UnsafeCell;

/// A trait for guard types that hold exclusive access to the underlying data
/// behind Loom's [`UnsafeCell`].
///
/// # Safety
///
/// Must guarantee that an instance of the guard holds exclusive access to its
/// underlying data through all its lifetime.
pub unsafe trait Guard: Sized {
    /// The type of the guarded data.
    type Target: ?Sized;

    /// Returns a shared reference to the underlying [`UnsafeCell`].
    fn get(&self) -> &UnsafeCell<Self::Target>;

    /// Runs `f` against a shared reference to the guarded data.
    fn with<Ret>(&self, f: impl FnOnce(&Self::Target) -> Ret) -> Ret {
        // SAFETY: Implementors guarantee exclusive access for our lifetime.
        self.get().with(|ptr| f(unsafe { &*ptr }))
    }

    /// Runs `f` against an exclusive reference to the guarded data.
    fn with_mut<Ret>(&mut self, f: impl FnOnce(&mut Self::Target) -> Ret) -> Ret {
        // SAFETY: Implementors guarantee exclusive access for our lifetime.
        self.get().with_mut(|ptr| f(unsafe { &mut *ptr }))
    }
}

pub mod models {
    use core::array;

    use loom::model::Builder;
    use loom::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use loom::sync::Arc;
    use loom::thread;

    use super::Guard;
    use crate::config::SpinConfig;
    use crate::locks::{Fairness, Lock, Mutex, MutexPolicy, ReentrantLock};
    use crate::queued::Condition;
    use crate::relax::Yield;
    use crate::stamped::StampedLock;
    use crate::test::LockWith;

    type Int = usize;
    const THREADS: Int = 2;

    /// Bounds the preemptions explored, the queues take many atomic steps
    /// per acquisition. Every queue link access is a Loom mutex operation,
    /// which also raises the branch count of a single execution.
    fn model<F: Fn() + Sync + Send + 'static>(f: F) {
        let mut builder = Builder::new();
        builder.preemption_bound = Some(3);
        builder.max_branches = 10_000;
        builder.check(f);
    }

    /// Increments a shared integer.
    fn inc<L: LockWith<Target = Int>>(lock: &Arc<L>) {
        lock.lock_with(|mut guard| guard.with_mut(|data| *data += 1));
    }

    /// Get the shared integer.
    fn get<L: LockWith<Target = Int>>(lock: &Arc<L>) -> Int {
        lock.lock_with(|guard| guard.with(|data| *data))
    }

    /// Evaluates that concurrent `lock` calls will serialize all mutations
    /// against the shared data, therefore no data races.
    pub fn lock_join<L: LockWith<Target = Int> + Send + Sync + 'static>() {
        model(|| {
            let data = Arc::new(L::new(0));
            let handles: [_; THREADS] = array::from_fn(|_| {
                let data = Arc::clone(&data);
                thread::spawn(move || inc(&data))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(THREADS, get(&data));
        });
    }

    /// Evaluates that reentrant holds are only released by the last unlock,
    /// and that a competing thread never observes a partial hold.
    pub fn reentrant_join<F: Fairness + 'static>()
    where
        ReentrantLock<F>: Send + Sync,
    {
        model(|| {
            let lock = Arc::new(ReentrantLock::<F>::new());
            let inside = Arc::new(AtomicUsize::new(0));
            let handles: [_; THREADS] = array::from_fn(|_| {
                let (lock, inside) = (Arc::clone(&lock), Arc::clone(&inside));
                thread::spawn(move || {
                    lock.lock();
                    lock.lock();
                    assert_eq!(inside.fetch_add(1, SeqCst), 0);
                    lock.unlock().unwrap();
                    assert_eq!(inside.fetch_sub(1, SeqCst), 1);
                    lock.unlock().unwrap();
                })
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert!(!lock.is_locked());
        });
    }

    /// Evaluates that a signal sent after the waiter observed the predicate
    /// as false is never lost.
    pub fn condition_signal() {
        model(|| {
            // Loom threads must be `'static`, and the condition borrows the
            // mutex. Both are reclaimed once the waiter is joined, Loom
            // reports any queue node left behind as a leak.
            let mutex_ptr = Box::into_raw(Box::new(Mutex::new(false)));
            // SAFETY: Freed below, after every thread using it was joined.
            let mutex: &'static Mutex<bool> = unsafe { &*mutex_ptr };
            let cond_ptr = Box::into_raw(Box::new(mutex.new_condition()));
            // SAFETY: Freed below, after every thread using it was joined.
            let cond: &'static Condition<'static, MutexPolicy> = unsafe { &*cond_ptr };
            let waiter = thread::spawn(move || {
                let guard = mutex.lock();
                while !Guard::with(&guard, |ready| *ready) {
                    cond.wait().unwrap();
                }
                drop(guard);
            });
            let mut guard = mutex.lock();
            Guard::with_mut(&mut guard, |ready| *ready = true);
            cond.signal().unwrap();
            drop(guard);
            waiter.join().unwrap();
            assert!(!mutex.is_locked());
            // SAFETY: Both came from `Box::into_raw` above and the waiter is
            // joined, the condition goes first since it borrows the mutex.
            unsafe {
                drop(Box::from_raw(cond_ptr));
                drop(Box::from_raw(mutex_ptr));
            }
        });
    }

    /// Evaluates that readers never observe a write in progress, and that
    /// an optimistic read is invalidated by a completed write.
    pub fn stamped_read_write() {
        model(|| {
            let lock = Arc::new(StampedLock::<Yield>::with_config(SpinConfig::uniprocessor()));
            let data = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
            // Taken before the writer exists, so the write always follows it.
            let optimistic = lock.try_optimistic_read().unwrap();
            let writer = {
                let (lock, data) = (Arc::clone(&lock), Arc::clone(&data));
                thread::spawn(move || {
                    let stamp = lock.write_lock();
                    data.0.store(1, SeqCst);
                    data.1.store(1, SeqCst);
                    lock.unlock_write(stamp).unwrap();
                })
            };
            let stamp = lock.read_lock();
            assert_eq!(data.0.load(SeqCst), data.1.load(SeqCst));
            lock.unlock_read(stamp).unwrap();
            writer.join().unwrap();
            assert!(!lock.validate(optimistic));
            assert!(!lock.is_write_locked() && !lock.is_read_locked());
        });
    }
}
