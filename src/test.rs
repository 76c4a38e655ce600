//! Generic harness shared by the lock types of this crate.

#[cfg(not(all(loom, test)))]
use core::cell::UnsafeCell;
#[cfg(not(all(loom, test)))]
use core::ops::{Deref, DerefMut};

/// A trait for lock types that can hold user defined values.
pub trait LockNew {
    /// The type of the value this lock holds.
    type Target: ?Sized;

    /// Creates a new lock in an unlocked state ready for use.
    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized;
}

/// A trait for lock types that can run closures against the protected data.
pub trait LockWith: LockNew {
    /// A `guard` has access to the protected data.
    #[cfg(not(all(loom, test)))]
    type Guard<'a>: DerefMut<Target = Self::Target>
    where
        Self: 'a,
        Self::Target: 'a;

    /// A `guard` has access to the protected data through Loom's cells.
    #[cfg(all(loom, test))]
    type Guard<'a>: crate::loom::Guard<Target = Self::Target>
    where
        Self: 'a,
        Self::Target: 'a;

    /// Acquires the lock and then runs the closure against the guard.
    fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(Self::Guard<'_>) -> Ret;
}

/// A trait for lock types that can give out an exclusive reference to the
/// underlying value.
#[cfg(not(loom))]
pub trait LockData: LockNew {
    /// Returns a mutable reference to the underlying data.
    fn get_mut(&mut self) -> &mut Self::Target;
}

/// A lock that does not guard data by itself, driven by [`Guarded`].
#[cfg(not(all(loom, test)))]
pub trait RawLock: Default {
    /// Blocks until the calling thread holds the lock.
    fn acquire(&self);

    /// Releases the lock held by the calling thread.
    fn release(&self);
}

/// Pairs a [`RawLock`] with the data it protects, so that the data guarding
/// harness can run against it.
#[cfg(not(all(loom, test)))]
pub struct Guarded<L, T: ?Sized> {
    lock: L,
    data: UnsafeCell<T>,
}

// SAFETY: The data is only ever accessed while holding the lock.
#[cfg(not(all(loom, test)))]
unsafe impl<L: Send, T: ?Sized + Send> Send for Guarded<L, T> {}
// SAFETY: The data is only ever accessed while holding the lock.
#[cfg(not(all(loom, test)))]
unsafe impl<L: Sync, T: ?Sized + Send> Sync for Guarded<L, T> {}

#[cfg(not(all(loom, test)))]
impl<L: RawLock, T: ?Sized> LockNew for Guarded<L, T> {
    type Target = T;

    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized,
    {
        Self { lock: L::default(), data: UnsafeCell::new(value) }
    }
}

#[cfg(not(all(loom, test)))]
impl<L: RawLock, T: ?Sized> LockWith for Guarded<L, T> {
    type Guard<'a> = GuardedGuard<'a, L, T>
    where
        Self: 'a,
        Self::Target: 'a;

    fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(GuardedGuard<'_, L, T>) -> Ret,
    {
        self.lock.acquire();
        f(GuardedGuard { owner: self })
    }
}

/// Access to the data of a [`Guarded`] lock while it is held.
#[cfg(not(all(loom, test)))]
pub struct GuardedGuard<'a, L: RawLock, T: ?Sized> {
    owner: &'a Guarded<L, T>,
}

#[cfg(not(all(loom, test)))]
impl<L: RawLock, T: ?Sized> Deref for GuardedGuard<'_, L, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &*self.owner.data.get() }
    }
}

#[cfg(not(all(loom, test)))]
impl<L: RawLock, T: ?Sized> DerefMut for GuardedGuard<'_, L, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &mut *self.owner.data.get() }
    }
}

#[cfg(not(all(loom, test)))]
impl<L: RawLock, T: ?Sized> Drop for GuardedGuard<'_, L, T> {
    fn drop(&mut self) {
        self.owner.lock.release();
    }
}

#[cfg(all(not(loom), test))]
pub mod tests {
    // Modified test suite from the Rust's Mutex implementation with minor changes
    // since the API is not compatible with this crate implementation and some
    // new tests as well.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    use std::fmt::{Debug, Display};
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::{LockData, LockWith};

    /// An arbitrary unsigned integer type.
    pub type Int = u32;

    #[derive(Eq, PartialEq, Debug)]
    pub struct NonCopy(u32);

    const ITERS: Int = 1000;
    const CONCURRENCY: Int = 3;
    const EXPECTED_VALUE: Int = ITERS * CONCURRENCY * 2;

    /// Get a copy of the lock protected data.
    fn get<L>(lock: &L) -> L::Target
    where
        L: LockWith,
        L::Target: Sized + Copy,
    {
        lock.lock_with(|data| *data)
    }

    /// Increments a shared integer.
    fn inc<L: LockWith<Target = Int>>(lock: &L) {
        lock.lock_with(|mut data| *data += 1);
    }

    fn inc_for<L: LockWith<Target = Int>>(lock: &Arc<L>) {
        for _ in 0..ITERS {
            inc(&**lock);
        }
    }

    pub fn lots_and_lots_lock<L>()
    where
        L: LockWith<Target = Int> + Send + Sync + 'static,
    {
        let lock = Arc::new(L::new(0));
        let (tx, rx) = channel();
        for _ in 0..2 * CONCURRENCY {
            let (lock, tx) = (Arc::clone(&lock), tx.clone());
            thread::spawn(move || {
                inc_for(&lock);
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..2 * CONCURRENCY {
            rx.recv().unwrap();
        }
        assert_eq!(get(&*lock), EXPECTED_VALUE);
    }

    pub fn smoke<L>()
    where
        L: LockWith<Target = Int>,
    {
        let lock = L::new(1);
        lock.lock_with(|guard| drop(guard));
        lock.lock_with(|guard| drop(guard));
    }

    pub fn test_guard_debug_display<L>()
    where
        L: LockWith<Target = Int>,
        for<'a> <L as LockWith>::Guard<'a>: Debug + Display,
    {
        let value = 42;
        let lock = L::new(value);
        lock.lock_with(|data| {
            assert_eq!(format!("{value:?}"), format!("{data:?}"));
            assert_eq!(format!("{value}"), format!("{data}"));
        });
    }

    pub fn test_mutex_debug<L>()
    where
        L: LockWith<Target = Int> + Debug,
    {
        let value = 42;
        let lock = L::new(value);
        let msg = format!("Mutex {{ data: {value:?} }}");
        assert_eq!(msg, format!("{lock:?}"));
    }

    pub fn test_mutex_default<L>()
    where
        L: LockData<Target = Int> + Default,
    {
        let mut lock: L = Default::default();
        assert_eq!(u32::default(), *lock.get_mut());
    }

    pub fn test_mutex_from<L>()
    where
        L: LockData<Target = Int> + From<Int>,
    {
        let value = 42;
        let mut lock = L::from(value);
        assert_eq!(value, *lock.get_mut());
    }

    pub fn test_get_mut<L>()
    where
        L: LockData<Target = NonCopy>,
    {
        let mut lock = L::new(NonCopy(10));
        *lock.get_mut() = NonCopy(20);
        assert_eq!(*lock.get_mut(), NonCopy(20));
    }

    pub fn test_lock_arc_nested<L1, L2>()
    where
        L1: LockWith<Target = Int> + Send + Sync + 'static,
        L2: LockWith<Target = Arc<L1>> + Send + Sync + 'static,
    {
        // Tests nested locks and access to underlying data.
        let arc = Arc::new(L1::new(1));
        let arc2 = Arc::new(L2::new(arc));
        let (tx, rx) = channel();
        let _t = thread::spawn(move || {
            let val = arc2.lock_with(|arc2| get(&**arc2));
            assert_eq!(val, 1);
            tx.send(()).unwrap();
        });
        rx.recv().unwrap();
    }

    pub fn test_acquire_more_than_one_lock<L>()
    where
        L: LockWith<Target = Int> + Send + Sync + 'static,
    {
        let arc = Arc::new(L::new(1));
        let (tx, rx) = channel();
        for _ in 0..4 {
            let tx2 = tx.clone();
            let c_arc = Arc::clone(&arc);
            let _t = thread::spawn(move || {
                c_arc.lock_with(|_d| {
                    let lock = L::new(1);
                    lock.lock_with(|_g| ());
                });
                tx2.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..4 {
            rx.recv().unwrap();
        }
    }

    pub fn test_lock_arc_access_in_unwind<L>()
    where
        L: LockWith<Target = Int> + Send + Sync + 'static,
    {
        let arc = Arc::new(L::new(1));
        let arc2 = Arc::clone(&arc);
        let _ = thread::spawn(move || {
            struct Unwinder<T: LockWith<Target = Int>> {
                i: Arc<T>,
            }
            impl<T: LockWith<Target = Int>> Drop for Unwinder<T> {
                fn drop(&mut self) {
                    inc(&*self.i);
                }
            }
            let _u = Unwinder { i: arc2 };
            panic!();
        })
        .join();
        assert_eq!(get(&*arc), 2);
    }

    pub fn test_lock_unsized<L>()
    where
        L: LockWith<Target = [Int; 3]>,
    {
        let lock = L::new([1, 2, 3]);
        lock.lock_with(|mut d| {
            d[0] = 4;
            d[2] = 5;
        });
        let comp: &[Int] = &[4, 2, 5];
        assert_eq!(comp, get(&lock));
    }
}
