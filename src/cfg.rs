//! Switches between the standard library primitives and their Loom models.

pub mod atomic {
    #[cfg(not(all(loom, test)))]
    pub use core::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize};

    #[cfg(all(loom, test))]
    pub use loom::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize};
}

pub mod hint {
    #[cfg(not(all(loom, test)))]
    pub use core::hint::spin_loop;

    #[cfg(all(loom, test))]
    pub use loom::hint::spin_loop;
}

pub mod thread {
    #[cfg(not(all(loom, test)))]
    pub use std::thread::{current, park, park_timeout, yield_now, Thread};

    #[cfg(all(loom, test))]
    pub use loom::thread::{current, park, yield_now, Thread};

    /// Loom has no notion of time, a timed park degrades to a yield.
    #[cfg(all(loom, test))]
    pub fn park_timeout(_dur: std::time::Duration) {
        yield_now();
    }
}

pub mod sync {
    #[cfg(not(all(loom, test)))]
    pub use std::sync::Arc;

    #[cfg(all(loom, test))]
    pub use loom::sync::Arc;
}

pub mod cell {
    #[cfg(not(all(loom, test)))]
    pub use core::cell::UnsafeCell;

    #[cfg(all(loom, test))]
    pub use loom::cell::UnsafeCell;

    /// Shared access to the contents of an [`UnsafeCell`], under either
    /// implementation.
    pub trait UnsafeCellWith<T: ?Sized> {
        /// Runs `f` against a shared reference to the cell contents.
        ///
        /// # Safety
        ///
        /// Caller must guarantee there are no mutable aliases to the
        /// contents for the duration of the call.
        unsafe fn with_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&T) -> Ret;
    }

    impl<T: ?Sized> UnsafeCellWith<T> for UnsafeCell<T> {
        #[cfg(not(all(loom, test)))]
        unsafe fn with_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&T) -> Ret,
        {
            // SAFETY: Caller guaranteed that there are no mutable aliases.
            f(unsafe { &*self.get() })
        }

        #[cfg(all(loom, test))]
        unsafe fn with_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&T) -> Ret,
        {
            // SAFETY: Caller guaranteed that there are no mutable aliases.
            self.with(|ptr| f(unsafe { &*ptr }))
        }
    }
}
