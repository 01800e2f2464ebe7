//! Per-thread nesting depth and thread identity.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static DEPTH: DepthCounter = const { DepthCounter::new() };
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Identifier of the calling thread, assigned on first use and stable for
/// the thread's lifetime.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Nesting depth of open probes on one thread.
#[derive(Debug)]
pub struct DepthCounter {
    depth: Cell<u32>,
}

impl DepthCounter {
    pub const fn new() -> Self {
        DepthCounter {
            depth: Cell::new(0),
        }
    }

    pub fn get(&self) -> u32 {
        self.depth.get()
    }

    fn enter(&self) -> u32 {
        let depth = self.depth.get();
        self.depth.set(depth + 1);
        depth
    }

    fn leave(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Default for DepthCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Current depth on the calling thread.
pub fn current_depth() -> u32 {
    DEPTH.with(DepthCounter::get)
}

/// Holds one level of the calling thread's depth counter.
///
/// The level is released on drop, including during unwinding. `!Send`:
/// it must be dropped on the thread that entered.
#[derive(Debug)]
pub struct DepthGuard {
    depth: u32,
    _not_send: PhantomData<*const ()>,
}

impl DepthGuard {
    pub fn enter() -> Self {
        DepthGuard {
            depth: DEPTH.with(DepthCounter::enter),
            _not_send: PhantomData,
        }
    }

    /// Depth this guard was opened at (0 = outermost).
    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread teardown.
        let _ = DEPTH.try_with(DepthCounter::leave);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_nest_and_unwind() {
        assert_eq!(current_depth(), 0);
        {
            let outer = DepthGuard::enter();
            assert_eq!(outer.depth(), 0);
            {
                let inner = DepthGuard::enter();
                assert_eq!(inner.depth(), 1);
                assert_eq!(current_depth(), 2);
            }
            assert_eq!(current_depth(), 1);
        }
        assert_eq!(current_depth(), 0);
    }

    #[test]
    fn test_depth_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = DepthGuard::enter();
            let _nested = DepthGuard::enter();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(current_depth(), 0);
    }

    #[test]
    fn test_threads_have_independent_depth() {
        let _guard = DepthGuard::enter();
        let other = std::thread::spawn(current_depth).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(current_depth(), 1);
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }
}
