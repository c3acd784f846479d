// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    parking_lot::{Condvar, Mutex},
    std::{sync::Arc, time::Duration},
};

/// Counting semaphore built on a mutex and condvar.
///
/// The scan lock is a `Semaphore` counted to one: it is acquired by any
/// caller task initiating a scan and released exclusively by the dispatcher
/// after the scan results have been handled. The dispatcher must never call
/// `acquire` itself.
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

struct SemaphoreInner {
    count: Mutex<u32>,
    max: u32,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Semaphore {
            inner: Arc::new(SemaphoreInner {
                count: Mutex::new(initial),
                max: initial,
                available: Condvar::new(),
            }),
        }
    }

    /// Blocks until a permit is available.
    pub fn acquire(&self) {
        let mut count = self.inner.count.lock();
        while *count == 0 {
            self.inner.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Blocks up to `timeout` for a permit. Returns false on timeout.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.inner.count.lock();
        while *count == 0 {
            if self.inner.available.wait_for(&mut count, timeout).timed_out() {
                return false;
            }
        }
        *count -= 1;
        true
    }

    pub fn try_acquire(&self) -> bool {
        let mut count = self.inner.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn release(&self) {
        let mut count = self.inner.count.lock();
        debug_assert!(*count < self.inner.max, "semaphore released more often than acquired");
        if *count < self.inner.max {
            *count += 1;
        }
        self.inner.available.notify_one();
    }

    pub fn available(&self) -> u32 {
        *self.inner.count.lock()
    }
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Semaphore { inner: Arc::clone(&self.inner) }
    }
}

/// Counting guard preventing the platform from entering deep low-power while
/// held. Every `acquire` hands back a guard whose drop performs the matching
/// release, so gets and puts pair on all control-flow paths.
#[derive(Clone)]
pub struct WakeLock {
    count: Arc<Mutex<u32>>,
}

impl WakeLock {
    pub fn new() -> Self {
        WakeLock { count: Arc::new(Mutex::new(0)) }
    }

    pub fn acquire(&self) -> WakeLockGuard {
        *self.count.lock() += 1;
        WakeLockGuard { count: Arc::clone(&self.count) }
    }

    pub fn held(&self) -> u32 {
        *self.count.lock()
    }
}

pub struct WakeLockGuard {
    count: Arc<Mutex<u32>>,
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0);
        *count = count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::thread};

    #[test]
    fn semaphore_counts_to_one() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
        sem.release();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn semaphore_release_caps_at_max() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        sem.release();
        // A second release must not mint an extra permit.
        #[cfg(not(debug_assertions))]
        {
            sem.release();
            assert_eq!(sem.available(), 1);
        }
    }

    #[test]
    fn semaphore_cross_thread_release() {
        let sem = Semaphore::new(1);
        sem.acquire();
        let releaser = sem.clone();
        let handle = thread::spawn(move || releaser.release());
        sem.acquire();
        handle.join().unwrap();
        sem.release();
    }

    #[test]
    fn semaphore_acquire_timeout() {
        let sem = Semaphore::new(1);
        sem.acquire();
        assert!(!sem.acquire_timeout(Duration::from_millis(10)));
        sem.release();
        assert!(sem.acquire_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wake_lock_guard_pairs_get_and_put() {
        let lock = WakeLock::new();
        assert_eq!(lock.held(), 0);
        let guard = lock.acquire();
        assert_eq!(lock.held(), 1);
        {
            let _inner = lock.acquire();
            assert_eq!(lock.held(), 2);
        }
        assert_eq!(lock.held(), 1);
        drop(guard);
        assert_eq!(lock.held(), 0);
    }
}
