//! Flush Lock
//!
//! A single atomic flag per processor instance guaranteeing that at most one
//! flush runs at a time. Acquisition is a non-blocking compare-and-swap; the
//! returned guard releases the flag when dropped, including during unwinding.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Binary try-lock guarding the flush region
#[derive(Debug, Default)]
pub struct FlushLock {
    /// true while a flush holds the lock
    held: CachePadded<AtomicBool>,
    /// Woken on every release
    released: Notify,
}

impl FlushLock {
    /// Create an unlocked flush lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock without waiting
    ///
    /// Returns `None` when another flush already holds it.
    #[inline]
    pub fn try_acquire(&self) -> Option<FlushGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard { lock: self })
    }

    /// Wait until the lock can be taken
    ///
    /// Only used on shutdown; regular flush triggers skip on contention.
    pub async fn acquire(&self) -> FlushGuard<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            released.await;
        }
    }

    /// Whether a flush currently holds the lock
    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

/// Proof of holding the [`FlushLock`]; releases it on drop
#[derive(Debug)]
pub struct FlushGuard<'a> {
    lock: &'a FlushLock,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
