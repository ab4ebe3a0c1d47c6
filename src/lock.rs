//! Stripe locking (spec §5): the slot array is divided into fixed-size
//! stripes, each guarded by its own spinlock. A mutation or query acquires
//! the locks for the (at most two) stripes it may touch, in ascending
//! stripe order, so that operations on overlapping stripes always linearize
//! the same way regardless of which one started first.
//!
//! A spinlock rather than `std::sync::Mutex` because spec §5/§9 call for
//! one explicitly ("each stripe carries a spinlock") and `TRY_ONCE_LOCK`
//! needs a single non-blocking attempt, which a raw atomic gives directly.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CqfError, Result};

/// Number of slots covered by one stripe lock.
pub const STRIPE_SIZE: u64 = 4096;

/// How a call should behave when a stripe it needs is contended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Bypass locking entirely. Readers may observe torn counter-group
    /// shifts under concurrent mutation; this is a documented tradeoff, not
    /// a bug.
    NoLock,
    /// Spin until every required stripe is acquired.
    WaitForLock,
    /// Attempt each required stripe exactly once; fail with
    /// [`CqfError::CouldntLock`] if any is already held.
    TryOnceLock,
}

/// A single stripe's lock.
#[derive(Debug, Default)]
pub struct Spinlock {
    locked: AtomicBool,
}

impl Spinlock {
    const fn new() -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// One spinlock per stripe of the slot array.
#[derive(Debug)]
pub struct StripeLocks {
    stripes: Vec<Spinlock>,
}

impl StripeLocks {
    /// Builds enough stripes to cover `nslots` slots.
    pub fn new(nslots: u64) -> Self {
        let num_stripes = ((nslots + STRIPE_SIZE - 1) / STRIPE_SIZE).max(1);
        StripeLocks {
            stripes: (0..num_stripes).map(|_| Spinlock::new()).collect(),
        }
    }

    /// Number of stripes.
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Whether there are no stripes (never true for a non-empty filter).
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// The stripe index covering `slot_index`.
    pub fn stripe_of(&self, slot_index: u64) -> usize {
        (slot_index / STRIPE_SIZE) as usize
    }

    /// Acquires the stripe(s) covering `[first_slot, last_slot]` under
    /// `mode`, in ascending stripe order, and returns a guard that releases
    /// them on drop. `last_slot` may fall in the same stripe as
    /// `first_slot`, in which case only one lock is taken.
    pub fn acquire(&self, first_slot: u64, last_slot: u64, mode: LockMode) -> Result<StripeGuard<'_>> {
        let low = self.stripe_of(first_slot).min(self.stripes.len() - 1);
        let high = self.stripe_of(last_slot).min(self.stripes.len() - 1);
        debug_assert!(low <= high);

        match mode {
            LockMode::NoLock => Ok(StripeGuard { locks: self, held: Vec::new() }),
            LockMode::WaitForLock => {
                self.stripes[low].lock();
                if high != low {
                    self.stripes[high].lock();
                }
                let held = if high != low { vec![low, high] } else { vec![low] };
                Ok(StripeGuard { locks: self, held })
            }
            LockMode::TryOnceLock => {
                if !self.stripes[low].try_lock() {
                    log::debug!("stripe {} contended under TRY_ONCE_LOCK", low);
                    return Err(CqfError::CouldntLock);
                }
                if high != low && !self.stripes[high].try_lock() {
                    log::debug!("stripe {} contended under TRY_ONCE_LOCK", high);
                    self.stripes[low].unlock();
                    return Err(CqfError::CouldntLock);
                }
                let held = if high != low { vec![low, high] } else { vec![low] };
                Ok(StripeGuard { locks: self, held })
            }
        }
    }
}

/// RAII guard releasing the stripes it was handed to acquire on drop.
pub struct StripeGuard<'a> {
    locks: &'a StripeLocks,
    held: Vec<usize>,
}

impl Drop for StripeGuard<'_> {
    fn drop(&mut self) {
        for &index in &self.held {
            self.locks.stripes[index].unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stripe_for_small_filter() {
        let locks = StripeLocks::new(64);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn stripe_count_rounds_up() {
        let locks = StripeLocks::new(STRIPE_SIZE * 3 + 1);
        assert_eq!(locks.len(), 4);
    }

    #[test]
    fn acquire_then_drop_releases() {
        let locks = StripeLocks::new(STRIPE_SIZE * 4);
        {
            let _guard = locks.acquire(0, STRIPE_SIZE, LockMode::WaitForLock).unwrap();
            assert!(!locks.stripes[0].try_lock());
        }
        assert!(locks.stripes[0].try_lock());
        locks.stripes[0].unlock();
    }

    #[test]
    fn try_once_fails_when_contended() {
        let locks = StripeLocks::new(STRIPE_SIZE * 2);
        let _first = locks.acquire(0, 0, LockMode::WaitForLock).unwrap();
        let second = locks.acquire(0, 0, LockMode::TryOnceLock);
        assert_eq!(second.err(), Some(CqfError::CouldntLock));
    }

    #[test]
    fn no_lock_mode_takes_nothing() {
        let locks = StripeLocks::new(STRIPE_SIZE * 2);
        let _guard = locks.acquire(0, STRIPE_SIZE, LockMode::NoLock).unwrap();
        assert!(locks.stripes[0].try_lock());
        locks.stripes[0].unlock();
    }
}
