//! Cooperative wait/notify bookkeeping for `memory.atomic.wait`/`notify`
//! (§4.8).
//!
//! The scheduler (`cluster.rs`) is single-threaded and strictly sequential:
//! a parked task is just re-polled on its next turn rather than woken by an
//! asynchronous signal, so all this needs to track is how many wake credits
//! are owed per address, not an actual wakeup mechanism.

use alloc::collections::BTreeMap;
use core::cell::RefCell;

/// Identifies one `memory.atomic.wait` address: a memory's identity (its
/// `Rc` data pointer, since two memories can share the same byte offset)
/// paired with the effective byte address.
pub type WaitKey = (usize, u64);

#[derive(Default)]
pub struct WaitRegistry {
    waiters: RefCell<BTreeMap<WaitKey, u32>>,
    credits: RefCell<BTreeMap<WaitKey, u32>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: WaitKey) {
        *self.waiters.borrow_mut().entry(key).or_insert(0) += 1;
    }

    /// Called by a parked waiter on each retry; consumes one credit if one
    /// is available for `key`, returning whether this waiter wakes now.
    pub fn try_consume(&self, key: WaitKey) -> bool {
        let mut credits = self.credits.borrow_mut();
        let woken = match credits.get_mut(&key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                if *n == 0 {
                    credits.remove(&key);
                }
                true
            }
            _ => false,
        };
        if woken {
            let mut waiters = self.waiters.borrow_mut();
            if let Some(w) = waiters.get_mut(&key) {
                *w = w.saturating_sub(1);
                if *w == 0 {
                    waiters.remove(&key);
                }
            }
        }
        woken
    }

    /// Wakes up to `count` currently-registered waiters at `key`, returning
    /// how many were actually woken (never more than are parked there).
    pub fn notify(&self, key: WaitKey, count: u32) -> u32 {
        let waiters = *self.waiters.borrow().get(&key).unwrap_or(&0);
        let existing_credits = *self.credits.borrow().get(&key).unwrap_or(&0);
        let available = waiters.saturating_sub(existing_credits);
        let n = count.min(available);
        if n > 0 {
            *self.credits.borrow_mut().entry(key).or_insert(0) += n;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_bounds_credits_to_waiters() {
        let reg = WaitRegistry::new();
        reg.register((1, 0));
        assert_eq!(reg.notify((1, 0), 5), 1);
        assert!(reg.try_consume((1, 0)));
        assert!(!reg.try_consume((1, 0)));
    }

    #[test]
    fn notify_without_waiters_wakes_none() {
        let reg = WaitRegistry::new();
        assert_eq!(reg.notify((1, 0), 3), 0);
    }
}
