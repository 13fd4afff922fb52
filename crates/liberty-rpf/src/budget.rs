//! Bounded byte budget for in-flight extraction buffers.

use parking_lot::{Condvar, Mutex};

/// Counting resource limiting the bytes held by concurrent workers.
///
/// [`acquire`](Self::acquire) blocks until the request fits; it never
/// fails and has no timeout. The returned guard releases on drop, so every
/// exit path of the acquiring scope gives the bytes back.
///
/// A single request larger than the whole capacity is clamped to the
/// capacity: it waits for the budget to drain completely and then runs
/// alone.
#[derive(Debug)]
pub struct MemoryBudget {
    capacity: u64,
    outstanding: Mutex<u64>,
    released: Condvar,
}

impl MemoryBudget {
    /// Create a budget of `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            outstanding: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Configured capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently acquired.
    pub fn outstanding(&self) -> u64 {
        *self.outstanding.lock()
    }

    /// Block until `bytes` fit, then take them.
    pub fn acquire(&self, bytes: u64) -> BudgetGuard<'_> {
        let bytes = bytes.min(self.capacity);
        let mut outstanding = self.outstanding.lock();

        while *outstanding + bytes > self.capacity {
            self.released.wait(&mut outstanding);
        }
        *outstanding += bytes;

        BudgetGuard {
            budget: self,
            bytes,
        }
    }

    fn release(&self, bytes: u64) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(bytes);
        drop(outstanding);
        self.released.notify_all();
    }
}

/// Bytes held from a [`MemoryBudget`]; released on drop.
#[derive(Debug)]
#[must_use = "the budget is released as soon as the guard is dropped"]
pub struct BudgetGuard<'a> {
    budget: &'a MemoryBudget,
    bytes: u64,
}

impl BudgetGuard<'_> {
    /// Bytes held by this guard.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for BudgetGuard<'_> {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}
