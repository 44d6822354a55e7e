//! Ranked locks
//!
//! Every lock in the engine is an [`OrderedMutex`] carrying a [`LockRank`].
//! Locks must be taken in increasing rank order:
//!
//! ```text
//! Flush  →  Buffer  →  Index  →  File(0) → File(1) → … → File(initial)
//! ```
//!
//! Re-entering a lock the current thread already holds is always allowed.
//! Taking a lower-ranked lock while holding a higher-ranked one panics in
//! debug builds and is logged as an error in release builds. Held locks are
//! tracked per thread, so guards may be released in any order.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::position::PartitionId;

/// Position of a lock in the global acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockRank {
    /// Serializes flushes against deletes and GC
    Flush,
    /// Guards the buffer manager state
    Buffer,
    /// Guards the index manager and its cache
    Index,
    /// Guards one partition's value log file
    File(PartitionId),
}

impl fmt::Display for LockRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockRank::Flush => write!(f, "flush"),
            LockRank::Buffer => write!(f, "buffer"),
            LockRank::Index => write!(f, "index"),
            LockRank::File(p) => write!(f, "file({})", p),
        }
    }
}

thread_local! {
    /// (rank, lock address) for every guard alive on this thread
    static HELD: RefCell<Vec<(LockRank, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Highest-ranked lock currently held by this thread
pub fn max_held_rank() -> Option<LockRank> {
    HELD.with(|held| held.borrow().iter().map(|(rank, _)| *rank).max())
}

/// Whether this thread holds any lock ranked at or above `rank`
pub fn holds_at_least(rank: LockRank) -> bool {
    max_held_rank().is_some_and(|held| held >= rank)
}

/// A re-entrant mutex that checks the global lock order on acquisition
pub struct OrderedMutex<T> {
    rank: LockRank,
    inner: ReentrantMutex<T>,
}

impl<T> OrderedMutex<T> {
    pub fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            inner: ReentrantMutex::new(value),
        }
    }

    pub fn rank(&self) -> LockRank {
        self.rank
    }

    /// Acquire the lock, checking the order against locks already held
    pub fn lock(&self) -> OrderedGuard<'_, T> {
        let addr = self as *const Self as usize;
        self.check_order(addr);

        let guard = self.inner.lock();
        HELD.with(|held| held.borrow_mut().push((self.rank, addr)));

        OrderedGuard {
            rank: self.rank,
            addr,
            guard,
        }
    }

    fn check_order(&self, addr: usize) {
        let violation = HELD.with(|held| {
            let held = held.borrow();
            if held.iter().any(|&(_, a)| a == addr) {
                return None;
            }
            held.iter()
                .map(|(rank, _)| *rank)
                .filter(|rank| *rank > self.rank)
                .max()
        });

        if let Some(higher) = violation {
            if cfg!(debug_assertions) {
                panic!(
                    "lock order violation: acquiring {} while holding {}",
                    self.rank, higher
                );
            }
            tracing::error!(
                acquiring = %self.rank,
                holding = %higher,
                "lock order violation"
            );
        }
    }
}

/// Guard for an [`OrderedMutex`]; releasing it updates the held-lock record
pub struct OrderedGuard<'a, T> {
    rank: LockRank,
    addr: usize,
    guard: ReentrantMutexGuard<'a, T>,
}

impl<T> OrderedGuard<'_, T> {
    pub fn rank(&self) -> LockRank {
        self.rank
    }
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        let entry = (self.rank, self.addr);
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|e| *e == entry) {
                held.remove(pos);
            }
        });
    }
}
