use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Slot contents. At most one pending value exists by construction.
enum Slots<T> {
    Empty,
    Current(T),
    Pending { current: Option<T>, pending: T },
}

struct CacheState<T> {
    slots: Slots<T>,
    waiters: usize,
}

/// Single-producer, multi-consumer mailbox holding the current value and at most one
/// pending overwrite.
///
/// ARCHITECTURE:
/// - Producer: `post` replaces any unread pending value (most recent wins)
/// - Consumers: `get` promotes the pending value and marks everything posted so far as read;
///   `peek` promotes but does not mark anything read
/// - Freshness: `is_fresh` is `write_count > read_count`, read without the lock
///
/// A slow consumer can skip values. That is the intended trade: freshness over completeness.
///
/// # Examples
/// ```
/// use firefuse_structures::FreshnessCache;
///
/// let cache = FreshnessCache::with_value(String::from("first"));
/// cache.post(String::from("second"));
/// cache.post(String::from("third"));
/// assert!(cache.is_fresh());
/// assert_eq!(cache.get(), "third");
/// assert!(!cache.is_fresh());
/// ```
pub struct FreshnessCache<T> {
    state: Mutex<CacheState<T>>,
    wake: Condvar,
    write_count: AtomicU64,
    read_count: AtomicU64,
}

impl<T: Clone + Default> FreshnessCache<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                slots: Slots::Empty,
                waiters: 0,
            }),
            wake: Condvar::new(),
            write_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
        }
    }

    /// Cache with `initial` already posted, so no reader ever sees an empty slot.
    pub fn with_value(initial: T) -> Self {
        let cache = Self::new();
        cache.post(initial);
        cache
    }

    /// Posts a new value. An unread pending value is discarded. Wakes one blocked reader.
    pub fn post(&self, value: T) {
        let mut state = self.state.lock();
        let slots = std::mem::replace(&mut state.slots, Slots::Empty);
        state.slots = match slots {
            Slots::Empty => Slots::Pending {
                current: None,
                pending: value,
            },
            Slots::Current(current) => Slots::Pending {
                current: Some(current),
                pending: value,
            },
            Slots::Pending { current, .. } => {
                trace!("[CACHE] Unread pending value replaced");
                Slots::Pending {
                    current,
                    pending: value,
                }
            }
        };
        self.write_count.fetch_add(1, Ordering::AcqRel);
        if state.waiters > 0 {
            self.wake.notify_one();
        }
    }

    /// Consuming read: returns the most recent value and marks every post so far as read.
    pub fn get(&self) -> T {
        let mut state = self.state.lock();
        self.consume(&mut state)
    }

    /// Non-consuming read. Repeated peeks return the same value and never change freshness.
    pub fn peek(&self) -> T {
        let mut state = self.state.lock();
        Self::compact(&mut state.slots)
    }

    /// Consumes without returning the value.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        Self::compact(&mut state.slots);
        self.mark_read();
    }

    /// Blocks until a post made after this call, or until `timeout` elapses, then performs
    /// [`Self::get`]. On timeout the current, possibly unchanged, value is returned.
    /// `None` waits without bound.
    pub fn get_blocking(&self, timeout: Option<Duration>) -> T {
        let epoch = self.write_count.load(Ordering::Acquire);
        self.get_after(epoch, timeout)
    }

    /// Like [`Self::get_blocking`], but waits for `write_count` to move past `epoch`.
    ///
    /// Lets a caller sample the epoch, make the cache stale to request new work, and then
    /// wait without missing a post that lands in between.
    pub fn get_after(&self, epoch: u64, timeout: Option<Duration>) -> T {
        let mut state = self.state.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        state.waiters += 1;
        while self.write_count.load(Ordering::Acquire) <= epoch {
            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.wake.wait(&mut state),
            }
        }
        state.waiters -= 1;
        self.consume(&mut state)
    }

    /// True when something was posted that no `get` has consumed yet.
    pub fn is_fresh(&self) -> bool {
        self.write_count.load(Ordering::Relaxed) > self.read_count.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Acquire)
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Acquire)
    }

    fn consume(&self, state: &mut CacheState<T>) -> T {
        let value = Self::compact(&mut state.slots);
        self.mark_read();
        value
    }

    fn mark_read(&self) {
        let written = self.write_count.load(Ordering::Acquire);
        self.read_count.store(written, Ordering::Release);
    }

    /// Promotes a pending value to current and returns a copy of current.
    fn compact(slots: &mut Slots<T>) -> T {
        if matches!(*slots, Slots::Pending { .. }) {
            if let Slots::Pending { pending, .. } = std::mem::replace(slots, Slots::Empty) {
                *slots = Slots::Current(pending);
            }
        }
        match slots {
            Slots::Current(value) => value.clone(),
            _ => T::default(),
        }
    }
}

impl<T: Clone + Default> Default for FreshnessCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
