//! Lock-free command ingestion: sharded single-producer/single-consumer
//! rings with a doorbell for waking a parked consumer.
//!
//! Each producing thread binds to one shard on first use (round-robin) and
//! only ever pushes to that shard, so every ring sees exactly one producer.
//! A single consumer thread drains all shards. Pushes are wait-free on
//! success and fail with [`QueueFull`] when the bound shard is full; they
//! never block, allocate, or take a lock.

use std::cell::{RefCell, UnsafeCell};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Returned to a producer whose shard has no free slot. The caller decides
/// whether to retry, shed, or surface the overflow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("command queue shard is full")]
pub struct QueueFull;

/// Atomic cursor on its own cache line, so the producer and consumer
/// cursors never false-share.
#[repr(align(64))]
struct Cursor(AtomicUsize);

impl Cursor {
    const fn new() -> Self {
        Cursor(AtomicUsize::new(0))
    }
}

/// Bounded single-producer/single-consumer ring.
///
/// Cursors increase monotonically and are masked into the buffer, which
/// keeps full/empty distinguishable without a spare slot. `push` publishes
/// with a release store that the consumer's acquire load pairs with, so a
/// popped command is fully visible to the matching thread.
///
/// The ring itself cannot enforce the single-producer contract; the
/// containing [`ShardedQueue`] does, via thread-local shard binding.
pub struct SpscRing<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: Cursor,
    tail: Cursor,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buf,
            mask: capacity - 1,
            head: Cursor::new(),
            tail: Cursor::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Producer side. Wait-free; fails when the ring is full.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), QueueFull> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == self.capacity() {
            return Err(QueueFull);
        }
        unsafe {
            (*self.buf[tail & self.mask].get()).write(value);
        }
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let value = unsafe { (*self.buf[head & self.mask].get()).assume_init_read() };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.0.load(Ordering::Acquire) == self.tail.0.load(Ordering::Acquire)
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// queue id -> shard index bound to this thread.
    static BOUND_SHARDS: RefCell<FxHashMap<usize, usize>> = RefCell::new(FxHashMap::default());
}

/// A fixed set of SPSC shards behind a multi-producer facade.
///
/// Shard count must be a power of two and at least the number of
/// concurrently producing threads: binding is round-robin, and a producer
/// fleet larger than the shard set would alias two threads onto one ring,
/// breaking the single-producer contract.
pub struct ShardedQueue<T> {
    shards: Box<[SpscRing<T>]>,
    next_producer: AtomicUsize,
    id: usize,
}

impl<T: Send> ShardedQueue<T> {
    pub fn new(shards: usize, shard_capacity: usize) -> Self {
        assert!(shards.is_power_of_two(), "shard count must be a power of two");
        let rings = (0..shards)
            .map(|_| SpscRing::new(shard_capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards: rings,
            next_producer: AtomicUsize::new(0),
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index this thread is bound to, assigning one round-robin on
    /// first use.
    fn bound_shard(&self) -> usize {
        BOUND_SHARDS.with(|map| {
            *map.borrow_mut().entry(self.id).or_insert_with(|| {
                self.next_producer.fetch_add(1, Ordering::Relaxed) & (self.shards.len() - 1)
            })
        })
    }

    /// Producer-side push onto this thread's shard.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), QueueFull> {
        self.shards[self.bound_shard()].push(value)
    }

    /// Consumer-side sweep: pop everything currently visible in every
    /// shard, in shard order. Returns the number of items handed to `f`.
    ///
    /// Must only be called from the single consumer thread.
    pub fn drain(&self, mut f: impl FnMut(T)) -> usize {
        let mut n = 0;
        for shard in self.shards.iter() {
            while let Some(item) = shard.pop() {
                f(item);
                n += 1;
            }
        }
        n
    }

    /// True when every shard was observed empty. Consumer-side.
    pub fn all_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }
}

/// Wakes the consumer when it parked on empty queues.
///
/// Producers ring after every successful push; the ring is a sequentially
/// consistent flag store plus a conditional notify that only touches the
/// mutex while the consumer is actually parked, so the producer hot path
/// stays lock-free. The flag store and the consumer's parked store are both
/// SeqCst: whichever lands second observes the other, which rules out the
/// lost-wakeup interleaving.
pub struct Doorbell {
    data_available: AtomicBool,
    parked: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Doorbell {
    pub fn new() -> Self {
        Self {
            data_available: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Producer side: signal that data is available.
    #[inline]
    pub fn ring(&self) {
        self.data_available.store(true, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) {
            let _guard = self.lock.lock().unwrap();
            self.cond.notify_one();
        }
    }

    /// Consumer side: clear the flag before a drain sweep. Returns whether
    /// it was set.
    #[inline]
    pub fn take(&self) -> bool {
        self.data_available.swap(false, Ordering::SeqCst)
    }

    /// Consumer side: park until the flag is raised or `keep_waiting`
    /// returns false. The flag is left set for the caller's next sweep.
    pub fn park(&self, keep_waiting: impl Fn() -> bool) {
        let mut guard = self.lock.lock().unwrap();
        self.parked.store(true, Ordering::SeqCst);
        while !self.data_available.load(Ordering::SeqCst) && keep_waiting() {
            guard = self.cond.wait(guard).unwrap();
        }
        self.parked.store(false, Ordering::SeqCst);
    }
}

impl Default for Doorbell {
    fn default() -> Self {
        Self::new()
    }
}
