//! Scoped memory pools
//!
//! Everything a session allocates for its own lifetime is parked in its pool
//! and released in one sweep when the session is destroyed. Handles returned
//! by the pool are reference counted, so a caller that kept one past the
//! sweep still holds valid memory; the pool just stops keeping it alive.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

type Cleanup = Box<dyn FnOnce() + Send>;

/// A scoped arena owned by exactly one session (or one call setup)
pub struct MemoryPool {
    id: u64,
    tag: String,
    objects: Vec<Arc<dyn Any + Send + Sync>>,
    strings: Vec<Arc<str>>,
    bytes: usize,
    cleanups: Vec<Cleanup>,
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("objects", &self.objects.len())
            .field("strings", &self.strings.len())
            .field("bytes", &self.bytes)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

impl MemoryPool {
    fn new(id: u64, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
            objects: Vec::new(),
            strings: Vec::new(),
            bytes: 0,
            cleanups: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Copy a string into the pool
    pub fn strdup(&mut self, value: &str) -> Arc<str> {
        let s: Arc<str> = Arc::from(value);
        self.bytes += value.len();
        self.strings.push(s.clone());
        s
    }

    /// Move a value into the pool
    pub fn alloc<T: Any + Send + Sync>(&mut self, value: T) -> Arc<T> {
        let item = Arc::new(value);
        self.bytes += std::mem::size_of::<T>();
        self.objects.push(item.clone());
        item
    }

    /// Run `f` when the pool is destroyed; cleanups run newest first
    pub fn register_cleanup(&mut self, f: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(f));
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes
    }

    pub fn object_count(&self) -> usize {
        self.objects.len() + self.strings.len()
    }

    /// Release everything, keeping vector capacity for reuse
    fn sweep(&mut self) {
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup();
        }
        self.objects.clear();
        self.strings.clear();
        self.bytes = 0;
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        self.sweep();
    }
}

/// Process-wide pool factory that recycles destroyed pools
pub struct PoolAllocator {
    free: Mutex<Vec<MemoryPool>>,
    max_free: AtomicUsize,
    live: AtomicUsize,
    next_id: AtomicU64,
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("live", &self.live_pools())
            .field("free", &self.free_pools())
            .finish()
    }
}

impl PoolAllocator {
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_free: AtomicUsize::new(max_free),
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hand out a pool, reusing a recycled one when available
    pub fn create(&self, tag: impl Into<String>) -> MemoryPool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::AcqRel);
        match self.free.lock().pop() {
            Some(mut pool) => {
                pool.id = id;
                pool.tag = tag.into();
                pool
            }
            None => MemoryPool::new(id, tag),
        }
    }

    /// Destroy a pool: run its cleanups, drop its contents and keep the shell
    /// for reuse if the free list has room
    pub fn destroy(&self, mut pool: MemoryPool) {
        tracing::trace!(pool = pool.id, tag = %pool.tag, bytes = pool.bytes, "Destroying pool");
        pool.sweep();
        self.live.fetch_sub(1, Ordering::AcqRel);
        let mut free = self.free.lock();
        if free.len() < self.max_free.load(Ordering::Relaxed) {
            free.push(pool);
        }
    }

    pub fn set_max_free(&self, max_free: usize) {
        self.max_free.store(max_free, Ordering::Relaxed);
        self.free.lock().truncate(max_free);
    }

    pub fn live_pools(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn free_pools(&self) -> usize {
        self.free.lock().len()
    }
}
