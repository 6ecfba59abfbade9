//! Object pooling for inbound frame buffers
//!
//! Pre-allocated buffers recycled between the read task and the session.
//! Uses crossbeam-queue for lock-free acquire/release.

use crossbeam_queue::ArrayQueue;

/// Generic object pool with a factory fallback
///
/// `acquire` never fails: an empty pool hands out a freshly built object.
/// `release` never blocks: a full pool drops the object.
///
/// # Example
/// ```
/// use market_streams::infrastructure::pool::ObjectPool;
///
/// let pool = ObjectPool::with_capacity(4, || vec![0u8; 16]);
/// let buf = pool.acquire();
/// assert!(pool.release(buf));
/// ```
pub struct ObjectPool<T: Send> {
    stack: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Send> ObjectPool<T> {
    /// Create a pool pre-populated with `capacity` objects
    ///
    /// A zero capacity is raised to one; the queue cannot be empty-sized.
    pub fn with_capacity<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let stack = ArrayQueue::new(capacity.max(1));

        for _ in 0..stack.capacity() {
            if stack.push(factory()).is_err() {
                break;
            }
        }

        Self {
            stack,
            factory: Box::new(factory),
        }
    }

    /// Take an object from the pool, building a new one when empty
    #[inline]
    pub fn acquire(&self) -> T {
        self.stack.pop().unwrap_or_else(|| (self.factory)())
    }

    /// Return an object to the pool
    ///
    /// Returns `false` when the pool was full and the object was dropped.
    #[inline]
    pub fn release(&self, obj: T) -> bool {
        self.stack.push(obj).is_ok()
    }

    /// Number of idle objects in the pool
    #[inline]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.stack.capacity()
    }
}

/// Pool of growable byte buffers for frame payloads
pub struct BufferPool {
    inner: ObjectPool<Vec<u8>>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// `pool_size` idle buffers, each pre-sized to `buffer_capacity` bytes
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        Self {
            inner: ObjectPool::with_capacity(pool_size, move || {
                Vec::with_capacity(buffer_capacity)
            }),
            buffer_capacity,
        }
    }

    /// Empty buffer, recycled or freshly allocated
    #[inline]
    pub fn acquire(&self) -> Vec<u8> {
        self.inner.acquire()
    }

    /// Clear `buf` and return it to the pool
    ///
    /// Buffers that grew far beyond the configured capacity are dropped so a
    /// single oversized frame does not pin memory forever.
    #[inline]
    pub fn release(&self, mut buf: Vec<u8>) -> bool {
        if buf.capacity() > self.buffer_capacity.saturating_mul(16).max(64 * 1024) {
            return false;
        }
        buf.clear();
        self.inner.release(buf)
    }

    #[inline]
    pub fn idle(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.inner.len())
            .field("pool_size", &self.inner.capacity())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = ObjectPool::with_capacity(8, || vec![0u8; 32]);
        assert_eq!(pool.len(), 8);
        assert_eq!(pool.capacity(), 8);
        assert!(!pool.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let pool = ObjectPool::with_capacity(0, || 1u8);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_acquire_from_empty_pool_allocates() {
        let pool = ObjectPool::with_capacity(2, || 7i32);
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(pool.is_empty());

        // Factory fallback, never blocks
        let c = pool.acquire();
        assert_eq!((a, b, c), (7, 7, 7));
    }

    #[test]
    fn test_release_to_full_pool_discards() {
        let pool = ObjectPool::with_capacity(2, || 0i32);
        assert!(!pool.release(999));
        assert_eq!(pool.len(), 2);

        let x = pool.acquire();
        assert!(pool.release(x));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_buffer_pool_clears_on_release() {
        let pool = BufferPool::new(2, 64);
        let mut buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);

        buf.extend_from_slice(b"{\"op\":\"pong\"}");
        // Pool already holds one idle buffer and has room for this one
        assert!(pool.release(buf));

        for _ in 0..2 {
            assert!(pool.acquire().is_empty());
        }
    }

    #[test]
    fn test_buffer_pool_drops_oversized() {
        let pool = BufferPool::new(1, 16);
        let _ = pool.acquire();
        let huge = Vec::with_capacity(1 << 20);
        assert!(!pool.release(huge));
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(BufferPool::new(32, 256));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..100u8 {
                        let mut buf = pool.acquire();
                        buf.push(i);
                        pool.release(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.idle() <= 32);
        assert!(pool.idle() > 0);
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ObjectPool<Vec<u8>>>();
        assert_send_sync::<BufferPool>();
    }
}

// Hot Path Checklist verified:
// ✓ Lock-free operations (crossbeam-queue ArrayQueue)
// ✓ acquire/release never block
// ✓ Bounded capacity (full pool drops, empty pool allocates)
// ✓ Thread-safe (Send + Sync)
