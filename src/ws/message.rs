//! Pooled inbound frame
//!
//! A [`Message`] owns one buffer taken from a [`BufferPool`] and gives it
//! back exactly once: on [`Message::release`] or when dropped.

use crate::infrastructure::pool::BufferPool;
use std::sync::Arc;

/// One text frame payload backed by a pooled buffer
pub struct Message {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Message {
    /// Copy `payload` into a buffer acquired from `pool`
    pub fn from_payload(payload: &[u8], pool: Arc<BufferPool>) -> Self {
        let mut buf = pool.acquire();
        buf.extend_from_slice(payload);
        Self {
            buf: Some(buf),
            pool,
        }
    }

    /// Frame bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }

    /// Mutable frame bytes, for in-place parsers such as simd-json
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Return the buffer to its pool now
    ///
    /// Consumes the message, so the bytes cannot be touched afterwards.
    #[inline]
    pub fn release(mut self) {
        self.give_back();
    }

    #[inline]
    fn give_back(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len())
            .field("data", &String::from_utf8_lossy(self.data()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_returns_buffer_once() {
        let pool = Arc::new(BufferPool::new(2, 32));
        let msg = Message::from_payload(b"{\"topic\":\"x\"}", Arc::clone(&pool));
        assert_eq!(pool.idle(), 1);
        assert_eq!(msg.data(), b"{\"topic\":\"x\"}");

        msg.release();
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let pool = Arc::new(BufferPool::new(1, 32));
        {
            let _msg = Message::from_payload(b"abc", Arc::clone(&pool));
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn test_data_mut_is_in_place() {
        let pool = Arc::new(BufferPool::new(1, 8));
        let mut msg = Message::from_payload(b"ab", pool);
        msg.data_mut()[0] = b'x';
        assert_eq!(msg.data(), b"xb");
        assert_eq!(msg.len(), 2);
    }
}
