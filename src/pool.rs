//! Recycling pool for read buffers.
//!
//! Every buffer has capacity equal to the queue's `max_msg_size`; the read
//! path truncates to the actual record length before handing a buffer to the
//! consumer, and `put` re-extends it to full length. The pool is a hint, not
//! a correctness boundary: a buffer that never comes back is simply
//! reallocated on the next `get`.

use std::sync::Mutex;

/// Free-list of `max_msg_size`-capacity byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool producing buffers of exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take a buffer (length == pool capacity), allocating on demand.
    pub fn get(&self) -> Vec<u8> {
        if let Ok(mut free) = self.free.lock() {
            if let Some(buf) = free.pop() {
                return buf;
            }
        }
        vec![0u8; self.capacity]
    }

    /// Return a buffer. Silently dropped unless its capacity matches the pool's.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() != self.capacity {
            return;
        }
        buf.resize(self.capacity, 0);
        if let Ok(mut free) = self.free.lock() {
            free.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_full_length_buffers() {
        let pool = BufferPool::new(8);
        let buf = pool.get();
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn put_recycles_and_reextends() {
        let pool = BufferPool::new(8);
        let mut buf = pool.get();
        buf.truncate(3);
        pool.put(buf);

        let again = pool.get();
        assert_eq!(again.len(), 8);
    }

    #[test]
    fn put_rejects_foreign_capacity() {
        let pool = BufferPool::new(8);
        pool.put(Vec::with_capacity(16));
        // The rejected buffer must not resurface.
        assert_eq!(pool.get().capacity(), 8);
    }
}
