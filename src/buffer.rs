use std::sync::atomic::{AtomicUsize, Ordering};

/// Global write buffer shared by every partition of a namespace: a
/// size-tracked pool of bytes. Allocation is all-or-nothing; a grant below
/// the request signals host-side backpressure and the request is rejected
/// at admission.
pub struct WriteBuffer {
    size: usize,
    remaining: AtomicUsize,
}

impl WriteBuffer {
    pub fn new(size: usize) -> Self {
        WriteBuffer {
            size,
            remaining: AtomicUsize::new(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Tries to reserve `bytes`; returns the granted amount (0 when the
    /// pool cannot cover the whole request).
    pub fn allocate(&self, bytes: usize) -> usize {
        let mut cur = self.remaining.load(Ordering::Acquire);
        loop {
            if cur < bytes {
                return 0;
            }
            match self.remaining.compare_exchange_weak(
                cur,
                cur - bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return bytes,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Returns `bytes` to the pool.
    pub fn release(&self, bytes: usize) {
        let prev = self.remaining.fetch_add(bytes, Ordering::AcqRel);
        assert!(prev + bytes <= self.size, "write buffer over-released");
    }
}
