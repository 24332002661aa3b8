//! Per-slot buffer pool.
//!
//! One fixed-size buffer per connection slot, allocated once at startup.
//! The kernel reads and writes these buffers directly while an operation
//! is in flight, so their storage must never move or be reallocated.

/// Fixed-size buffers indexed by slot.
pub struct BufferPool {
    /// Actual buffer storage. Each inner allocation is fixed for the pool's lifetime.
    buffers: Vec<Box<[u8]>>,
    /// Size of each buffer.
    buffer_size: usize,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `count` - Number of buffers to pre-allocate
    /// * `size` - Size of each buffer in bytes
    pub fn new(count: usize, size: usize) -> Self {
        let buffers = (0..count)
            .map(|_| vec![0u8; size].into_boxed_slice())
            .collect();

        Self {
            buffers,
            buffer_size: size,
        }
    }

    /// Get an immutable reference to a buffer.
    ///
    /// # Panics
    /// Panics if `idx` is out of bounds.
    #[cfg(test)]
    pub fn get(&self, idx: usize) -> &[u8] {
        &self.buffers[idx]
    }

    /// Get a mutable pointer to a buffer for submission to the kernel.
    ///
    /// The pointer stays valid for the lifetime of the pool.
    pub fn as_mut_ptr(&mut self, idx: usize) -> *mut u8 {
        self.buffers[idx].as_mut_ptr()
    }

    /// Zero a buffer so the next occupant of the slot starts clean.
    pub fn clear(&mut self, idx: usize) {
        self.buffers[idx].fill(0);
    }

    /// Get the size of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Get the total number of buffers.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }
}
