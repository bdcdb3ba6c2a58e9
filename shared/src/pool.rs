use parking_lot::Mutex;

/// Bounded free list of fixed-size receive buffers
///
/// Buffers are zeroed when returned. Requests larger than the pooled size
/// get a fresh allocation, and such buffers are never taken back.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            buffer_size,
            capacity,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn rent(&self) -> Vec<u8> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    /// Rents a buffer of at least `len` bytes
    pub fn rent_at_least(&self, len: usize) -> Vec<u8> {
        if len > self.buffer_size {
            vec![0u8; len]
        } else {
            self.rent()
        }
    }

    pub fn give_back(&self, mut buffer: Vec<u8>) {
        if buffer.len() != self.buffer_size {
            return;
        }
        buffer.fill(0);

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buffer);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn clear(&self) {
        self.free.lock().clear();
    }
}
