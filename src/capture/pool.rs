//! Fixed set of frame buffers shared between the sensor and consumers

use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender};

/// Zero is never issued, so buffers built outside a pool match no pool
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Buffers circulate through a bounded channel: taking one blocks until a
/// consumer has given one back.
pub struct FramePool {
    id: u64,
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (free_tx, free_rx) = flume::bounded(capacity);
        for _ in 0..capacity {
            // Capacity equals the buffer count, so this never blocks
            let _ = free_tx.send(Vec::with_capacity(buffer_size));
        }

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            free_tx,
            free_rx,
            capacity,
        }
    }

    /// Block until a buffer is free and take it
    pub fn take(&self) -> Vec<u8> {
        match self.free_rx.recv() {
            Ok(buf) => buf,
            // Both channel ends live in `self`, so the channel never disconnects
            Err(_) => unreachable!("frame pool channel closed"),
        }
    }

    /// Hand a buffer back. Contents are cleared, capacity is kept.
    ///
    /// Never blocks: if every slot is already filled the buffer is dropped
    /// and `false` returned.
    pub fn put(&self, mut buf: Vec<u8>) -> bool {
        buf.clear();
        self.free_tx.try_send(buf).is_ok()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Buffers currently owned outside the pool
    pub fn outstanding(&self) -> usize {
        self.capacity - self.free_rx.len()
    }
}
