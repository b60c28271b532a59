use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use ringbuf::{Consumer, Producer, RingBuffer};
use tracing::trace;

use crate::PcmChunk;


/// Bounded chunk buffer between a bridge's producer and the audio scheduler.
///
/// Pushing into a full queue evicts the oldest chunk; the producer never blocks.
pub struct ChunkQueue {
    ring: Mutex<(Producer<PcmChunk>, Consumer<PcmChunk>)>,
    capacity: usize,
    evicted: AtomicU64,
}


impl ChunkQueue {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity).split();
        ChunkQueue {
            ring: Mutex::new((producer, consumer)),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    pub fn push(&self, chunk: PcmChunk) {
        let mut ring = self.ring.lock();
        let (producer, consumer) = &mut *ring;
        self.push_locked(producer, consumer, chunk);
    }

    /// Push a run of chunks under a single lock so no reader sees a half-inserted batch.
    pub fn extend<I: IntoIterator<Item = PcmChunk>>(&self, chunks: I) {
        let mut ring = self.ring.lock();
        let (producer, consumer) = &mut *ring;
        for chunk in chunks {
            self.push_locked(producer, consumer, chunk);
        }
    }

    fn push_locked(
        &self,
        producer: &mut Producer<PcmChunk>,
        consumer: &mut Consumer<PcmChunk>,
        chunk: PcmChunk,
    ) {
        if producer.is_full() {
            consumer.pop();
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(total, "chunk queue full, evicted oldest");
        }
        if producer.push(chunk).is_err() {
            trace!("chunk queue rejected push");
        }
    }

    pub fn pop(&self) -> Option<PcmChunk> {
        self.ring.lock().1.pop()
    }

    /// Drop everything queued, returning how many chunks were discarded.
    pub fn clear(&self) -> usize {
        let mut ring = self.ring.lock();
        let mut drained = 0;
        while ring.1.pop().is_some() {
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.ring.lock().1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks lost to overflow since construction.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
