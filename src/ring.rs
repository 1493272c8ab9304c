/*! Fixed-capacity ring of packet buffers.

The ingress thread owns the write side, the processing thread the read
side. Slot indices travel between them through the [`crate::fifo`] queue;
the queue's acquire/release pair is what makes a committed slot's bytes
visible to the reader. There is no explicit free step: a slot stays valid
until the writer laps it, which the FIFO capacity (smaller than the ring)
prevents while the index is still in flight.
*/
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::MAX_UDP_PAYLOAD;

struct Slot {
    len: AtomicUsize,
    data: UnsafeCell<[u8; MAX_UDP_PAYLOAD]>,
}

struct Shared {
    slots: Box<[Slot]>,
}

// SAFETY: slot bytes are written only through RingWriter (unique, not Clone)
// and read only through RingReader (unique, not Clone) for indices the
// writer has committed and handed over via the SPSC fifo, whose
// release/acquire pair orders the accesses. The lap case is excluded by
// sizing the ring larger than the fifo.
unsafe impl Send for Shared {}
// SAFETY: see above; `len` is atomic, `data` accesses never overlap.
unsafe impl Sync for Shared {}

/// Create a ring with `entries` slots, returning the two endpoints.
#[must_use]
pub fn new(entries: usize) -> (RingWriter, RingReader) {
    assert!(entries > 0);
    let slots = (0..entries)
        .map(|_| Slot {
            len: AtomicUsize::new(0),
            data: UnsafeCell::new([0u8; MAX_UDP_PAYLOAD]),
        })
        .collect();
    let shared = Arc::new(Shared { slots });
    (
        RingWriter {
            shared: shared.clone(),
            index: 0,
        },
        RingReader { shared },
    )
}

/// Write side of the packet ring. Held by the ingress thread.
pub struct RingWriter {
    shared: Arc<Shared>,
    index: usize,
}

impl RingWriter {
    /// Index of the slot currently reserved for writing.
    #[must_use]
    pub fn data_index(&self) -> u32 {
        self.index as u32
    }

    /// Total number of slots.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.shared.slots.len()
    }

    /// Slot capacity in bytes.
    #[must_use]
    pub fn max_buf_size(&self) -> usize {
        MAX_UDP_PAYLOAD
    }

    /// The current slot's buffer, for the receiver to fill.
    ///
    /// Also clears the slot's committed length, so a reader that gets this
    /// index handed over twice (a protocol bug) sees an empty packet rather
    /// than a stale one.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        let slot = &self.shared.slots[self.index];
        slot.len.store(0, Ordering::Release);
        // SAFETY: unique writer; the reader only touches slots whose index
        // it received through the fifo, which cannot include the slot
        // currently reserved for writing.
        unsafe { &mut *slot.data.get() }
    }

    /// Record that `len` bytes of the current slot are valid and return the
    /// slot index for publication.
    pub fn commit(&mut self, len: usize) -> u32 {
        debug_assert!(len <= MAX_UDP_PAYLOAD);
        self.shared.slots[self.index]
            .len
            .store(len, Ordering::Release);
        self.index as u32
    }

    /// Move on to the next slot. Call only after the index was accepted by
    /// the fifo; on push failure the slot is simply reused.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.shared.slots.len();
    }
}

/// Read side of the packet ring. Held by the processing thread.
pub struct RingReader {
    shared: Arc<Shared>,
}

impl RingReader {
    /// Committed payload of slot `index`.
    ///
    /// Valid until the writer laps this slot.
    #[must_use]
    pub fn data(&self, index: u32) -> &[u8] {
        let slot = &self.shared.slots[index as usize];
        let len = slot.len.load(Ordering::Acquire);
        // SAFETY: the writer committed `len` bytes before publishing the
        // index and will not rewrite this slot before lapping, which the
        // fifo capacity excludes while the index is in flight.
        unsafe { &(&*slot.data.get())[..len] }
    }

    /// Committed length of slot `index`.
    #[must_use]
    pub fn data_length(&self, index: u32) -> usize {
        self.shared.slots[index as usize].len.load(Ordering::Acquire)
    }
}
