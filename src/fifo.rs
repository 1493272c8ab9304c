/*! Lock-free single-producer/single-consumer queue of slot indices.

Decouples the ingress thread from the processing thread. A full queue means
the consumer is lagging; the producer then drops the packet and reuses its
ring slot, which is the pipeline's only backpressure mechanism.
*/
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    // One extra element distinguishes full from empty.
    buf: Box<[UnsafeCell<u32>]>,
    head: AtomicUsize, // next pop position, owned by the consumer
    tail: AtomicUsize, // next push position, owned by the producer
}

// SAFETY: classic Lamport queue. Each cell is written by the producer only
// while it is outside the [head, tail) window and read by the consumer only
// after the tail release-store made the write visible.
unsafe impl Send for Shared {}
// SAFETY: see above.
unsafe impl Sync for Shared {}

/// Create a queue holding up to `capacity` indices.
#[must_use]
pub fn new(capacity: usize) -> (FifoPusher, FifoPopper) {
    assert!(capacity > 0);
    let buf = (0..capacity + 1).map(|_| UnsafeCell::new(0)).collect();
    let shared = Arc::new(Shared {
        buf,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        FifoPusher {
            shared: shared.clone(),
        },
        FifoPopper { shared },
    )
}

/// Producer endpoint.
pub struct FifoPusher {
    shared: Arc<Shared>,
}

impl FifoPusher {
    /// Push a slot index. Returns false when the queue is full.
    pub fn push(&mut self, index: u32) -> bool {
        let s = &*self.shared;
        let tail = s.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % s.buf.len();
        if next == s.head.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: `tail` is outside the consumer's window until the
        // release-store below.
        unsafe { *s.buf[tail].get() = index };
        s.tail.store(next, Ordering::Release);
        true
    }
}

/// Consumer endpoint.
pub struct FifoPopper {
    shared: Arc<Shared>,
}

impl FifoPopper {
    /// Pop the oldest slot index, if any.
    pub fn pop(&mut self) -> Option<u32> {
        let s = &*self.shared;
        let head = s.head.load(Ordering::Relaxed);
        if head == s.tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the acquire-load of `tail` ordered the producer's write
        // of this cell before the read.
        let index = unsafe { *s.buf[head].get() };
        s.head.store((head + 1) % s.buf.len(), Ordering::Release);
        Some(index)
    }

    /// True when nothing is queued. Racy by nature; only useful for tests
    /// and shutdown diagnostics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.head.load(Ordering::Relaxed) == self.shared.tail.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop() {
        let (mut push, mut pop) = new(4);
        assert!(pop.is_empty());
        assert_eq!(pop.pop(), None);
        assert!(push.push(17));
        assert!(!pop.is_empty());
        assert_eq!(pop.pop(), Some(17));
        assert_eq!(pop.pop(), None);
    }

    #[test]
    fn full_at_capacity() {
        let n = 64;
        let (mut push, mut pop) = new(n);
        for i in 0..n as u32 {
            assert!(push.push(i), "push {i} should fit");
        }
        // N+1st push fails.
        assert!(!push.push(999));
        for i in 0..n as u32 {
            assert_eq!(pop.pop(), Some(i));
        }
        assert_eq!(pop.pop(), None);
        // Space is available again.
        assert!(push.push(999));
        assert_eq!(pop.pop(), Some(999));
    }

    #[test]
    fn ordered_across_threads() {
        let (mut push, mut pop) = new(16);
        let total = 100_000u32;
        let producer = std::thread::spawn(move || {
            let mut i = 0;
            while i < total {
                if push.push(i) {
                    i += 1;
                }
            }
        });
        let mut expect = 0;
        while expect < total {
            if let Some(v) = pop.pop() {
                assert_eq!(v, expect);
                expect += 1;
            }
        }
        producer.join().unwrap();
    }
}
