//! Bounded RX ring buffer (§3, §5, §8): the reader thread pushes, the
//! client-facing `receive` call pops with a timeout. Overflow is a sticky
//! flag rather than a dropped error, surfaced exactly once per episode the
//! way §8 requires.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::DriverError;

pub const CAPACITY: usize = 30;
pub const SLOT_LEN: usize = 128;

/// One `(bytes_read, error_code, wall_timestamp)` record written by the
/// reader thread. `error` is set instead of a payload when the `bulk_read`
/// behind this slot failed.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub bytes: [u8; SLOT_LEN],
    pub len: u8,
    pub error: Option<DriverError>,
    pub received_at: Instant,
}

impl Slot {
    pub fn data(bytes: [u8; SLOT_LEN], len: u8, received_at: Instant) -> Self {
        Self { bytes, len, error: None, received_at }
    }

    pub fn transport_error(error: DriverError, received_at: Instant) -> Self {
        Self { bytes: [0u8; SLOT_LEN], len: 0, error: Some(error), received_at }
    }
}

struct Inner {
    queue: VecDeque<Slot>,
    overflowed: bool,
}

/// A `Mutex`-guarded `VecDeque` with a `Condvar` for the blocking `pop`,
/// following §5's rule that the blocking wait never happens while the
/// reader thread could be holding the same lock to push.
pub struct Fifo {
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl Fifo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { queue: VecDeque::with_capacity(CAPACITY), overflowed: false }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes a slot, dropping the oldest one and latching the overflow
    /// flag if the buffer is already full.
    pub fn push(&self, slot: Slot) {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= CAPACITY {
            inner.queue.pop_front();
            inner.overflowed = true;
        }
        inner.queue.push_back(slot);
        self.not_empty.notify_one();
    }

    /// Waits up to `timeout` for a slot to become available.
    pub fn pop(&self, timeout: Duration) -> Option<Slot> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_empty() {
            let (guard, _) = self.not_empty.wait_timeout_while(inner, timeout, |i| i.queue.is_empty()).unwrap();
            inner = guard;
        }
        inner.queue.pop_front()
    }

    /// Returns whether an overflow happened since the last call, clearing
    /// the flag (surfaces once per episode, not once per dropped frame).
    pub fn take_overflow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        core::mem::take(&mut inner.overflowed)
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(tag: u8) -> Slot {
        let mut bytes = [0u8; SLOT_LEN];
        bytes[0] = tag;
        Slot::data(bytes, 1, Instant::now())
    }

    #[test]
    fn pop_returns_in_fifo_order() {
        let fifo = Fifo::new();
        fifo.push(slot(1));
        fifo.push(slot(2));
        assert_eq!(fifo.pop(Duration::from_millis(10)).unwrap().bytes[0], 1);
        assert_eq!(fifo.pop(Duration::from_millis(10)).unwrap().bytes[0], 2);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let fifo = Fifo::new();
        assert!(fifo.pop(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn transport_error_slot_round_trips_through_pop() {
        let fifo = Fifo::new();
        fifo.push(Slot::transport_error(DriverError::Timeout, Instant::now()));
        let popped = fifo.pop(Duration::from_millis(10)).unwrap();
        assert!(matches!(popped.error, Some(DriverError::Timeout)));
        assert_eq!(popped.len, 0);
    }

    #[test]
    fn overflow_is_sticky_until_taken() {
        let fifo = Fifo::new();
        for i in 0..(CAPACITY + 3) {
            fifo.push(slot(i as u8));
        }
        assert!(fifo.take_overflow());
        assert!(!fifo.take_overflow());
        assert_eq!(fifo.pop(Duration::from_millis(10)).unwrap().bytes[0], 3);
    }
}
