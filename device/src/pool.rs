//! Zero-allocation pool/FIFO layer (§4.2, §9).
//!
//! A fixed-capacity arena of slots carrying next/prev indices backs both a
//! pool (the free list) and the FIFOs frames travel through. Every slot is
//! on exactly one list at a time. Callers are responsible for wrapping list
//! mutations in whatever the target's interrupt-disable critical section
//! looks like (this crate has no MCU-specific intrinsics; see
//! [`crate::platform::Platform`]); the operations here are O(1) and touch
//! only a handful of index fields, matching the bounded critical section
//! §5 requires.

pub const NONE: u16 = u16::MAX;

#[derive(Clone, Copy, Default)]
struct Link {
    next: u16,
    prev: u16,
}

impl Link {
    const DETACHED: Self = Link { next: NONE, prev: NONE };
}

/// An intrusive, doubly-linked list of arena slot indices.
#[derive(Clone, Copy)]
pub struct List {
    head: u16,
    tail: u16,
}

impl List {
    pub const fn new() -> Self {
        Self { head: NONE, tail: NONE }
    }

    pub fn is_empty(&self) -> bool {
        self.head == NONE
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity arena of `N` slots of `T`, doubling as storage for every
/// pool and FIFO built over it.
pub struct Arena<T, const N: usize> {
    items: [T; N],
    links: [Link; N],
}

impl<T: Default + Copy, const N: usize> Arena<T, N> {
    pub const fn new() -> Self
    where
        T: Copy,
    {
        Self {
            items: [const_default::<T>(); N],
            links: [Link::DETACHED; N],
        }
    }
}

// Work around `T::default()` not being usable in a `const fn` context for a
// generic `T`; callers only use `Arena::new` with `Default` types whose
// all-zero bit pattern is their default, which holds for every type used in
// this module (`CanTxItem`, `HostTxItem`).
const fn const_default<T: Copy>() -> T {
    // SAFETY: every concrete `T` this module instantiates `Arena` with
    // (`CanTxItem`, `HostTxItem`) is plain-old-data whose all-zero bit
    // pattern is a valid value and matches its `Default` impl.
    unsafe { core::mem::zeroed() }
}

impl<T: Default + Copy, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + Copy, const N: usize> Arena<T, N> {
    /// Populates `list` with every slot index, in order. Call once at
    /// `init` to seed a pool's free list.
    pub fn fill(&mut self, list: &mut List) {
        *list = List::new();
        for i in 0..N {
            self.put_tail(list, i as u16);
        }
    }

    pub fn get(&self, idx: u16) -> &T {
        &self.items[idx as usize]
    }

    pub fn get_mut(&mut self, idx: u16) -> &mut T {
        &mut self.items[idx as usize]
    }

    pub fn len(&self, list: &List) -> usize {
        let mut count = 0;
        let mut cur = list.head;
        while cur != NONE {
            count += 1;
            cur = self.links[cur as usize].next;
        }
        count
    }

    /// Removes and returns the slot at the head of `list`.
    pub fn take_head(&mut self, list: &mut List) -> Option<u16> {
        let idx = list.head;
        if idx == NONE {
            return None;
        }
        let next = self.links[idx as usize].next;
        if next == NONE {
            list.tail = NONE;
        } else {
            self.links[next as usize].prev = NONE;
        }
        list.head = next;
        self.links[idx as usize] = Link::DETACHED;
        Some(idx)
    }

    /// Appends `idx` to the tail of `list`. `idx` must not already be on a
    /// list.
    pub fn put_tail(&mut self, list: &mut List, idx: u16) {
        self.links[idx as usize] = Link { next: NONE, prev: list.tail };
        if list.tail == NONE {
            list.head = idx;
        } else {
            self.links[list.tail as usize].next = idx;
        }
        list.tail = idx;
    }
}

/// A slot queued on `to_can`, carrying the decoded frame and its echo token.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanTxItem {
    pub frame: canstack_protocol::Frame,
    pub token: canstack_protocol::codec::EchoToken,
}

/// A slot queued on `to_host`, carrying a pre-encoded outgoing USB message.
#[derive(Debug, Clone, Copy)]
pub struct HostTxItem {
    pub bytes: [u8; 80],
    pub len: u8,
}

impl Default for HostTxItem {
    fn default() -> Self {
        Self { bytes: [0u8; 80], len: 0 }
    }
}

impl HostTxItem {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

pub const CAN_QUEUE_SIZE: usize = 64;
pub const HOST_QUEUE_SIZE: usize = 70;

/// Pool/FIFO pair for frames bound to the CAN controller.
pub struct CanPool {
    pub arena: Arena<CanTxItem, CAN_QUEUE_SIZE>,
    pub free: List,
    pub to_can: List,
}

impl CanPool {
    pub const fn new() -> Self {
        Self {
            arena: Arena::new(),
            free: List::new(),
            to_can: List::new(),
        }
    }

    pub fn init(&mut self) {
        self.arena.fill(&mut self.free);
        self.to_can = List::new();
    }

    /// Takes a slot from the pool, fills it, and enqueues it on `to_can`.
    /// Returns `Err(())` (an overflow) if the pool is empty.
    pub fn enqueue(&mut self, item: CanTxItem) -> Result<(), ()> {
        let idx = self.arena.take_head(&mut self.free).ok_or(())?;
        *self.arena.get_mut(idx) = item;
        self.arena.put_tail(&mut self.to_can, idx);
        Ok(())
    }

    /// Dequeues the next item to send to the controller, if any.
    pub fn dequeue(&mut self) -> Option<CanTxItem> {
        let idx = self.arena.take_head(&mut self.to_can)?;
        let item = *self.arena.get(idx);
        self.arena.put_tail(&mut self.free, idx);
        Some(item)
    }

    /// Clears the Tx queue (used on `Close`), returning every queued slot
    /// to the pool without sending it.
    pub fn clear(&mut self) {
        while self.dequeue().is_some() {}
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }
}

impl Default for CanPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool/FIFO pair for frames bound to the host over the bulk IN endpoint.
///
/// `in_flight` models the one slot currently owned by an outstanding bulk
/// IN transfer: `drain_tick` hands it to the USB send path via
/// [`begin_send`](Self::begin_send) and only [`complete_send`](Self::complete_send)
/// (called from `endpoint_in_complete`) returns it to the pool, so
/// `|free| + |to_host| + |in_flight: 0 or 1| == HOST_QUEUE_SIZE` holds at
/// every quiescent point (§8).
pub struct HostPool {
    pub arena: Arena<HostTxItem, HOST_QUEUE_SIZE>,
    pub free: List,
    pub to_host: List,
    in_flight: Option<u16>,
}

impl HostPool {
    pub const fn new() -> Self {
        Self {
            arena: Arena::new(),
            free: List::new(),
            to_host: List::new(),
            in_flight: None,
        }
    }

    pub fn init(&mut self) {
        self.arena.fill(&mut self.free);
        self.to_host = List::new();
        self.in_flight = None;
    }

    pub fn enqueue(&mut self, item: HostTxItem) -> Result<(), ()> {
        let idx = self.arena.take_head(&mut self.free).ok_or(())?;
        *self.arena.get_mut(idx) = item;
        self.arena.put_tail(&mut self.to_host, idx);
        Ok(())
    }

    /// True while a bulk IN transfer is outstanding.
    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Hands the next queued item to the USB send path. The slot stays
    /// owned by the transfer (not the pool) until [`complete_send`](Self::complete_send).
    pub fn begin_send(&mut self) -> Option<HostTxItem> {
        if self.in_flight.is_some() {
            return None;
        }
        let idx = self.arena.take_head(&mut self.to_host)?;
        self.in_flight = Some(idx);
        Some(*self.arena.get(idx))
    }

    /// Returns the in-flight slot to the pool once its transfer completes.
    pub fn complete_send(&mut self) {
        if let Some(idx) = self.in_flight.take() {
            self.arena.put_tail(&mut self.free, idx);
        }
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }
}

impl Default for HostPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_preserves_enqueue_order() {
        let mut pool = CanPool::new();
        pool.init();

        for marker in 0..5u32 {
            pool.enqueue(CanTxItem {
                frame: Default::default(),
                token: canstack_protocol::codec::EchoToken(marker),
            })
            .unwrap();
        }

        for marker in 0..5u32 {
            let item = pool.dequeue().unwrap();
            assert_eq!(item.token.0, marker);
        }
        assert!(pool.dequeue().is_none());
    }

    #[test]
    fn pool_conservation_holds_across_enqueue_dequeue_cycles() {
        let mut pool = CanPool::new();
        pool.init();

        for _ in 0..CAN_QUEUE_SIZE {
            pool.enqueue(CanTxItem::default()).unwrap();
        }
        assert!(pool.is_full());
        assert_eq!(
            pool.enqueue(CanTxItem::default()),
            Err(()),
            "pool must report overflow when the free list is exhausted"
        );

        let mut in_flight = 0;
        while pool.dequeue().is_some() {
            in_flight += 1;
        }
        assert_eq!(in_flight, CAN_QUEUE_SIZE);
        assert_eq!(pool.arena.len(&pool.free), CAN_QUEUE_SIZE);
    }

    #[test]
    fn host_pool_conserves_slots_through_begin_and_complete_send() {
        let mut pool = HostPool::new();
        pool.init();
        pool.enqueue(HostTxItem::default()).unwrap();
        pool.enqueue(HostTxItem::default()).unwrap();

        assert!(pool.begin_send().is_some());
        // a second transfer cannot start while one is in flight.
        assert!(pool.begin_send().is_none());
        assert_eq!(pool.arena.len(&pool.to_host), 1);

        pool.complete_send();
        assert!(!pool.is_sending());
        assert_eq!(
            pool.arena.len(&pool.free) + pool.arena.len(&pool.to_host),
            HOST_QUEUE_SIZE
        );
    }

    #[test]
    fn clear_returns_everything_to_the_pool() {
        let mut pool = CanPool::new();
        pool.init();
        pool.enqueue(CanTxItem::default()).unwrap();
        pool.enqueue(CanTxItem::default()).unwrap();
        pool.clear();
        assert_eq!(pool.arena.len(&pool.free), CAN_QUEUE_SIZE);
        assert!(pool.dequeue().is_none());
    }
}
