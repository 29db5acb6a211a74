//! Tx-echo slot table (§3): a fixed array of 256 slots holding a saved copy
//! of a transmitted frame plus its one-byte marker, indexed by the marker
//! itself. The in-controller + queued Tx window is far smaller than 256
//! slots, so an unacknowledged slot cannot alias with a newly assigned
//! marker.

use canstack_protocol::Frame;

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoSlot {
    pub frame: Frame,
    pub marker: u8,
    pub occupied: bool,
}

pub struct EchoSlots {
    slots: [EchoSlot; 256],
    next_marker: u8,
}

impl EchoSlots {
    pub fn new() -> Self {
        Self {
            slots: [EchoSlot::default(); 256],
            next_marker: 0,
        }
    }

    /// Assigns the next marker, saves `frame` under it, and returns the
    /// marker to embed in the outgoing `TxFrame` message.
    pub fn save(&mut self, frame: Frame) -> u8 {
        let marker = self.next_marker;
        self.slots[marker as usize] = EchoSlot { frame, marker, occupied: true };
        self.next_marker = self.next_marker.wrapping_add(1);
        marker
    }

    /// Looks up and clears the slot for `marker`, if one is occupied.
    pub fn take(&mut self, marker: u8) -> Option<Frame> {
        let slot = &mut self.slots[marker as usize];
        if slot.occupied && slot.marker == marker {
            slot.occupied = false;
            Some(slot.frame)
        } else {
            None
        }
    }
}

impl Default for EchoSlots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canstack_protocol::frame::FrameFlag;
    use embedded_can::{Id, StandardId};

    #[test]
    fn markers_increment_and_wrap() {
        let mut slots = EchoSlots::new();
        let frame = Frame::new_data(Id::Standard(StandardId::new(1).unwrap()), FrameFlag::empty(), &[1]).unwrap();
        let first = slots.save(frame);
        assert_eq!(first, 0);
        let second = slots.save(frame);
        assert_eq!(second, 1);
    }

    #[test]
    fn take_clears_the_slot() {
        let mut slots = EchoSlots::new();
        let frame = Frame::new_data(Id::Standard(StandardId::new(1).unwrap()), FrameFlag::empty(), &[9]).unwrap();
        let marker = slots.save(frame);
        assert!(slots.take(marker).is_some());
        assert!(slots.take(marker).is_none());
    }
}
