//! Host-side Tx-echo reconciliation (§4.6): a 256-slot table indexed by the
//! same one-byte marker the firmware's echo table uses, so a later
//! `TxEcho`/legacy fake-echo message can be matched back to the frame and
//! wall-clock time it was submitted at.

use canstack_protocol::Frame;

#[derive(Debug, Clone, Copy)]
struct Slot {
    frame: Frame,
    sent_at: u64,
}

pub struct EchoTable {
    slots: [Option<Slot>; 256],
    next_marker: u8,
}

impl EchoTable {
    pub fn new() -> Self {
        Self { slots: [None; 256], next_marker: 0 }
    }

    /// Saves `frame` under the next marker, then advances the marker
    /// counter, matching the spec's "incremented last" ordering so a
    /// concurrent reader never observes a marker before its slot is filled.
    pub fn save(&mut self, frame: Frame, sent_at_us: u64) -> u8 {
        let marker = self.next_marker;
        self.slots[marker as usize] = Some(Slot { frame, sent_at: sent_at_us });
        self.next_marker = self.next_marker.wrapping_add(1);
        marker
    }

    /// Looks up and clears the slot for `marker`, if still occupied.
    pub fn take(&mut self, marker: u8) -> Option<(Frame, u64)> {
        self.slots[marker as usize].take().map(|s| (s.frame, s.sent_at))
    }
}

impl Default for EchoTable {
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
    fn marker_is_incremented_after_saving_not_before() {
        let mut table = EchoTable::new();
        let frame = Frame::new_data(Id::Standard(StandardId::new(1).unwrap()), FrameFlag::empty(), &[1]).unwrap();
        let marker = table.save(frame, 1000);
        assert!(table.slots[marker as usize].is_some());
        assert_eq!(marker, 0);
        assert_eq!(table.next_marker, 1);
    }

    #[test]
    fn take_clears_and_returns_the_slot() {
        let mut table = EchoTable::new();
        let frame = Frame::new_data(Id::Standard(StandardId::new(2).unwrap()), FrameFlag::empty(), &[9]).unwrap();
        let marker = table.save(frame, 42);
        let (got, ts) = table.take(marker).unwrap();
        assert_eq!(got.data(), frame.data());
        assert_eq!(ts, 42);
        assert!(table.take(marker).is_none());
    }
}
