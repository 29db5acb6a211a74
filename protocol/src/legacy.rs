//! Legacy fixed-width 80-byte framing (§4.1).
//!
//! One record type travels in both directions. `echo_id = 0xFFFF_FFFF`
//! means "received from bus"; any other value is the device echoing a
//! host-submitted frame the instant it entered the Tx FIFO (§9 open
//! question (b): the timestamp on that echo is known to be wrong, and this
//! is preserved for compatibility rather than fixed).

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::frame::{Frame, FrameFlag};

/// Sentinel `echo_id` meaning "this record is a frame received from the bus".
pub const ECHO_ID_RX: u32 = 0xFFFF_FFFF;

/// `can_id` bit marking an error report riding inside a legacy record.
pub const ERROR_SENTINEL_BIT: u32 = 0x2000_0000;

pub const RECORD_LEN: usize = 80;

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct LegacyRecord {
    pub echo_id: u32,
    pub can_id: u32,
    pub dlc: u8,
    pub channel: u8,
    pub flags: u8,
    pub(crate) reserved: u8,
    pub payload: [u8; 64],
    pub timestamp_us: u32,
}

const _: () = assert!(core::mem::size_of::<LegacyRecord>() == RECORD_LEN);

impl LegacyRecord {
    pub fn from_frame(frame: &Frame, channel: u8, echo_id: u32, timestamp_us: u32) -> Self {
        let mut payload = [0u8; 64];
        payload[..frame.len()].copy_from_slice(frame.data());

        Self {
            echo_id,
            can_id: frame.raw_can_id(),
            dlc: frame.dlc(),
            channel,
            flags: frame.flags().bits(),
            reserved: 0,
            payload,
            timestamp_us,
        }
    }

    pub fn to_frame(&self) -> Result<Frame, crate::frame::FrameError> {
        let flags = FrameFlag::from_bits_truncate(self.flags);
        Frame::from_wire(self.can_id, flags, self.dlc, &self.payload)
    }

    pub fn is_error_report(&self) -> bool {
        self.can_id & ERROR_SENTINEL_BIT != 0
    }

    pub fn is_rx(&self) -> bool {
        self.echo_id == ECHO_ID_RX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::{Id, StandardId};

    #[test]
    fn record_is_exactly_eighty_bytes() {
        assert_eq!(core::mem::size_of::<LegacyRecord>(), 80);
    }

    #[test]
    fn round_trips_a_data_frame() {
        let id = Id::Standard(StandardId::new(0x7E0).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1, 2, 3, 4]).unwrap();
        let record = LegacyRecord::from_frame(&frame, 0, ECHO_ID_RX, 1234);
        assert!(record.is_rx());
        assert!(!record.is_error_report());
        let decoded = record.to_frame().unwrap();
        assert_eq!(decoded.data(), frame.data());
        assert_eq!(decoded.raw_can_id(), frame.raw_can_id());
    }
}
