//! The wire-neutral CAN/CAN-FD frame record shared by both framing protocols.

use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};
#[cfg(feature = "defmt-03")]
use defmt::Format;

use crate::dlc::{byte_count_to_dlc, dlc_to_byte_count};

/// High bits carried in the 32-bit `can_id` word on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct IdFlag(u32);

bitflags! {
    impl IdFlag: u32 {
        /// 29-bit identifier in use.
        const EXTENDED = 0x8000_0000;
        /// Remote transmission request.
        const REMOTE = 0x4000_0000;
        /// Legacy-framing error sentinel (never set on extended framing).
        const ERROR = 0x2000_0000;
    }
}

const ID_VALUE_MASK: u32 = 0x1FFF_FFFF;

/// Per-frame flags, distinct from the per-open [`crate::mode::OpenFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct FrameFlag(u8);

bitflags! {
    impl FrameFlag: u8 {
        /// Flexible data-rate frame.
        const FDF = 0x02;
        /// Bit-rate switch (FD only).
        const BRS = 0x04;
        /// Error state indicator (FD only).
        const ESI = 0x08;
    }
}

/// Errors raised when constructing an invalid [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub enum FrameError {
    /// `len` is not one of the DLC-coded sizes.
    InvalidLength,
    /// A classic (non-FDF) frame was given a payload longer than 8 bytes.
    ClassicPayloadTooLong,
}

/// A decoded CAN/CAN-FD frame, independent of either wire framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct Frame {
    can_id: u32,
    flags: FrameFlag,
    data: [u8; 64],
    len: u8,
    remote: bool,
    /// Device-tick timestamp, present only when firmware timestamps are enabled.
    pub timestamp: Option<u32>,
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            can_id: 0,
            flags: FrameFlag::default(),
            data: [0u8; 64],
            len: 0,
            remote: false,
            timestamp: None,
        }
    }
}

impl Frame {
    /// Builds a data frame. `len` must be a valid DLC-coded size; for
    /// non-FDF frames it must additionally be `<= 8`.
    pub fn new_data(id: Id, flags: FrameFlag, data: &[u8]) -> Result<Self, FrameError> {
        byte_count_to_dlc(data.len()).ok_or(FrameError::InvalidLength)?;
        let flags = Self::normalize_flags(flags, data.len())?;

        let mut buf = [0u8; 64];
        buf[..data.len()].copy_from_slice(data);

        Ok(Self {
            can_id: Self::encode_id(id),
            flags,
            data: buf,
            len: data.len() as u8,
            remote: false,
            timestamp: None,
        })
    }

    /// Builds a remote frame. `dlc` encodes the requested length only; no
    /// data bytes are transmitted.
    pub fn new_remote(id: Id, dlc: u8) -> Result<Self, FrameError> {
        dlc_to_byte_count(dlc).ok_or(FrameError::InvalidLength)?;

        Ok(Self {
            can_id: Self::encode_id(id),
            flags: FrameFlag::empty(),
            data: [0u8; 64],
            len: dlc,
            remote: true,
            timestamp: None,
        })
    }

    fn normalize_flags(flags: FrameFlag, len: usize) -> Result<FrameFlag, FrameError> {
        if flags.contains(FrameFlag::FDF) {
            Ok(flags)
        } else if len > 8 {
            Err(FrameError::ClassicPayloadTooLong)
        } else {
            // BRS/ESI are only meaningful under FDF; strip them from classic frames.
            Ok(flags & !(FrameFlag::BRS | FrameFlag::ESI))
        }
    }

    fn encode_id(id: Id) -> u32 {
        match id {
            Id::Standard(s) => s.as_raw() as u32,
            Id::Extended(e) => e.as_raw() | IdFlag::EXTENDED.bits(),
        }
    }

    /// Raw 29-bit identifier value plus extended/remote tag bits, as carried
    /// on the wire.
    pub fn raw_can_id(&self) -> u32 {
        let mut raw = self.can_id & (IdFlag::EXTENDED.bits() | ID_VALUE_MASK);
        if self.remote {
            raw |= IdFlag::REMOTE.bits();
        }
        raw
    }

    /// Reconstructs a [`Frame`] from a raw wire `can_id` word, flags, and
    /// DLC-coded payload slice (data frames) or bare DLC (remote frames).
    pub fn from_wire(raw_can_id: u32, flags: FrameFlag, dlc: u8, data: &[u8]) -> Result<Self, FrameError> {
        let extended = raw_can_id & IdFlag::EXTENDED.bits() != 0;
        let remote = raw_can_id & IdFlag::REMOTE.bits() != 0;
        let value = raw_can_id & ID_VALUE_MASK;
        let id = if extended {
            Id::Extended(ExtendedId::new(value).ok_or(FrameError::InvalidLength)?)
        } else {
            Id::Standard(StandardId::new(value as u16).ok_or(FrameError::InvalidLength)?)
        };

        if remote {
            Self::new_remote(id, dlc)
        } else {
            let len = dlc_to_byte_count(dlc).ok_or(FrameError::InvalidLength)?;
            let mut frame = Self::new_data(id, flags, &data[..len.min(data.len())])?;
            frame.flags = Self::normalize_flags(flags, len)?;
            Ok(frame)
        }
    }

    pub fn id(&self) -> Id {
        let value = self.can_id & ID_VALUE_MASK;
        if self.is_extended() {
            Id::Extended(ExtendedId::new(value).unwrap())
        } else {
            Id::Standard(StandardId::new(value as u16).unwrap())
        }
    }

    pub fn is_extended(&self) -> bool {
        self.can_id & IdFlag::EXTENDED.bits() != 0
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn flags(&self) -> FrameFlag {
        self.flags
    }

    pub fn is_fd(&self) -> bool {
        self.flags.contains(FrameFlag::FDF)
    }

    /// DLC nibble for this frame (byte length for data frames, requested
    /// length for remote frames).
    pub fn dlc(&self) -> u8 {
        byte_count_to_dlc(self.len as usize).unwrap_or(self.len.min(8))
    }

    /// Data payload; empty for remote frames.
    pub fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.len as usize]
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_id_sets_top_bit_and_masks_on_decode() {
        let id = ExtendedId::new(0x1FFF_FFFF).unwrap();
        let f = Frame::new_data(Id::Extended(id), FrameFlag::empty(), &[1, 2]).unwrap();
        assert_eq!(f.raw_can_id() & 0x8000_0000, 0x8000_0000);
        assert!(f.is_extended());
        match f.id() {
            Id::Extended(got) => assert_eq!(got.as_raw(), 0x1FFF_FFFF),
            _ => panic!("expected extended id"),
        }
    }

    #[test]
    fn standard_id_has_zero_high_bits() {
        let id = StandardId::new(0x123).unwrap();
        let f = Frame::new_data(Id::Standard(id), FrameFlag::empty(), &[]).unwrap();
        assert_eq!(f.raw_can_id() & 0xE000_0000, 0);
    }

    #[test]
    fn classic_frame_rejects_long_payload() {
        let id = StandardId::new(1).unwrap();
        let data = [0u8; 16];
        assert_eq!(
            Frame::new_data(Id::Standard(id), FrameFlag::empty(), &data).unwrap_err(),
            FrameError::ClassicPayloadTooLong
        );
    }

    #[test]
    fn classic_frame_strips_brs_and_esi() {
        let id = StandardId::new(1).unwrap();
        let f = Frame::new_data(Id::Standard(id), FrameFlag::BRS | FrameFlag::ESI, &[1]).unwrap();
        assert!(!f.flags().intersects(FrameFlag::BRS | FrameFlag::ESI));
    }

    #[test]
    fn remote_frame_carries_no_data() {
        let id = StandardId::new(1).unwrap();
        let f = Frame::new_remote(Id::Standard(id), 8).unwrap();
        assert!(f.is_remote());
        assert!(f.data().is_empty());
        assert_eq!(f.dlc(), 8);
    }

    #[test]
    fn every_valid_length_round_trips_through_data_frame() {
        use crate::dlc::VALID_LENGTHS;
        let id = StandardId::new(1).unwrap();
        for &len in &VALID_LENGTHS {
            let data = vec![0xAAu8; len as usize];
            let flags = if len > 8 {
                FrameFlag::FDF
            } else {
                FrameFlag::empty()
            };
            let f = Frame::new_data(Id::Standard(id), flags, &data).unwrap();
            assert_eq!(f.len(), len as usize);
        }
    }
}
