//! Board capability bitset, reported by `GetCapabilities`/`GetCapabilitiesFD`.
//!
//! Ported directly from the teacher crate's `host::Feature`, which already
//! matches the gs_usb capability bitset this adapter's binary control layer
//! exposes.

use bitflags::bitflags;
#[cfg(feature = "defmt-03")]
use defmt::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct Feature(u32);

bitflags! {
    impl Feature: u32 {
        const LISTEN_ONLY = 1 << 0;
        const LOOP_BACK = 1 << 1;
        const TRIPLE_SAMPLE = 1 << 2;
        const ONE_SHOT = 1 << 3;
        const HW_TIMESTAMP = 1 << 4;
        const IDENTIFY = 1 << 5;
        const USER_ID = 1 << 6;
        const PAD_PKTS_TO_MAX_PKT_SIZE = 1 << 7;
        const FD = 1 << 8;
        const REQ_USB_QUIRK_LPC546XX = 1 << 9;
        const BT_CONST_EXT = 1 << 10;
        const TERMINATION = 1 << 11;
        const BUS_ERROR_REPORTING = 1 << 12;
        const GET_STATE = 1 << 13;
    }
}

/// `{brp, seg1, seg2, sjw}` min/max/inc limits advertised for one bit-timing
/// phase, matching `GrepitAB-mcan`'s `BitTimingRanges` shape but exposed as
/// the wire struct `GetCapabilities[FD]` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitTimingLimits {
    pub seg1_min: u32,
    pub seg1_max: u32,
    pub seg2_min: u32,
    pub seg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

/// Board capability snapshot for the classic (non-FD) table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub features: Feature,
    pub can_clock_hz: u32,
    pub nominal: BitTimingLimits,
}

/// Board capability snapshot for the CAN-FD table.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitiesFd {
    pub features: Feature,
    pub can_clock_hz: u32,
    pub nominal: BitTimingLimits,
    pub data: BitTimingLimits,
}
