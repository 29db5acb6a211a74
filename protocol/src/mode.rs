//! Device mode and the orthogonal open-time flags (§3). Distinct from
//! [`crate::capability::Feature`], which is the board's advertised
//! capability bitset.

use bitflags::bitflags;
#[cfg(feature = "defmt-03")]
use defmt::Format;

/// The CAN peripheral's operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub enum Mode {
    Normal,
    ListenOnly,
    InternalLoopback,
    ExternalLoopback,
}

/// Orthogonal flags set together with [`Mode`] at `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        const ONE_SHOT = 1 << 0;
        const SEND_FIRMWARE_TIMESTAMP = 1 << 1;
        const SUPPRESS_TX_ECHO = 1 << 2;
        const EXTENDED_PROTOCOL = 1 << 3;
    }
}

/// Top-level adapter state. Transitions only between `Closed` and
/// `Open(mode, flags)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub enum DeviceState {
    Closed,
    Open(Mode, OpenFlags),
}

impl DeviceState {
    pub fn is_open(&self) -> bool {
        matches!(self, DeviceState::Open(..))
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            DeviceState::Open(mode, _) => Some(*mode),
            DeviceState::Closed => None,
        }
    }

    pub fn flags(&self) -> OpenFlags {
        match self {
            DeviceState::Open(_, flags) => *flags,
            DeviceState::Closed => OpenFlags::empty(),
        }
    }
}
