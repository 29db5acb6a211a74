//! The bit-exact 8-byte error report payload (§6) plus the accompanying
//! 32-bit err-id, shared by both framing protocols, and the request-level
//! error taxonomy (§7).

use bitflags::bitflags;
#[cfg(feature = "defmt-03")]
use defmt::Format;

/// Byte 1: protocol/bus status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct BusStatusFlags(u8);

bitflags! {
    impl BusStatusFlags: u8 {
        const ERROR_WARNING_TX = 1 << 0;
        const ERROR_WARNING_RX = 1 << 1;
        const ERROR_PASSIVE_TX = 1 << 2;
        const ERROR_PASSIVE_RX = 1 << 3;
        const BUS_BACK_ACTIVE = 1 << 4;
        const BUFFER_OVERFLOW_TX = 1 << 5;
        const BUFFER_OVERFLOW_RX = 1 << 6;
    }
}

/// Byte 2: framing/protocol violation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct ProtoErrFlags(u8);

bitflags! {
    impl ProtoErrFlags: u8 {
        const SINGLE_BIT = 1 << 0;
        const FORM = 1 << 1;
        const STUFF = 1 << 2;
        const CANNOT_SEND_DOMINANT = 1 << 3;
        const CANNOT_SEND_RECESSIVE = 1 << 4;
        const OVERLOAD = 1 << 5;
        const ACTIVE = 1 << 6;
        const TX_ERROR = 1 << 7;
    }
}

/// Byte 5: application-level error flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct AppErrorFlags(u8);

bitflags! {
    impl AppErrorFlags: u8 {
        const RX_FAIL = 1 << 0;
        const TX_FAIL = 1 << 1;
        const TX_FIFO_OVERFLOW = 1 << 2;
        const USB_IN_OVERFLOW = 1 << 3;
        const TX_TIMEOUT = 1 << 4;
    }
}

/// The 32-bit err-id accompanying the 8-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct ErrIdFlags(u32);

bitflags! {
    impl ErrIdFlags: u32 {
        const BUS_OFF = 1 << 0;
        const NO_ACK = 1 << 1;
        const CRC = 1 << 2;
        const TX_TIMEOUT = 1 << 3;
        const ARBITRATION_LOST = 1 << 4;
        /// Only meaningful on legacy framing, where it also doubles as the
        /// `can_id` sentinel bit `0x2000_0000` (see [`crate::frame::IdFlag::ERROR`]).
        const LEGACY_ERROR_SENTINEL = 1 << 29;
    }
}

/// The aggregate error/bus-state report (§4.3).
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub struct ErrorReport {
    pub bus_status: BusStatusFlags,
    pub proto_err: ProtoErrFlags,
    pub app_flags: AppErrorFlags,
    pub tx_errors: u8,
    pub rx_errors: u8,
    pub err_id: ErrIdFlags,
}

impl core::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "bus={:?} proto={:?} app={:?} tx_err={} rx_err={} err_id={:?}",
            self.bus_status, self.proto_err, self.app_flags, self.tx_errors, self.rx_errors, self.err_id
        )
    }
}

impl ErrorReport {
    /// Encodes the bit-exact 8-byte payload from §6.
    pub fn to_bytes(&self) -> [u8; 8] {
        [
            0,
            self.bus_status.bits(),
            self.proto_err.bits(),
            0,
            0,
            self.app_flags.bits(),
            self.tx_errors,
            self.rx_errors,
        ]
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            bus_status: BusStatusFlags::from_bits_truncate(bytes[1]),
            proto_err: ProtoErrFlags::from_bits_truncate(bytes[2]),
            app_flags: AppErrorFlags::from_bits_truncate(bytes[5]),
            tx_errors: bytes[6],
            rx_errors: bytes[7],
            err_id: ErrIdFlags::empty(),
        }
    }
}

/// The error taxonomy shared by the binary `last_error` byte and the ASCII
/// in-band reply code (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    InvalidCommand = 1,
    InvalidParameter = 2,
    AdapterMustBeOpen = 3,
    AdapterMustBeClosed = 4,
    ErrorFromController = 5,
    UnsupportedFeature = 6,
    TxBufferFull = 7,
    BusIsOff = 8,
    NoTxInSilentMode = 9,
    BaudrateNotSet = 10,
    OptionBytesProgrammingFailed = 11,
    ResetRequired = 12,
}

impl ErrorCode {
    /// Converts from the raw `last_error` byte polled via `GetLastError`.
    pub fn from_last_error_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => ErrorCode::Ok,
            1 => ErrorCode::InvalidCommand,
            2 => ErrorCode::InvalidParameter,
            3 => ErrorCode::AdapterMustBeOpen,
            4 => ErrorCode::AdapterMustBeClosed,
            5 => ErrorCode::ErrorFromController,
            6 => ErrorCode::UnsupportedFeature,
            7 => ErrorCode::TxBufferFull,
            8 => ErrorCode::BusIsOff,
            9 => ErrorCode::NoTxInSilentMode,
            10 => ErrorCode::BaudrateNotSet,
            11 => ErrorCode::OptionBytesProgrammingFailed,
            12 => ErrorCode::ResetRequired,
            _ => return None,
        })
    }

    /// The ASCII feedback character for this code (`#X\r`), matching the
    /// Slcan error-code digit scheme in the original firmware.
    pub fn ascii_digit(self) -> u8 {
        b'0' + self as u8
    }
}
