//! The host-side error type: USB transport failures plus the device's own
//! `last_error` taxonomy surfaced back up as a normal `Result`.

use std::fmt;

use canstack_protocol::error_report::ErrorCode;

#[derive(Debug, Clone, Copy)]
pub enum DriverError {
    /// No adapter matching a known VID/PID pair was found during enumerate.
    NotFound,
    /// The underlying USB transport failed (open, claim, transfer).
    Usb(rusb::Error),
    /// The device rejected the last OUT request; read back via `GetLastError`.
    Device(ErrorCode),
    /// `receive` timed out with no frame available.
    Timeout,
    /// The RX FIFO overflowed at least once since the caller last checked.
    RxOverflow,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::NotFound => write!(f, "no matching adapter found"),
            DriverError::Usb(e) => write!(f, "usb transport error: {e}"),
            DriverError::Device(code) => write!(f, "device rejected request: {code:?}"),
            DriverError::Timeout => write!(f, "receive timed out"),
            DriverError::RxOverflow => write!(f, "rx fifo overflowed"),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<rusb::Error> for DriverError {
    fn from(e: rusb::Error) -> Self {
        DriverError::Usb(e)
    }
}
