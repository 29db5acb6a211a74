//! Binary control request codes (§4.4), shared by the device's dispatcher
//! and the host's control-transfer call sites so the numbering can never
//! drift between the two.

/// Vendor request codes. Values are assigned in table order, not ported
/// from gs_usb's numbering, since the extended protocol widens the table
/// well past what that scheme reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    SetHostFormat = 0,
    SetBitTiming = 1,
    SetDeviceMode = 2,
    SetBitTimingFd = 3,
    GetCapabilities = 4,
    GetCapabilitiesFd = 5,
    GetDeviceVersion = 6,
    GetTimestamp = 7,
    Identify = 8,
    SetTermination = 9,
    GetTermination = 10,
    SetFilter = 11,
    GetLastError = 12,
    SetBusloadReport = 13,
    SetPinStatus = 14,
    GetPinStatus = 15,
    GetBoardInfo = 16,
}

impl Request {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Request::SetHostFormat,
            1 => Request::SetBitTiming,
            2 => Request::SetDeviceMode,
            3 => Request::SetBitTimingFd,
            4 => Request::GetCapabilities,
            5 => Request::GetCapabilitiesFd,
            6 => Request::GetDeviceVersion,
            7 => Request::GetTimestamp,
            8 => Request::Identify,
            9 => Request::SetTermination,
            10 => Request::GetTermination,
            11 => Request::SetFilter,
            12 => Request::GetLastError,
            13 => Request::SetBusloadReport,
            14 => Request::SetPinStatus,
            15 => Request::GetPinStatus,
            16 => Request::GetBoardInfo,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Little-endian magic a host writes via `SetHostFormat` to declare it
/// speaks the same byte order as the device.
pub const HOST_FORMAT_MAGIC: u32 = 0x0000_beef;

/// USB interface class used by both vendor interfaces (CAN data and the
/// DFU-only companion), so the host can find them by walking descriptors
/// instead of assuming fixed interface numbers.
pub const INTERFACE_CLASS: u8 = 0xFF;

/// Subclass/protocol the DFU-only companion interface declares under
/// [`INTERFACE_CLASS`], distinguishing it from the CAN data interface during
/// descriptor walking.
pub const DFU_SUBCLASS: u8 = 0xFE;
pub const DFU_PROTOCOL: u8 = 0x01;

/// The standard USB DFU class request that asks a device to reset into its
/// bootloader (DFU spec §3.1), issued to the DFU-only companion interface.
pub const DFU_DETACH_REQUEST: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_request_code() {
        for code in 0..=16u8 {
            let req = Request::from_u8(code).unwrap();
            assert_eq!(req.code(), code);
        }
        assert!(Request::from_u8(17).is_none());
    }
}
