//! Binary control request dispatcher (§4.4), generalized from the teacher's
//! `control_in`/`control_out` match arms over `request_type == Vendor`.
//!
//! USB SETUP semantics only allow one IN data stage, so every OUT request
//! that can fail is split into `stage1_validate` (runs before the host
//! commits to the data stage, never mutates state) and `stage2_execute`
//! (mutates state and records the result in `CanDriver::last_error`,
//! polled back later with `GetLastError`).

use canstack_protocol::bit_timing::BitTiming;
use canstack_protocol::capability::{BitTimingLimits, Capabilities, CapabilitiesFd};
use canstack_protocol::error_report::ErrorCode;
use canstack_protocol::filter::{IdScope, MaskFilter};
use canstack_protocol::mode::{Mode, OpenFlags};
use canstack_protocol::request::HOST_FORMAT_MAGIC;
pub use canstack_protocol::request::Request;

use crate::can::{CanDriver, Controller};
use crate::platform::Platform;

/// Stateless dispatcher: every method takes the driver/platform it acts on,
/// so it carries no lifetime of its own and can be shared by both
/// `CandlelightClass` and `SlcanClass`.
#[derive(Debug, Default)]
pub struct ControlDispatcher;

impl ControlDispatcher {
    /// Handles a control IN (device-to-host) request. Writes the reply into
    /// `out` and returns the number of bytes written, or `None` if the
    /// request is unknown or `out` is too small.
    pub fn control_in<C: Controller, P: Platform>(
        &self,
        request: Request,
        driver: &CanDriver<C>,
        platform: &P,
        out: &mut [u8],
    ) -> Option<usize> {
        match request {
            Request::GetCapabilities => {
                let caps = capabilities(platform);
                Some(write_capabilities(out, &caps))
            }
            Request::GetCapabilitiesFd => {
                let caps = capabilities_fd(platform);
                Some(write_capabilities_fd(out, &caps))
            }
            Request::GetDeviceVersion => {
                let (hw, sw) = platform.versions();
                out[0..4].copy_from_slice(&hw.to_le_bytes());
                out[4..8].copy_from_slice(&sw.to_le_bytes());
                Some(8)
            }
            Request::GetTimestamp => {
                out[0..4].copy_from_slice(&platform.device_tick_us().to_le_bytes());
                Some(4)
            }
            Request::GetTermination => {
                out[0] = platform.has_termination() as u8;
                Some(1)
            }
            Request::GetLastError => {
                out[0] = driver.last_error().ascii_digit() - b'0';
                Some(1)
            }
            Request::GetPinStatus => {
                out[0] = platform.boot_override_disabled() as u8;
                Some(1)
            }
            Request::GetBoardInfo => {
                let info = platform.board_info();
                let name = info.board_name.as_bytes();
                let mcu = info.mcu_name.as_bytes();
                out[0..4].copy_from_slice(&info.device_id.to_le_bytes());
                let name_len = name.len().min(16);
                out[4..4 + name_len].copy_from_slice(&name[..name_len]);
                let mcu_len = mcu.len().min(16);
                out[20..20 + mcu_len].copy_from_slice(&mcu[..mcu_len]);
                Some(36)
            }
            _ => None,
        }
    }

    /// Stage 1: validates an OUT request's fixed-size fields against
    /// `platform`, without touching `driver`. Returns `Ok(())` if stage 2
    /// should run, or the error that `GetLastError` should report instead.
    pub fn stage1_validate<P: Platform>(
        &self,
        request: Request,
        value: u16,
        data: &[u8],
        platform: &P,
    ) -> Result<(), ErrorCode> {
        match request {
            Request::SetHostFormat => {
                if data.len() < 4 {
                    return Err(ErrorCode::InvalidParameter);
                }
                let word = u32::from_le_bytes(data[0..4].try_into().unwrap());
                if word == HOST_FORMAT_MAGIC {
                    Ok(())
                } else if word == HOST_FORMAT_MAGIC.swap_bytes() {
                    // a big-endian host identifies itself with the magic's
                    // byte-swapped form; we only ever speak little-endian.
                    Err(ErrorCode::UnsupportedFeature)
                } else {
                    Err(ErrorCode::InvalidParameter)
                }
            }
            Request::SetBitTiming | Request::SetBitTimingFd => {
                let timing = decode_bit_timing(data).ok_or(ErrorCode::InvalidParameter)?;
                let range = if matches!(request, Request::SetBitTimingFd) {
                    platform.data_range()
                } else {
                    platform.nominal_range()
                };
                range.validate(&timing).map_err(|_| ErrorCode::InvalidParameter)
            }
            Request::SetDeviceMode => {
                if value > 3 {
                    return Err(ErrorCode::InvalidParameter);
                }
                Ok(())
            }
            Request::SetTermination if !platform.has_termination() => Err(ErrorCode::UnsupportedFeature),
            Request::SetPinStatus if !platform.has_boot_override_pin() => Err(ErrorCode::UnsupportedFeature),
            Request::SetFilter => {
                if data.len() < 9 {
                    return Err(ErrorCode::InvalidParameter);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Stage 2: applies a validated OUT request and records the outcome on
    /// `driver.last_error`.
    pub fn stage2_execute<C: Controller, P: Platform>(
        &self,
        request: Request,
        value: u16,
        data: &[u8],
        driver: &mut CanDriver<C>,
        platform: &mut P,
    ) {
        let result = self.execute(request, value, data, driver, platform);
        let code = result.err().unwrap_or(ErrorCode::Ok);
        driver.set_last_error(code);
    }

    fn execute<C: Controller, P: Platform>(
        &self,
        request: Request,
        value: u16,
        data: &[u8],
        driver: &mut CanDriver<C>,
        platform: &mut P,
    ) -> Result<(), ErrorCode> {
        match request {
            Request::SetHostFormat => Ok(()),
            Request::SetBitTiming => {
                if driver.is_open() {
                    return Err(ErrorCode::AdapterMustBeClosed);
                }
                let timing = decode_bit_timing(data).ok_or(ErrorCode::InvalidParameter)?;
                driver.set_nominal_bit_timing(timing);
                Ok(())
            }
            Request::SetBitTimingFd => {
                if driver.is_open() {
                    return Err(ErrorCode::AdapterMustBeClosed);
                }
                let timing = decode_bit_timing(data).ok_or(ErrorCode::InvalidParameter)?;
                driver.set_data_bit_timing(timing);
                Ok(())
            }
            Request::SetDeviceMode => {
                let mode = match value {
                    0 => Mode::Normal,
                    1 => Mode::ListenOnly,
                    2 => Mode::InternalLoopback,
                    3 => Mode::ExternalLoopback,
                    _ => return Err(ErrorCode::InvalidParameter),
                };
                let flags = data
                    .get(0..4)
                    .map(|b| OpenFlags::from_bits_truncate(u32::from_le_bytes(b.try_into().unwrap())))
                    .unwrap_or_else(OpenFlags::empty);
                if driver.is_open() {
                    driver.close();
                }
                driver.open(mode, flags)
            }
            Request::Identify => {
                platform.identify(value != 0);
                Ok(())
            }
            Request::SetTermination => {
                let enable = data.first().copied().unwrap_or(0) != 0;
                if driver.is_open() {
                    return Err(ErrorCode::AdapterMustBeClosed);
                }
                let _ = enable;
                Ok(())
            }
            Request::SetFilter => {
                let scope = if data[0] != 0 { IdScope::Extended } else { IdScope::Standard };
                let accept = u32::from_le_bytes(data[1..5].try_into().unwrap());
                let mask = u32::from_le_bytes(data[5..9].try_into().unwrap());
                driver
                    .set_filter(MaskFilter { scope, accept, mask })
                    .map_err(|_| ErrorCode::InvalidParameter)
            }
            Request::SetBusloadReport => {
                driver.set_busload_interval(data.first().copied().unwrap_or(0));
                Ok(())
            }
            Request::SetPinStatus => {
                let disable = data.first().copied().unwrap_or(0) != 0;
                if driver.is_open() {
                    return Err(ErrorCode::AdapterMustBeOpen);
                }
                platform.set_boot_override_disabled(disable).map_err(|_| ErrorCode::OptionBytesProgrammingFailed)
            }
            _ => Err(ErrorCode::InvalidCommand),
        }
    }
}

fn decode_bit_timing(data: &[u8]) -> Option<BitTiming> {
    if data.len() < 16 {
        return None;
    }
    Some(BitTiming {
        brp: u32::from_le_bytes(data[0..4].try_into().unwrap()),
        seg1: u32::from_le_bytes(data[4..8].try_into().unwrap()),
        seg2: u32::from_le_bytes(data[8..12].try_into().unwrap()),
        sjw: u32::from_le_bytes(data[12..16].try_into().unwrap()),
    })
}

fn limits(range: &canstack_protocol::bit_timing::BitTimingRange) -> BitTimingLimits {
    BitTimingLimits {
        seg1_min: *range.seg1.start(),
        seg1_max: *range.seg1.end(),
        seg2_min: *range.seg2.start(),
        seg2_max: *range.seg2.end(),
        sjw_max: *range.sjw.end(),
        brp_min: *range.brp.start(),
        brp_max: *range.brp.end(),
        brp_inc: 1,
    }
}

fn capabilities<P: Platform>(platform: &P) -> Capabilities {
    Capabilities {
        features: platform.features(),
        can_clock_hz: platform.can_clock_hz(),
        nominal: limits(&platform.nominal_range()),
    }
}

fn capabilities_fd<P: Platform>(platform: &P) -> CapabilitiesFd {
    CapabilitiesFd {
        features: platform.features(),
        can_clock_hz: platform.can_clock_hz(),
        nominal: limits(&platform.nominal_range()),
        data: limits(&platform.data_range()),
    }
}

fn write_limits(out: &mut [u8], l: &BitTimingLimits) -> usize {
    let fields = [l.seg1_min, l.seg1_max, l.seg2_min, l.seg2_max, l.sjw_max, l.brp_min, l.brp_max, l.brp_inc];
    for (i, f) in fields.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&f.to_le_bytes());
    }
    fields.len() * 4
}

fn write_capabilities(out: &mut [u8], caps: &Capabilities) -> usize {
    out[0..4].copy_from_slice(&caps.features.bits().to_le_bytes());
    out[4..8].copy_from_slice(&caps.can_clock_hz.to_le_bytes());
    let n = write_limits(&mut out[8..], &caps.nominal);
    8 + n
}

fn write_capabilities_fd(out: &mut [u8], caps: &CapabilitiesFd) -> usize {
    out[0..4].copy_from_slice(&caps.features.bits().to_le_bytes());
    out[4..8].copy_from_slice(&caps.can_clock_hz.to_le_bytes());
    let n1 = write_limits(&mut out[8..], &caps.nominal);
    let n2 = write_limits(&mut out[8 + n1..], &caps.data);
    8 + n1 + n2
}

#[cfg(test)]
mod tests {
    use super::*;
    use canstack_protocol::bit_timing::BitTimingRange;
    use canstack_protocol::capability::Feature;
    use crate::can::ErrorCode as CanErrorCode;
    use crate::platform::BoardInfo;

    struct MockController;
    impl Controller for MockController {
        fn apply_bit_timing(&mut self, _n: BitTiming, _d: Option<BitTiming>) {}
        fn install_filters(&mut self, _f: &canstack_protocol::filter::FilterBank) {}
        fn start(&mut self, _m: Mode) -> Result<(), ()> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn free_tx_mailboxes(&self) -> u8 {
            1
        }
        fn send(&mut self, _f: &canstack_protocol::Frame) -> Result<(), ()> {
            Ok(())
        }
        fn error_counters(&self) -> (u16, u16) {
            (0, 0)
        }
        fn proto_err_flags(&self) -> canstack_protocol::error_report::ProtoErrFlags {
            canstack_protocol::error_report::ProtoErrFlags::empty()
        }
        fn sample_busload(&mut self) -> Option<u8> {
            None
        }
    }

    struct MockPlatform {
        boot_override_disabled: bool,
    }

    impl Platform for MockPlatform {
        fn can_clock_hz(&self) -> u32 {
            160_000_000
        }
        fn nominal_range(&self) -> BitTimingRange {
            BitTimingRange { brp: 1..=512, seg1: 1..=256, seg2: 1..=128, sjw: 1..=128 }
        }
        fn data_range(&self) -> BitTimingRange {
            BitTimingRange { brp: 1..=32, seg1: 1..=32, seg2: 1..=16, sjw: 1..=16 }
        }
        fn features(&self) -> Feature {
            Feature::FD | Feature::LISTEN_ONLY
        }
        fn has_termination(&self) -> bool {
            false
        }
        fn has_boot_override_pin(&self) -> bool {
            true
        }
        fn boot_override_disabled(&self) -> bool {
            self.boot_override_disabled
        }
        fn set_boot_override_disabled(&mut self, disabled: bool) -> Result<(), ()> {
            self.boot_override_disabled = disabled;
            Ok(())
        }
        fn identify(&mut self, _enable: bool) {}
        fn enter_dfu(&mut self) -> ! {
            panic!("not reached in tests")
        }
        fn device_tick_us(&self) -> u32 {
            1234
        }
        fn versions(&self) -> (u32, u32) {
            (0x0100, 0x0001)
        }
        fn board_info(&self) -> BoardInfo {
            BoardInfo { board_name: "TestBoard", mcu_name: "TestMcu", device_id: 42 }
        }
    }

    #[test]
    fn set_bit_timing_then_open_succeeds() {
        let dispatcher = ControlDispatcher;
        let mut driver = CanDriver::new(MockController);
        let mut platform = MockPlatform { boot_override_disabled: false };

        let mut timing = [0u8; 16];
        timing[0..4].copy_from_slice(&2u32.to_le_bytes());
        timing[4..8].copy_from_slice(&139u32.to_le_bytes());
        timing[8..12].copy_from_slice(&20u32.to_le_bytes());
        timing[12..16].copy_from_slice(&20u32.to_le_bytes());

        assert!(dispatcher.stage1_validate(Request::SetBitTiming, 0, &timing, &platform).is_ok());
        dispatcher.stage2_execute(Request::SetBitTiming, 0, &timing, &mut driver, &mut platform);
        assert_eq!(driver.last_error(), CanErrorCode::Ok);

        dispatcher.stage2_execute(Request::SetDeviceMode, 0, &[], &mut driver, &mut platform);
        assert_eq!(driver.last_error(), CanErrorCode::Ok);
        assert!(driver.is_open());
    }

    #[test]
    fn set_termination_rejected_when_unsupported() {
        let dispatcher = ControlDispatcher;
        let platform = MockPlatform { boot_override_disabled: false };
        assert_eq!(
            dispatcher.stage1_validate(Request::SetTermination, 0, &[1], &platform),
            Err(ErrorCode::UnsupportedFeature)
        );
    }

    #[test]
    fn get_capabilities_round_trips_feature_bits() {
        let dispatcher = ControlDispatcher;
        let driver = CanDriver::new(MockController);
        let platform = MockPlatform { boot_override_disabled: false };
        let mut out = [0u8; 64];
        let len = dispatcher.control_in(Request::GetCapabilities, &driver, &platform, &mut out).unwrap();
        let features = u32::from_le_bytes(out[0..4].try_into().unwrap());
        assert_eq!(Feature::from_bits_truncate(features), Feature::FD | Feature::LISTEN_ONLY);
        assert!(len >= 8);
    }
}
