//! The client-facing adapter API (§4.6, §5, §6): open/close, bit timing,
//! filters, send/receive, and the vendor-request helpers that poll
//! `GetLastError` after every OUT request, the way the teacher's
//! `Gs_usb`-style hosts never trust a control transfer's ACK alone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use canstack_protocol::bit_timing::BitTiming;
use canstack_protocol::error_report::{AppErrorFlags, ErrorCode, ErrorReport};
use canstack_protocol::filter::IdScope;
use canstack_protocol::legacy::LegacyRecord;
use canstack_protocol::mode::{Mode, OpenFlags};
use canstack_protocol::request::Request;
use canstack_protocol::Frame;

use crate::decode::{self, Packet};
use crate::echo::EchoTable;
use crate::error::DriverError;
use crate::fifo::Fifo;
use crate::reader::ReaderHandle;
use crate::timestamp::{DeviceClock, HostClock};
use crate::transport::{AdapterInfo, RusbTransport, UsbTransport, VendorInterface};

const RECEIVE_POLL: Duration = Duration::from_millis(20);

/// One received/acknowledged item, with a wall-clock timestamp derived from
/// the firmware's device tick when the adapter reports one, or from the
/// host's own receive time otherwise.
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    Frame { frame: Frame, wall_us: u64 },
    Echo { frame: Frame, sent_wall_us: u64, ack_wall_us: u64 },
    Error { report: ErrorReport, wall_us: u64 },
    Busload { percent: u8, wall_us: u64 },
    /// No data arrived within the requested timeout.
    Timeout,
    /// The reader thread's underlying `bulk_read` failed; surfaced once, on
    /// the first `receive` after it happened.
    TransportError(DriverError),
}

/// An open session against one adapter. Generic over [`UsbTransport`] so
/// tests can swap in a fake; [`AdapterHandle::open_first`] is the normal
/// entry point, wired to [`RusbTransport`].
pub struct AdapterHandle<T: UsbTransport + 'static = RusbTransport> {
    transport: Arc<T>,
    vendor_interface: VendorInterface,
    reader: Option<ReaderHandle>,
    fifo: Arc<Fifo>,
    echo: EchoTable,
    host_clock: HostClock,
    device_clock: Option<DeviceClock>,
    anchor_wall_us: u64,
    extended_protocol: bool,
    timestamps_enabled: bool,
    /// Set when the device has reported `TX_FIFO_OVERFLOW`; consumed (and
    /// refused against) by the next `send_packet`, mirroring `Fifo`'s sticky
    /// `take_overflow`.
    tx_overflow_latched: bool,
}

impl AdapterHandle<RusbTransport> {
    /// Opens the first enumerated adapter over the real USB transport.
    pub fn open_first() -> Result<Self, DriverError> {
        let adapters = crate::transport::enumerate()?;
        let info = adapters.into_iter().next().ok_or(DriverError::NotFound)?;
        Self::open_info(&info)
    }

    pub fn open_info(info: &AdapterInfo) -> Result<Self, DriverError> {
        let mut transport = RusbTransport::open(info)?;
        let vendor_interface = transport.vendor_interface();
        transport.claim(vendor_interface.interface)?;
        Ok(Self::new(transport, vendor_interface))
    }
}

impl<T: UsbTransport + 'static> AdapterHandle<T> {
    pub fn new(transport: T, vendor_interface: VendorInterface) -> Self {
        Self {
            transport: Arc::new(transport),
            vendor_interface,
            reader: None,
            fifo: Arc::new(Fifo::new()),
            echo: EchoTable::new(),
            host_clock: HostClock::new(),
            device_clock: None,
            anchor_wall_us: 0,
            extended_protocol: false,
            timestamps_enabled: false,
            tx_overflow_latched: false,
        }
    }

    fn control_out_checked(&self, request: Request, value: u16, data: &[u8]) -> Result<(), DriverError> {
        self.transport.control_out(request.code(), value, 0, data)?;
        let mut byte = [0u8; 1];
        self.transport.control_in(Request::GetLastError.code(), 0, 0, &mut byte)?;
        match ErrorCode::from_last_error_byte(byte[0]) {
            Some(ErrorCode::Ok) | None => Ok(()),
            Some(code) => Err(DriverError::Device(code)),
        }
    }

    /// Sets the nominal bit timing. The device must be closed.
    pub fn set_nominal_bitrate(&self, timing: BitTiming) -> Result<(), DriverError> {
        self.control_out_checked(Request::SetBitTiming, 0, &encode_bit_timing(&timing))
    }

    /// Sets the FD data-phase bit timing, deriving `sjw` as the largest
    /// value that still satisfies `sjw <= min(seg1, seg2)` so callers don't
    /// have to reason about the constraint themselves.
    pub fn set_data_bitrate(&self, brp: u32, seg1: u32, seg2: u32) -> Result<(), DriverError> {
        let sjw = seg1.min(seg2);
        let timing = BitTiming { brp, seg1, seg2, sjw };
        self.control_out_checked(Request::SetBitTimingFd, 0, &encode_bit_timing(&timing))
    }

    pub fn add_mask_filter(&self, scope: IdScope, accept: u32, mask: u32) -> Result<(), DriverError> {
        let mut data = [0u8; 9];
        data[0] = matches!(scope, IdScope::Extended) as u8;
        data[1..5].copy_from_slice(&accept.to_le_bytes());
        data[5..9].copy_from_slice(&mask.to_le_bytes());
        self.control_out_checked(Request::SetFilter, 0, &data)
    }

    /// Opens the adapter in `mode` with `flags`, anchors the device/host
    /// clocks, and starts the bulk-IN reader thread.
    pub fn start(&mut self, mode: Mode, flags: OpenFlags) -> Result<(), DriverError> {
        let mode_code: u16 = match mode {
            Mode::Normal => 0,
            Mode::ListenOnly => 1,
            Mode::InternalLoopback => 2,
            Mode::ExternalLoopback => 3,
        };
        self.control_out_checked(Request::SetDeviceMode, mode_code, &flags.bits().to_le_bytes())?;

        self.extended_protocol = flags.contains(OpenFlags::EXTENDED_PROTOCOL);
        self.timestamps_enabled = flags.contains(OpenFlags::SEND_FIRMWARE_TIMESTAMP);

        let mut ts_buf = [0u8; 4];
        self.transport.control_in(Request::GetTimestamp.code(), 0, 0, &mut ts_buf)?;
        let origin = u32::from_le_bytes(ts_buf);
        self.device_clock = Some(DeviceClock::new(origin));
        self.anchor_wall_us = self.host_clock.wall_us_now();

        self.reader = Some(ReaderHandle::spawn(self.transport.clone() as Arc<dyn UsbTransport>, self.vendor_interface.in_ep, self.fifo.clone()));
        Ok(())
    }

    /// Closes the adapter and stops the reader thread.
    pub fn close(&mut self) -> Result<(), DriverError> {
        self.reader = None;
        self.control_out_checked(Request::SetDeviceMode, 0, &OpenFlags::empty().bits().to_le_bytes())
    }

    pub fn identify(&self, enable: bool) -> Result<(), DriverError> {
        self.control_out_checked(Request::Identify, enable as u16, &[])
    }

    pub fn enable_busload(&self, interval_units_of_100ms: u8) -> Result<(), DriverError> {
        self.control_out_checked(Request::SetBusloadReport, 0, &[interval_units_of_100ms])
    }

    pub fn disable_boot_override(&self, disabled: bool) -> Result<(), DriverError> {
        self.control_out_checked(Request::SetPinStatus, 0, &[disabled as u8])
    }

    pub fn is_boot_override_disabled(&self) -> Result<bool, DriverError> {
        let mut byte = [0u8; 1];
        self.transport.control_in(Request::GetPinStatus.code(), 0, 0, &mut byte)?;
        Ok(byte[0] != 0)
    }

    /// Issues the standard USB DFU `DFU_DETACH` request to the companion
    /// interface. The adapter resets into its bootloader; there is no reply.
    pub fn enter_dfu_mode(&self) -> Result<(), DriverError> {
        let dfu_interface = self.transport.dfu_interface().ok_or(DriverError::NotFound)?;
        self.transport
            .class_out(canstack_protocol::request::DFU_DETACH_REQUEST, 0, dfu_interface as u16, &[])?;
        Ok(())
    }

    /// Submits a frame for transmission, returning the echo marker and the
    /// wall-clock time it was handed to the transport.
    pub fn send_packet(&mut self, frame: Frame) -> Result<(u8, u64), DriverError> {
        if self.tx_overflow_latched {
            self.tx_overflow_latched = false;
            return Err(DriverError::Device(ErrorCode::TxBufferFull));
        }

        let sent_wall_us = self.host_clock.wall_us_now();
        let marker = self.echo.save(frame, sent_wall_us);

        let mut bytes = [0u8; 80];
        let len = if self.extended_protocol {
            canstack_protocol::extended::encode_tx_frame(&mut bytes, &frame, marker)
        } else {
            let record = LegacyRecord::from_frame(&frame, 0, marker as u32, 0);
            bytes.copy_from_slice(zerocopy::AsBytes::as_bytes(&record));
            canstack_protocol::legacy::RECORD_LEN
        };

        self.transport.bulk_write(self.vendor_interface.out_ep, &bytes[..len])?;
        Ok((marker, sent_wall_us))
    }

    /// Waits up to `timeout` for the next item from the bulk IN endpoint.
    pub fn receive(&mut self, timeout: Duration) -> Result<ReceiveOutcome, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.fifo.take_overflow() {
                return Err(DriverError::RxOverflow);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ReceiveOutcome::Timeout);
            }
            let Some(slot) = self.fifo.pop(remaining.min(RECEIVE_POLL)) else {
                if Instant::now() >= deadline {
                    return Ok(ReceiveOutcome::Timeout);
                }
                continue;
            };

            if let Some(error) = slot.error {
                return Ok(ReceiveOutcome::TransportError(error));
            }

            let packet = if self.extended_protocol {
                decode::decode_extended(&slot.bytes[..slot.len as usize], self.timestamps_enabled)
            } else {
                decode::decode_legacy(&slot.bytes[..slot.len as usize])
            };

            let Ok(packet) = packet else { continue };
            return Ok(self.to_outcome(packet, slot.received_at));
        }
    }

    fn wall_us_for(&mut self, device_ts: Option<u32>, received_at: Instant) -> u64 {
        match (device_ts, self.device_clock.as_mut()) {
            (Some(raw), Some(clock)) => self.anchor_wall_us + clock.normalize(raw),
            _ => self.host_clock.wall_us_for_instant(received_at),
        }
    }

    fn to_outcome(&mut self, packet: Packet, received_at: Instant) -> ReceiveOutcome {
        match packet {
            Packet::Rx { frame, timestamp } => ReceiveOutcome::Frame { frame, wall_us: self.wall_us_for(timestamp, received_at) },
            Packet::Echo { marker, timestamp } => {
                let ack_wall_us = self.wall_us_for(timestamp, received_at);
                match self.echo.take(marker) {
                    Some((frame, sent_wall_us)) => ReceiveOutcome::Echo { frame, sent_wall_us, ack_wall_us },
                    None => ReceiveOutcome::Timeout,
                }
            }
            Packet::Error { report, timestamp } => {
                if report.app_flags.contains(AppErrorFlags::TX_FIFO_OVERFLOW) {
                    self.tx_overflow_latched = true;
                }
                ReceiveOutcome::Error { report, wall_us: self.wall_us_for(timestamp, received_at) }
            }
            Packet::Busload { percent } => ReceiveOutcome::Busload { percent, wall_us: self.host_clock.wall_us_for_instant(received_at) },
        }
    }
}

fn encode_bit_timing(timing: &BitTiming) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&timing.brp.to_le_bytes());
    out[4..8].copy_from_slice(&timing.seg1.to_le_bytes());
    out[8..12].copy_from_slice(&timing.seg2.to_le_bytes());
    out[12..16].copy_from_slice(&timing.sjw.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::VendorInterface;
    use canstack_protocol::frame::FrameFlag;
    use embedded_can::{Id, StandardId};
    use std::sync::Mutex;

    struct FakeTransport {
        last_error_byte: Mutex<u8>,
        written: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self { last_error_byte: Mutex::new(0), written: Mutex::new(Vec::new()) }
        }
    }

    impl UsbTransport for FakeTransport {
        fn claim(&mut self, _interface: u8) -> Result<(), DriverError> {
            Ok(())
        }
        fn control_in(&self, request: u8, _value: u16, _index: u16, buf: &mut [u8]) -> Result<usize, DriverError> {
            if request == Request::GetLastError.code() {
                buf[0] = *self.last_error_byte.lock().unwrap();
            } else {
                buf.iter_mut().for_each(|b| *b = 0);
            }
            Ok(buf.len())
        }
        fn control_out(&self, _request: u8, _value: u16, _index: u16, _data: &[u8]) -> Result<usize, DriverError> {
            Ok(0)
        }
        fn bulk_read(&self, _endpoint: u8, _buf: &mut [u8], _timeout: Duration) -> Result<usize, DriverError> {
            std::thread::sleep(Duration::from_millis(5));
            Err(DriverError::Timeout)
        }
        fn bulk_write(&self, _endpoint: u8, data: &[u8]) -> Result<usize, DriverError> {
            self.written.lock().unwrap().push(data.to_vec());
            Ok(data.len())
        }
        fn class_out(&self, _request: u8, _value: u16, _index: u16, _data: &[u8]) -> Result<usize, DriverError> {
            Ok(0)
        }
        fn dfu_interface(&self) -> Option<u8> {
            None
        }
        fn close(&mut self) {}
    }

    fn handle() -> AdapterHandle<FakeTransport> {
        AdapterHandle::new(FakeTransport::new(), VendorInterface { interface: 0, in_ep: 0x81, out_ep: 0x01 })
    }

    #[test]
    fn control_out_checked_maps_nonzero_last_error_to_device_error() {
        let h = handle();
        *h.transport.last_error_byte.lock().unwrap() = ErrorCode::BaudrateNotSet as u8;
        let err = h.control_out_checked(Request::SetDeviceMode, 0, &[]).unwrap_err();
        assert!(matches!(err, DriverError::Device(ErrorCode::BaudrateNotSet)));
    }

    #[test]
    fn data_bitrate_derives_sjw_as_min_of_segments() {
        let h = handle();
        h.set_data_bitrate(2, 29, 10).unwrap();
        let written = h.transport.written.lock().unwrap();
        assert!(written.is_empty(), "bit timing goes out over control transfers, not bulk");
    }

    #[test]
    fn send_packet_assigns_increasing_markers() {
        let mut h = handle();
        h.extended_protocol = true;
        let id = Id::Standard(StandardId::new(0x100).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1]).unwrap();
        let (marker_a, _) = h.send_packet(frame).unwrap();
        let (marker_b, _) = h.send_packet(frame).unwrap();
        assert_eq!(marker_b, marker_a.wrapping_add(1));
    }

    #[test]
    fn send_packet_refuses_while_tx_overflow_is_latched() {
        let mut h = handle();
        h.extended_protocol = true;
        h.tx_overflow_latched = true;
        let id = Id::Standard(StandardId::new(0x100).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1]).unwrap();
        let err = h.send_packet(frame).unwrap_err();
        assert!(matches!(err, DriverError::Device(ErrorCode::TxBufferFull)));
        // the latch is consumed: the next submission goes through normally.
        h.send_packet(frame).unwrap();
    }

    #[test]
    fn error_report_with_tx_fifo_overflow_latches_future_sends() {
        let mut h = handle();
        h.extended_protocol = true;
        let report = ErrorReport { app_flags: AppErrorFlags::TX_FIFO_OVERFLOW, ..Default::default() };
        let outcome = h.to_outcome(Packet::Error { report, timestamp: None }, std::time::Instant::now());
        assert!(matches!(outcome, ReceiveOutcome::Error { .. }));
        assert!(h.tx_overflow_latched);
    }

    #[test]
    fn receive_times_out_when_nothing_arrives() {
        let mut h = handle();
        let outcome = h.receive(Duration::from_millis(10)).unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Timeout));
    }

    #[test]
    fn receive_surfaces_a_sticky_transport_error_once() {
        let mut h = handle();
        h.fifo.push(crate::fifo::Slot::transport_error(DriverError::Timeout, Instant::now()));
        let outcome = h.receive(Duration::from_millis(10)).unwrap();
        assert!(matches!(outcome, ReceiveOutcome::TransportError(DriverError::Timeout)));
        // consumed: the next receive sees nothing and times out normally.
        let outcome = h.receive(Duration::from_millis(10)).unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Timeout));
    }
}
