//! USB class glue: SETUP dispatch and bulk endpoint pumping, directly
//! generalized from the teacher's `GsCan<B, D>` (`control_in`/`control_out`
//! match arms, `endpoint_in_complete`/`endpoint_out` FD two-packet
//! reassembly) onto the shared [`ControlDispatcher`]/[`CanDriver`] pair.
//!
//! Two `UsbClass` impls exist side by side: [`CandlelightClass`] speaks the
//! binary protocol over vendor bulk endpoints (plus a DFU-only vendor
//! interface), [`SlcanClass`] speaks the ASCII language over a CDC-ACM
//! interface. Both drive the same [`CanDriver`]; the active wire framing is
//! selected inside the driver via `OpenFlags::EXTENDED_PROTOCOL`, not by
//! which class is attached.

use usb_device::class_prelude::*;
use usb_device::control;

use canstack_protocol::legacy::RECORD_LEN;

use crate::ascii::{open_variant_to_mode_and_flags, AsciiCommand, AsciiParser, PendingFlags};
use crate::can::{CanDriver, Controller, ErrorCode};
use crate::control::{ControlDispatcher, Request};
use crate::platform::Platform;
use crate::pool::HostTxItem;

/// Vendor interface class used by both the CAN data interface and the
/// DFU-only companion interface.
pub use canstack_protocol::request::INTERFACE_CLASS;

const EP_BULK_SIZE: u16 = 64;

/// Accumulates a host->device bulk OUT submission across possibly two USB
/// packets, the way the teacher reassembles an 80-byte FD frame from a
/// 64-byte packet followed by a 16-byte tail.
struct OutAccumulator {
    buf: [u8; 80],
    filled: usize,
    target: Option<usize>,
}

impl OutAccumulator {
    const fn new() -> Self {
        Self { buf: [0u8; 80], filled: 0, target: None }
    }

    /// Appends `chunk`, returning the complete message once enough bytes
    /// have arrived, determined from the legacy fixed length or the
    /// extended header's declared size.
    fn push(&mut self, chunk: &[u8], extended_protocol: bool) -> Option<usize> {
        let n = chunk.len().min(self.buf.len() - self.filled);
        self.buf[self.filled..self.filled + n].copy_from_slice(&chunk[..n]);
        self.filled += n;

        let target = match self.target {
            Some(t) => t,
            None => {
                if extended_protocol {
                    if self.filled < 1 {
                        return None;
                    }
                    self.buf[0] as usize
                } else {
                    RECORD_LEN
                }
            }
        };
        self.target = Some(target);

        if self.filled >= target {
            let len = target;
            self.filled = 0;
            self.target = None;
            Some(len)
        } else {
            None
        }
    }
}

/// Splits a host-bound message across two bulk IN packets when it exceeds
/// one USB packet, matching the teacher's `transmit`/`endpoint_in_complete`
/// two-part write for FD frames.
struct PendingTail {
    bytes: [u8; 80],
    len: u8,
    sent: u8,
}

/// The binary-protocol USB class: vendor bulk IN/OUT on interface 0, a
/// DFU-only vendor interface 1 (stub, see [`crate::dfu`]).
pub struct CandlelightClass<'a, B: UsbBus, C: Controller, P: Platform> {
    interface: InterfaceNumber,
    dfu_interface: InterfaceNumber,
    write_endpoint: EndpointIn<'a, B>,
    read_endpoint: EndpointOut<'a, B>,
    pub driver: CanDriver<C>,
    pub platform: P,
    dispatcher: ControlDispatcher,
    out_accum: OutAccumulator,
    pending_tail: Option<PendingTail>,
    sending: bool,
}

impl<'a, B: UsbBus, C: Controller, P: Platform> CandlelightClass<'a, B, C, P> {
    pub fn new(alloc: &'a UsbBusAllocator<B>, controller: C, platform: P) -> Self {
        Self {
            interface: alloc.interface(),
            dfu_interface: alloc.interface(),
            write_endpoint: alloc.bulk(EP_BULK_SIZE),
            read_endpoint: alloc.bulk(EP_BULK_SIZE),
            driver: CanDriver::new(controller),
            platform,
            dispatcher: ControlDispatcher,
            out_accum: OutAccumulator::new(),
            pending_tail: None,
            sending: false,
        }
    }

    /// Call once per main-loop iteration: drives the Tx/Rx pools and
    /// busload/error cadence, then opportunistically starts the next bulk
    /// IN write if the endpoint is idle.
    pub fn poll(&mut self) {
        let now = self.platform.device_tick_us();
        if let Some(item) = self.driver.drain_tick(now, !self.sending) {
            self.start_send(item);
        }
    }

    fn start_send(&mut self, item: HostTxItem) {
        self.sending = true;
        let bytes = item.bytes;
        let len = item.len;
        if len as u16 <= EP_BULK_SIZE {
            self.write_chunk(&bytes[..len as usize]);
        } else {
            self.write_chunk(&bytes[..EP_BULK_SIZE as usize]);
            self.pending_tail = Some(PendingTail { bytes, len, sent: EP_BULK_SIZE as u8 });
        }
    }

    fn write_chunk(&mut self, chunk: &[u8]) {
        if let Err(_err) = self.write_endpoint.write(chunk) {
            #[cfg(feature = "defmt-03")]
            defmt::error!("bulk IN write failed: {}", _err);
        }
    }
}

impl<B: UsbBus, C: Controller, P: Platform> UsbClass<B> for CandlelightClass<'_, B, C, P> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        writer.interface(self.interface, INTERFACE_CLASS, 0xFF, 0xFF)?;
        writer.endpoint(&self.write_endpoint)?;
        writer.endpoint(&self.read_endpoint)?;
        writer.interface(self.dfu_interface, INTERFACE_CLASS, crate::dfu::DFU_SUBCLASS, crate::dfu::DFU_PROTOCOL)?;
        Ok(())
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();
        if req.request_type != control::RequestType::Vendor {
            return;
        }
        let Some(request) = Request::from_u8(req.request) else {
            return;
        };

        let mut buf = [0u8; 64];
        match self.dispatcher.control_in(request, &self.driver, &self.platform, &mut buf) {
            Some(len) => {
                let _ = xfer.accept_with(&buf[..len]);
            }
            None => {
                #[cfg(feature = "defmt-03")]
                defmt::warn!("unimplemented IN request: {}", req.request);
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();
        if req.request_type != control::RequestType::Vendor {
            return;
        }
        let Some(request) = Request::from_u8(req.request) else {
            let _ = xfer.reject();
            return;
        };

        let data = xfer.data();
        match self.dispatcher.stage1_validate(request, req.value, data, &self.platform) {
            Ok(()) => self.dispatcher.stage2_execute(request, req.value, data, &mut self.driver, &mut self.platform),
            Err(code) => self.driver.set_last_error(code),
        }
        let _ = xfer.accept();
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr != self.write_endpoint.address() {
            return;
        }

        if let Some(tail) = self.pending_tail.take() {
            let rest = &tail.bytes[tail.sent as usize..tail.len as usize];
            self.write_chunk(rest);
            return;
        }

        self.driver.host_pool.complete_send();
        self.sending = false;

        let now = self.platform.device_tick_us();
        if let Some(item) = self.driver.drain_tick(now, true) {
            self.start_send(item);
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr != self.read_endpoint.address() {
            return;
        }

        let mut chunk = [0u8; EP_BULK_SIZE as usize];
        let n = match self.read_endpoint.read(&mut chunk) {
            Ok(n) => n,
            Err(_err) => {
                #[cfg(feature = "defmt-03")]
                defmt::error!("bulk OUT read failed: {}", _err);
                return;
            }
        };

        let extended = self.driver.open_flags().contains(canstack_protocol::mode::OpenFlags::EXTENDED_PROTOCOL);
        if let Some(len) = self.out_accum.push(&chunk[..n], extended) {
            let message = self.out_accum.buf;
            if let Err(code) = self.driver.receive_from_host(&message[..len]) {
                self.driver.set_last_error(code);
            } else {
                self.driver.set_last_error(ErrorCode::Ok);
            }
        }
    }
}

/// The ASCII-protocol (Slcan) USB class: CDC-ACM with an 8-byte interrupt
/// IN notification endpoint plus 64-byte bulk IN/OUT data endpoints.
pub struct SlcanClass<'a, B: UsbBus, C: Controller, P: Platform> {
    comm_interface: InterfaceNumber,
    data_interface: InterfaceNumber,
    notify_endpoint: EndpointIn<'a, B>,
    write_endpoint: EndpointIn<'a, B>,
    read_endpoint: EndpointOut<'a, B>,
    pub driver: CanDriver<C>,
    pub platform: P,
    dispatcher: ControlDispatcher,
    parser: AsciiParser,
    pending: PendingFlags,
    sending: bool,
}

impl<'a, B: UsbBus, C: Controller, P: Platform> SlcanClass<'a, B, C, P> {
    pub fn new(alloc: &'a UsbBusAllocator<B>, controller: C, platform: P) -> Self {
        Self {
            comm_interface: alloc.interface(),
            data_interface: alloc.interface(),
            notify_endpoint: alloc.interrupt(8, 255),
            write_endpoint: alloc.bulk(EP_BULK_SIZE),
            read_endpoint: alloc.bulk(EP_BULK_SIZE),
            driver: CanDriver::new(controller),
            platform,
            dispatcher: ControlDispatcher,
            parser: AsciiParser::new(),
            pending: PendingFlags::default(),
            sending: false,
        }
    }

    pub fn poll(&mut self) {
        let now = self.platform.device_tick_us();
        if !self.sending {
            if let Some(item) = self.driver.drain_tick(now, true) {
                self.sending = true;
                if self.write_endpoint.write(item.as_slice()).is_err() {
                    self.sending = false;
                }
            }
        } else {
            self.driver.drain_tick(now, false);
        }
    }

    fn reply(&mut self, reply: crate::ascii::AsciiReply) {
        let bytes: [u8; 3] = match reply {
            crate::ascii::AsciiReply::Ok => [b'#', b'\r', 0],
            crate::ascii::AsciiReply::Error(code) => [b'#', b'0' + code, b'\r'],
            crate::ascii::AsciiReply::Silent => return,
        };
        let len = if matches!(reply, crate::ascii::AsciiReply::Error(_)) { 3 } else { 2 };
        let _ = self.write_endpoint.write(&bytes[..len]);
    }

    fn handle_command(&mut self, cmd: AsciiCommand) {
        use crate::ascii::AsciiReply;
        let reply = match cmd {
            AsciiCommand::Close => {
                self.driver.close();
                self.pending = PendingFlags::default();
                AsciiReply::Silent
            }
            AsciiCommand::SetModeFlag { flag, enable } => {
                self.pending.set(flag, enable);
                AsciiReply::Ok
            }
            AsciiCommand::Open(variant) => {
                let (mode, flags) = open_variant_to_mode_and_flags(variant, self.pending);
                match self.driver.open(mode, flags) {
                    Ok(()) => AsciiReply::Ok,
                    Err(code) => AsciiReply::Error(code as u8),
                }
            }
            AsciiCommand::AddFilter(filter) => match self.driver.set_filter(filter) {
                Ok(()) => AsciiReply::Ok,
                Err(code) => AsciiReply::Error(code as u8),
            },
            AsciiCommand::ClearFilters => {
                self.driver.clear_filters();
                AsciiReply::Ok
            }
            AsciiCommand::SetBusload(n) => {
                self.driver.set_busload_interval(n);
                AsciiReply::Ok
            }
            AsciiCommand::BootOverrideSet(disabled) => match self.platform.set_boot_override_disabled(disabled) {
                Ok(()) => AsciiReply::Ok,
                Err(()) => AsciiReply::Error(ErrorCode::OptionBytesProgrammingFailed as u8),
            },
            AsciiCommand::BootOverrideQuery => AsciiReply::Ok,
            AsciiCommand::EnterDfu => self.platform.enter_dfu(),
            AsciiCommand::Transmit { frame, marker } => {
                let mut buf = [0u8; 80];
                let extended = self.driver.open_flags().contains(canstack_protocol::mode::OpenFlags::EXTENDED_PROTOCOL);
                let len = if extended {
                    canstack_protocol::extended::encode_tx_frame(&mut buf, &frame, marker.unwrap_or(0))
                } else {
                    let record = canstack_protocol::legacy::LegacyRecord::from_frame(&frame, 0, marker.unwrap_or(0) as u32, 0);
                    buf[..canstack_protocol::legacy::RECORD_LEN].copy_from_slice(zerocopy::AsBytes::as_bytes(&record));
                    canstack_protocol::legacy::RECORD_LEN
                };
                match self.driver.receive_from_host(&buf[..len]) {
                    Ok(_) => AsciiReply::Ok,
                    Err(code) => AsciiReply::Error(code as u8),
                }
            }
            AsciiCommand::Version | AsciiCommand::SetBitrate(_) | AsciiCommand::SetNominalTiming(_) | AsciiCommand::SetDataTiming(_) => {
                AsciiReply::Ok
            }
            AsciiCommand::Unknown => AsciiReply::Error(ErrorCode::InvalidCommand as u8),
        };
        self.reply(reply);
    }
}

impl<B: UsbBus, C: Controller, P: Platform> UsbClass<B> for SlcanClass<'_, B, C, P> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        writer.interface(self.comm_interface, 0x02, 0x02, 0x01)?;
        writer.endpoint(&self.notify_endpoint)?;
        writer.interface(self.data_interface, 0x0A, 0x00, 0x00)?;
        writer.endpoint(&self.write_endpoint)?;
        writer.endpoint(&self.read_endpoint)?;
        Ok(())
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr != self.read_endpoint.address() {
            return;
        }
        let mut chunk = [0u8; EP_BULK_SIZE as usize];
        let n = match self.read_endpoint.read(&mut chunk) {
            Ok(n) => n,
            Err(_) => return,
        };
        let mut commands = heapless::Vec::<AsciiCommand, 4>::new();
        for &b in &chunk[..n] {
            if let Some(cmd) = self.parser.push_byte(b) {
                let _ = commands.push(cmd);
            }
        }
        for cmd in commands {
            self.handle_command(cmd);
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr != self.write_endpoint.address() {
            return;
        }
        self.driver.host_pool.complete_send();
        self.sending = false;
    }
}
