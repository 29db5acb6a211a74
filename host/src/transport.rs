//! USB enumeration/open/close (§4.6, §6), grounded on
//! `canstack_protocol::identifier`'s VID/PID table (shared with the
//! device-side descriptor builder) and on `zilogic-systems-cantact`'s
//! device-enumeration pattern.

use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

use canstack_protocol::identifier::CANDLELIGHT_CLASS_IDS;

use crate::error::DriverError;

#[derive(Debug, Clone, Copy)]
pub struct AdapterInfo {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// The vendor-class interface and the bulk endpoints on it, discovered by
/// walking the active config descriptor rather than assuming fixed endpoint
/// numbers, the way `win_can_utils`'s `find_gs_usb_interface` does over raw
/// libusb (here expressed through `rusb`'s safe descriptor API).
#[derive(Debug, Clone, Copy)]
pub struct VendorInterface {
    pub interface: u8,
    pub in_ep: u8,
    pub out_ep: u8,
}

fn find_vendor_interface<T: UsbContext>(device: &rusb::Device<T>) -> Result<VendorInterface, DriverError> {
    let config = device.active_config_descriptor()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() != canstack_protocol::request::INTERFACE_CLASS {
                continue;
            }
            // The DFU-only companion interface shares the vendor class; skip
            // it here so it's never mistaken for the CAN data interface.
            if descriptor.sub_class_code() == canstack_protocol::request::DFU_SUBCLASS {
                continue;
            }
            let mut in_ep = None;
            let mut out_ep = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != rusb::TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    rusb::Direction::In => in_ep = Some(endpoint.address()),
                    rusb::Direction::Out => out_ep = Some(endpoint.address()),
                }
            }
            if let (Some(in_ep), Some(out_ep)) = (in_ep, out_ep) {
                return Ok(VendorInterface { interface: descriptor.interface_number(), in_ep, out_ep });
            }
        }
    }
    Err(DriverError::NotFound)
}

/// Finds the DFU-only companion interface's number, for issuing the
/// standard DFU_DETACH request. Returns `None` rather than an error since a
/// missing DFU interface shouldn't block normal CAN operation.
fn find_dfu_interface<T: UsbContext>(device: &rusb::Device<T>) -> Option<u8> {
    let config = device.active_config_descriptor().ok()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() == canstack_protocol::request::INTERFACE_CLASS
                && descriptor.sub_class_code() == canstack_protocol::request::DFU_SUBCLASS
            {
                return Some(descriptor.interface_number());
            }
        }
    }
    None
}

/// The seam the rest of `host` talks through, so the bulk-reader thread and
/// the client API can be exercised against a fake in tests. `Sync` because
/// the reader thread issues bulk reads concurrently with control transfers
/// the client API makes from the caller's thread.
pub trait UsbTransport: Send + Sync {
    fn claim(&mut self, interface: u8) -> Result<(), DriverError>;
    fn control_in(&self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize, DriverError>;
    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<usize, DriverError>;
    /// `timeout = Duration::ZERO` blocks until data arrives, matching the
    /// literal idiom used by `win_can_utils`'s `UsbEventLoop::run`.
    fn bulk_read(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, DriverError>;
    fn bulk_write(&self, endpoint: u8, data: &[u8]) -> Result<usize, DriverError>;
    /// Issues a USB class request (as opposed to `control_out`'s vendor
    /// requests), for the DFU-only companion interface's `DFU_DETACH`.
    fn class_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<usize, DriverError>;
    /// The DFU-only companion interface's number, if the device exposes one.
    fn dfu_interface(&self) -> Option<u8>;
    fn close(&mut self);
}

/// Lists every attached device whose VID/PID appears in
/// [`CANDLELIGHT_CLASS_IDS`].
pub fn enumerate() -> Result<Vec<AdapterInfo>, DriverError> {
    let context = Context::new()?;
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let pair = (descriptor.vendor_id(), descriptor.product_id());
        if CANDLELIGHT_CLASS_IDS.contains(&pair) {
            found.push(AdapterInfo {
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: pair.0,
                product_id: pair.1,
            });
        }
    }
    Ok(found)
}

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// `UsbTransport` over `rusb`'s synchronous libusb wrapper.
pub struct RusbTransport {
    handle: DeviceHandle<Context>,
    vendor_interface: VendorInterface,
    dfu_interface: Option<u8>,
}

impl RusbTransport {
    pub fn open(info: &AdapterInfo) -> Result<Self, DriverError> {
        let context = Context::new()?;
        for device in context.devices()?.iter() {
            if device.bus_number() == info.bus && device.address() == info.address {
                let vendor_interface = find_vendor_interface(&device)?;
                let dfu_interface = find_dfu_interface(&device);
                let handle = device.open()?;
                return Ok(Self { handle, vendor_interface, dfu_interface });
            }
        }
        Err(DriverError::NotFound)
    }

    /// The vendor interface and its bulk endpoints, for the caller to claim
    /// and to read/write against.
    pub fn vendor_interface(&self) -> VendorInterface {
        self.vendor_interface
    }

    fn vendor_out_type() -> u8 {
        rusb::request_type(rusb::Direction::Out, rusb::RequestType::Vendor, rusb::Recipient::Interface)
    }

    fn vendor_in_type() -> u8 {
        rusb::request_type(rusb::Direction::In, rusb::RequestType::Vendor, rusb::Recipient::Interface)
    }

    fn class_out_type() -> u8 {
        rusb::request_type(rusb::Direction::Out, rusb::RequestType::Class, rusb::Recipient::Interface)
    }
}

impl UsbTransport for RusbTransport {
    fn claim(&mut self, interface: u8) -> Result<(), DriverError> {
        self.handle.claim_interface(interface)?;
        Ok(())
    }

    fn control_in(&self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize, DriverError> {
        let n = self.handle.read_control(Self::vendor_in_type(), request, value, index, buf, CONTROL_TIMEOUT)?;
        Ok(n)
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<usize, DriverError> {
        let n = self.handle.write_control(Self::vendor_out_type(), request, value, index, data, CONTROL_TIMEOUT)?;
        Ok(n)
    }

    fn bulk_read(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, DriverError> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }

    fn bulk_write(&self, endpoint: u8, data: &[u8]) -> Result<usize, DriverError> {
        Ok(self.handle.write_bulk(endpoint, data, CONTROL_TIMEOUT)?)
    }

    fn class_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<usize, DriverError> {
        let n = self.handle.write_control(Self::class_out_type(), request, value, index, data, CONTROL_TIMEOUT)?;
        Ok(n)
    }

    fn dfu_interface(&self) -> Option<u8> {
        self.dfu_interface
    }

    fn close(&mut self) {
        let _ = self.handle.release_interface(self.vendor_interface.interface);
    }
}
