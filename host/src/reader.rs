//! Bulk-IN pump thread (§4.6, §5), translating `win_can_utils`'s async
//! `UsbEventLoop::run` arm-next-read idiom into a blocking `std::thread`:
//! a `Duration::ZERO` read blocks until a packet arrives, so the thread
//! never busy-polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::fifo::{Fifo, Slot, SLOT_LEN};
use crate::transport::UsbTransport;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Owns the background thread reading the bulk IN endpoint into a [`Fifo`].
/// Dropping it signals the thread to stop and joins it.
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub fn spawn(transport: Arc<dyn UsbTransport>, endpoint: u8, fifo: Arc<Fifo>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let join = thread::Builder::new()
            .name("canstack-bulk-in".into())
            .spawn(move || run(transport, endpoint, fifo, stop_for_thread))
            .expect("spawn bulk-in reader thread");
        Self { stop, join: Some(join) }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run(transport: Arc<dyn UsbTransport>, endpoint: u8, fifo: Arc<Fifo>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let mut bytes = [0u8; SLOT_LEN];
        match transport.bulk_read(endpoint, &mut bytes, Duration::ZERO) {
            Ok(len) => {
                fifo.push(Slot::data(bytes, len as u8, Instant::now()));
            }
            Err(e) => {
                log::debug!("bulk-in read failed, retrying: {e}");
                fifo.push(Slot::transport_error(e, Instant::now()));
                thread::sleep(RETRY_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use std::sync::Mutex;

    struct FakeTransport {
        replies: Mutex<Vec<Vec<u8>>>,
    }

    impl UsbTransport for FakeTransport {
        fn claim(&mut self, _interface: u8) -> Result<(), DriverError> {
            Ok(())
        }
        fn control_in(&self, _r: u8, _v: u16, _i: u16, _b: &mut [u8]) -> Result<usize, DriverError> {
            Ok(0)
        }
        fn control_out(&self, _r: u8, _v: u16, _i: u16, _d: &[u8]) -> Result<usize, DriverError> {
            Ok(0)
        }
        fn bulk_read(&self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize, DriverError> {
            let mut replies = self.replies.lock().unwrap();
            if let Some(next) = replies.pop() {
                buf[..next.len()].copy_from_slice(&next);
                Ok(next.len())
            } else {
                std::thread::sleep(Duration::from_millis(5));
                Err(DriverError::Timeout)
            }
        }
        fn bulk_write(&self, _endpoint: u8, _data: &[u8]) -> Result<usize, DriverError> {
            Ok(0)
        }
        fn class_out(&self, _request: u8, _value: u16, _index: u16, _data: &[u8]) -> Result<usize, DriverError> {
            Ok(0)
        }
        fn dfu_interface(&self) -> Option<u8> {
            None
        }
        fn close(&mut self) {}
    }

    #[test]
    fn transport_error_is_pushed_as_an_error_slot() {
        struct AlwaysFailing;
        impl UsbTransport for AlwaysFailing {
            fn claim(&mut self, _interface: u8) -> Result<(), DriverError> {
                Ok(())
            }
            fn control_in(&self, _r: u8, _v: u16, _i: u16, _b: &mut [u8]) -> Result<usize, DriverError> {
                Ok(0)
            }
            fn control_out(&self, _r: u8, _v: u16, _i: u16, _d: &[u8]) -> Result<usize, DriverError> {
                Ok(0)
            }
            fn bulk_read(&self, _endpoint: u8, _buf: &mut [u8], _timeout: Duration) -> Result<usize, DriverError> {
                Err(DriverError::Usb(rusb::Error::NoDevice))
            }
            fn bulk_write(&self, _endpoint: u8, _data: &[u8]) -> Result<usize, DriverError> {
                Ok(0)
            }
            fn class_out(&self, _request: u8, _value: u16, _index: u16, _data: &[u8]) -> Result<usize, DriverError> {
                Ok(0)
            }
            fn dfu_interface(&self) -> Option<u8> {
                None
            }
            fn close(&mut self) {}
        }

        let transport: Arc<dyn UsbTransport> = Arc::new(AlwaysFailing);
        let fifo = Arc::new(Fifo::new());
        let handle = ReaderHandle::spawn(transport, 0x81, fifo.clone());
        let slot = fifo.pop(Duration::from_millis(500)).expect("reader should push an error slot");
        assert!(matches!(slot.error, Some(DriverError::Usb(rusb::Error::NoDevice))));
        drop(handle);
    }

    #[test]
    fn pushed_reads_land_in_the_fifo() {
        let transport: Arc<dyn UsbTransport> = Arc::new(FakeTransport {
            replies: Mutex::new(vec![vec![0xAAu8; 16]]),
        });
        let fifo = Arc::new(Fifo::new());
        let handle = ReaderHandle::spawn(transport, 0x81, fifo.clone());
        let slot = fifo.pop(Duration::from_millis(500)).expect("reader should push a slot");
        assert_eq!(slot.len, 16);
        assert_eq!(slot.bytes[0], 0xAA);
        drop(handle);
    }
}
