#![cfg_attr(not(test), no_std)]

//! Device-side USB/CAN-FD transport engine: the pooled Tx/Rx frame
//! arenas (§4.2), the CAN driver state machine (§4.3), the binary and
//! ASCII control surfaces (§4.4), and the USB class glue tying both
//! wire protocols to the same driver instance (§4.5).

pub mod ascii;
pub mod can;
pub mod control;
pub mod dfu;
pub mod echo;
pub mod platform;
pub mod pool;
pub mod usb;

pub use can::{CanDriver, Controller, ErrorCode};
pub use control::{ControlDispatcher, Request};
pub use platform::{BoardInfo, Platform};
pub use usb::{CandlelightClass, SlcanClass, INTERFACE_CLASS};
