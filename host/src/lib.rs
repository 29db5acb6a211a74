//! Host-side USB client driver for the CAN/CAN-FD adapter: enumeration and
//! transfer plumbing in [`transport`], the bulk-IN pump thread in
//! [`reader`], the bounded RX buffer in [`fifo`], wire decoding in
//! [`decode`], Tx-echo correlation in [`echo`], timestamp reconstruction in
//! [`timestamp`], and the client-facing surface in [`api`].

pub mod api;
pub mod decode;
pub mod echo;
pub mod error;
pub mod fifo;
pub mod reader;
pub mod timestamp;
pub mod transport;

pub use api::{AdapterHandle, ReceiveOutcome};
pub use canstack_protocol::Frame;
pub use error::DriverError;
pub use transport::AdapterInfo;
