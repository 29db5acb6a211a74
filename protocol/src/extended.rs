//! Extended (compact, variable-length) framing (§4.1).
//!
//! A two-byte header `{size, msg_type}` precedes a per-type body. `size`
//! covers the header, the typed body up to the data slice, and the data
//! slice itself; the trailing `[timestamp]` field is present only when
//! firmware timestamps are enabled (§8 length-integrity property).

use crate::error_report::ErrorReport;
use crate::frame::{Frame, FrameFlag, IdFlag};

pub const HEADER_LEN: usize = 2;

/// Largest encoded message: `RxFrame` with timestamp and a 64-byte payload.
pub const MAX_MESSAGE_LEN: usize = HEADER_LEN + 1 + 4 + 4 + 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    TxFrame = 0,
    TxEcho = 1,
    RxFrame = 2,
    Error = 3,
    String = 4,
    Busload = 5,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => MessageType::TxFrame,
            1 => MessageType::TxEcho,
            2 => MessageType::RxFrame,
            3 => MessageType::Error,
            4 => MessageType::String,
            5 => MessageType::Busload,
            _ => return None,
        })
    }
}

/// A decoded extended-framing message.
#[derive(Debug, Clone)]
pub enum Message {
    TxFrame { frame: Frame, marker: u8 },
    TxEcho { marker: u8, timestamp: Option<u32> },
    RxFrame { frame: Frame },
    Error { report: ErrorReport, timestamp: Option<u32> },
    Busload { percent: u8 },
}

/// Errors produced while decoding an extended-framing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    UnknownType,
    BadFrame,
}

impl From<crate::frame::FrameError> for DecodeError {
    fn from(_: crate::frame::FrameError) -> Self {
        DecodeError::BadFrame
    }
}

fn put_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

/// For a remote frame the DLC rides in the single payload byte (§4.1); for
/// a data frame it's derived from the payload length as usual.
fn remote_aware_dlc<'a>(can_id: u32, payload: &'a [u8]) -> Result<(u8, &'a [u8]), DecodeError> {
    if can_id & IdFlag::REMOTE.bits() != 0 {
        let dlc = *payload.first().ok_or(DecodeError::Truncated)?;
        Ok((dlc, &[]))
    } else {
        let dlc = crate::dlc::byte_count_to_dlc(payload.len()).ok_or(DecodeError::BadFrame)?;
        Ok((dlc, payload))
    }
}

/// Encodes a host->device `TxFrame` message. Returns the number of bytes
/// written to `out`. Remote frames carry no data bytes on the bus, so the
/// DLC nibble rides in the single payload byte instead (mirrors legacy
/// framing's explicit `dlc` field).
pub fn encode_tx_frame(out: &mut [u8], frame: &Frame, marker: u8) -> usize {
    let body_fixed = 1 + 4 + 1; // flags + can_id + marker
    let payload_len = if frame.is_remote() { 1 } else { frame.data().len() };
    let size = HEADER_LEN + body_fixed + payload_len;
    out[0] = size as u8;
    out[1] = MessageType::TxFrame as u8;
    out[2] = frame.flags().bits();
    put_u32(out, 3, frame.raw_can_id());
    out[7] = marker;
    if frame.is_remote() {
        out[8] = frame.dlc();
    } else {
        out[8..8 + payload_len].copy_from_slice(frame.data());
    }
    size
}

/// Encodes a device->host `RxFrame` message. Same remote-frame DLC-byte
/// handling as [`encode_tx_frame`].
pub fn encode_rx_frame(out: &mut [u8], frame: &Frame, timestamp: Option<u32>) -> usize {
    let mut offset = HEADER_LEN;
    out[offset] = frame.flags().bits();
    offset += 1;
    put_u32(out, offset, frame.raw_can_id());
    offset += 4;
    if let Some(ts) = timestamp {
        put_u32(out, offset, ts);
        offset += 4;
    }
    if frame.is_remote() {
        out[offset] = frame.dlc();
        offset += 1;
    } else {
        let data = frame.data();
        out[offset..offset + data.len()].copy_from_slice(data);
        offset += data.len();
    }
    out[0] = offset as u8;
    out[1] = MessageType::RxFrame as u8;
    offset
}

/// Encodes a device->host `TxEcho` message.
pub fn encode_tx_echo(out: &mut [u8], marker: u8, timestamp: Option<u32>) -> usize {
    let mut offset = HEADER_LEN;
    out[offset] = marker;
    offset += 1;
    if let Some(ts) = timestamp {
        put_u32(out, offset, ts);
        offset += 4;
    }
    out[0] = offset as u8;
    out[1] = MessageType::TxEcho as u8;
    offset
}

/// Encodes a device->host `Error` message.
pub fn encode_error(out: &mut [u8], report: &ErrorReport, err_id: u32, timestamp: Option<u32>) -> usize {
    let mut offset = HEADER_LEN;
    put_u32(out, offset, err_id);
    offset += 4;
    out[offset..offset + 8].copy_from_slice(&report.to_bytes());
    offset += 8;
    if let Some(ts) = timestamp {
        put_u32(out, offset, ts);
        offset += 4;
    }
    out[0] = offset as u8;
    out[1] = MessageType::Error as u8;
    offset
}

/// Encodes a device->host `Busload` message.
pub fn encode_busload(out: &mut [u8], percent: u8) -> usize {
    out[0] = (HEADER_LEN + 1) as u8;
    out[1] = MessageType::Busload as u8;
    out[2] = percent;
    HEADER_LEN + 1
}

/// Encodes a device->host `String` message.
pub fn encode_string(out: &mut [u8], ascii: &[u8]) -> usize {
    let size = HEADER_LEN + ascii.len();
    out[0] = size as u8;
    out[1] = MessageType::String as u8;
    out[HEADER_LEN..size].copy_from_slice(ascii);
    size
}

/// Decodes one message from `buf`. `buf` must contain at least the bytes
/// `header.size` declares. `timestamps_enabled` disambiguates the optional
/// trailing timestamp field the same way the active device mode does.
pub fn decode(buf: &[u8], timestamps_enabled: bool) -> Result<Message, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let size = buf[0] as usize;
    let msg_type = MessageType::from_u8(buf[1]).ok_or(DecodeError::UnknownType)?;
    if buf.len() < size {
        return Err(DecodeError::Truncated);
    }

    match msg_type {
        MessageType::TxFrame => {
            if size < HEADER_LEN + 5 {
                return Err(DecodeError::Truncated);
            }
            let flags = FrameFlag::from_bits_truncate(buf[2]);
            let can_id = get_u32(buf, 3);
            let marker = buf[7];
            let payload = &buf[8..size];
            let (dlc, data) = remote_aware_dlc(can_id, payload)?;
            let frame = Frame::from_wire(can_id, flags, dlc, data)?;
            Ok(Message::TxFrame { frame, marker })
        }
        MessageType::RxFrame => {
            if size < HEADER_LEN + 5 {
                return Err(DecodeError::Truncated);
            }
            let flags = FrameFlag::from_bits_truncate(buf[2]);
            let can_id = get_u32(buf, 3);
            let mut offset = HEADER_LEN + 5;
            if timestamps_enabled {
                offset += 4;
            }
            let payload = &buf[offset..size];
            let (dlc, data) = remote_aware_dlc(can_id, payload)?;
            let frame = Frame::from_wire(can_id, flags, dlc, data)?;
            Ok(Message::RxFrame { frame })
        }
        MessageType::TxEcho => {
            if size < HEADER_LEN + 1 {
                return Err(DecodeError::Truncated);
            }
            let marker = buf[2];
            let timestamp = if timestamps_enabled && size >= HEADER_LEN + 5 {
                Some(get_u32(buf, HEADER_LEN + 1))
            } else {
                None
            };
            Ok(Message::TxEcho { marker, timestamp })
        }
        MessageType::Error => {
            if size < HEADER_LEN + 12 {
                return Err(DecodeError::Truncated);
            }
            let err_id = get_u32(buf, HEADER_LEN);
            let mut report_bytes = [0u8; 8];
            report_bytes.copy_from_slice(&buf[HEADER_LEN + 4..HEADER_LEN + 12]);
            let mut report = ErrorReport::from_bytes(report_bytes);
            report.err_id = crate::error_report::ErrIdFlags::from_bits_truncate(err_id);
            let timestamp = if timestamps_enabled && size >= HEADER_LEN + 16 {
                Some(get_u32(buf, HEADER_LEN + 12))
            } else {
                None
            };
            Ok(Message::Error { report, timestamp })
        }
        MessageType::Busload => {
            if size < HEADER_LEN + 1 {
                return Err(DecodeError::Truncated);
            }
            Ok(Message::Busload { percent: buf[2] })
        }
        MessageType::String => Err(DecodeError::UnknownType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::{Id, StandardId};

    #[test]
    fn tx_frame_round_trips_without_timestamp() {
        let id = Id::Standard(StandardId::new(0x123).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1, 2, 3]).unwrap();
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let len = encode_tx_frame(&mut buf, &frame, 7);
        assert_eq!(buf[0] as usize, len);

        match decode(&buf[..len], false).unwrap() {
            Message::TxFrame { frame: decoded, marker } => {
                assert_eq!(marker, 7);
                assert_eq!(decoded.data(), frame.data());
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn rx_frame_size_accounts_for_timestamp_presence() {
        let id = Id::Standard(StandardId::new(0x7E8).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1, 2, 3]).unwrap();

        let mut buf_no_ts = [0u8; MAX_MESSAGE_LEN];
        let len_no_ts = encode_rx_frame(&mut buf_no_ts, &frame, None);

        let mut buf_ts = [0u8; MAX_MESSAGE_LEN];
        let len_ts = encode_rx_frame(&mut buf_ts, &frame, Some(42));

        assert_eq!(len_ts, len_no_ts + 4);
    }

    #[test]
    fn error_message_round_trips() {
        use crate::error_report::{AppErrorFlags, BusStatusFlags, ProtoErrFlags};
        let report = ErrorReport {
            bus_status: BusStatusFlags::BUS_BACK_ACTIVE,
            proto_err: ProtoErrFlags::empty(),
            app_flags: AppErrorFlags::RX_FAIL,
            tx_errors: 1,
            rx_errors: 2,
            err_id: crate::error_report::ErrIdFlags::empty(),
        };
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let len = encode_error(&mut buf, &report, 0x10, None);
        match decode(&buf[..len], false).unwrap() {
            Message::Error { report: decoded, timestamp } => {
                assert_eq!(timestamp, None);
                assert_eq!(decoded.tx_errors, 1);
                assert_eq!(decoded.rx_errors, 2);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn remote_tx_frame_round_trips_dlc_through_the_payload_byte() {
        let id = Id::Standard(StandardId::new(0x123).unwrap());
        let frame = Frame::new_remote(id, 8).unwrap();
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let len = encode_tx_frame(&mut buf, &frame, 3);

        match decode(&buf[..len], false).unwrap() {
            Message::TxFrame { frame: decoded, marker } => {
                assert_eq!(marker, 3);
                assert!(decoded.is_remote());
                assert!(decoded.data().is_empty());
                assert_eq!(decoded.dlc(), 8);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn remote_rx_frame_round_trips_dlc_through_the_payload_byte() {
        let id = Id::Standard(StandardId::new(0x456).unwrap());
        let frame = Frame::new_remote(id, 5).unwrap();
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let len = encode_rx_frame(&mut buf, &frame, Some(99));

        match decode(&buf[..len], true).unwrap() {
            Message::RxFrame { frame: decoded } => {
                assert!(decoded.is_remote());
                assert!(decoded.data().is_empty());
                assert_eq!(decoded.dlc(), 5);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn zero_busload_is_caller_responsibility_not_encoded_specially() {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let len = encode_busload(&mut buf, 0);
        match decode(&buf[..len], false).unwrap() {
            Message::Busload { percent } => assert_eq!(percent, 0),
            _ => panic!("wrong message type"),
        }
    }
}
