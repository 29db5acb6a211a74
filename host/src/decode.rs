//! Maps a raw bulk-IN record, in either wire framing, to one [`Packet`]
//! the rest of `host` works with, in `win_can_utils`'s plain
//! `Display`-per-type style rather than a templating crate.

use std::fmt;

use canstack_protocol::error_report::ErrorReport;
use canstack_protocol::extended::{self, Message};
use canstack_protocol::legacy::LegacyRecord;
use canstack_protocol::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    Unsupported,
    BadFrame,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "record shorter than its declared size"),
            DecodeError::Unsupported => write!(f, "message type not meaningful on the host-bound direction"),
            DecodeError::BadFrame => write!(f, "frame fields failed validation"),
        }
    }
}

/// One decoded bulk-IN record, independent of which wire framing produced it.
#[derive(Debug, Clone)]
pub enum Packet {
    Rx { frame: Frame, timestamp: Option<u32> },
    Echo { marker: u8, timestamp: Option<u32> },
    Error { report: ErrorReport, timestamp: Option<u32> },
    Busload { percent: u8 },
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Rx { frame, .. } => write!(f, "rx {} [{}] {}", id_string(frame), frame.len(), hex(frame.data())),
            Packet::Echo { marker, .. } => write!(f, "echo marker={marker}"),
            Packet::Error { report, .. } => write!(f, "error {report}"),
            Packet::Busload { percent } => write!(f, "busload {percent}%"),
        }
    }
}

fn id_string(frame: &Frame) -> String {
    if frame.is_extended() {
        format!("{:08X}", frame.raw_can_id() & 0x1FFF_FFFF)
    } else {
        format!("{:03X}", frame.raw_can_id() & 0x7FF)
    }
}

/// Formats a payload as space-separated hex bytes, `win_can_utils`-style.
pub fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

/// Decodes one extended-framing record.
pub fn decode_extended(buf: &[u8], timestamps_enabled: bool) -> Result<Packet, DecodeError> {
    let message = extended::decode(buf, timestamps_enabled).map_err(|e| match e {
        extended::DecodeError::Truncated => DecodeError::Truncated,
        extended::DecodeError::UnknownType => DecodeError::Unsupported,
        extended::DecodeError::BadFrame => DecodeError::BadFrame,
    })?;
    match message {
        Message::RxFrame { frame } => Ok(Packet::Rx { timestamp: frame.timestamp, frame }),
        Message::TxEcho { marker, timestamp } => Ok(Packet::Echo { marker, timestamp }),
        Message::Error { report, timestamp } => Ok(Packet::Error { report, timestamp }),
        Message::Busload { percent } => Ok(Packet::Busload { percent }),
        Message::TxFrame { .. } => Err(DecodeError::Unsupported),
    }
}

/// Decodes one fixed-80-byte legacy record.
pub fn decode_legacy(buf: &[u8]) -> Result<Packet, DecodeError> {
    if buf.len() < canstack_protocol::legacy::RECORD_LEN {
        return Err(DecodeError::Truncated);
    }
    let record = <LegacyRecord as zerocopy::FromBytes>::read_from(&buf[..canstack_protocol::legacy::RECORD_LEN])
        .ok_or(DecodeError::Truncated)?;

    if record.is_error_report() {
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&record.payload[..8]);
        let report = ErrorReport::from_bytes(payload);
        return Ok(Packet::Error { report, timestamp: Some(record.timestamp_us) });
    }

    let frame = record.to_frame().map_err(|_| DecodeError::BadFrame)?;
    if record.is_rx() {
        Ok(Packet::Rx { frame, timestamp: Some(record.timestamp_us) })
    } else {
        // legacy's fake echo: the host's submitted marker rides in echo_id.
        Ok(Packet::Echo { marker: record.echo_id as u8, timestamp: Some(record.timestamp_us) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canstack_protocol::frame::FrameFlag;
    use embedded_can::{Id, StandardId};

    #[test]
    fn extended_rx_frame_decodes_to_packet() {
        let id = Id::Standard(StandardId::new(0x123).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1, 2, 3]).unwrap();
        let mut buf = [0u8; extended::MAX_MESSAGE_LEN];
        let len = extended::encode_rx_frame(&mut buf, &frame, None);
        match decode_extended(&buf[..len], false).unwrap() {
            Packet::Rx { frame: decoded, .. } => assert_eq!(decoded.data(), &[1, 2, 3]),
            _ => panic!("expected Rx"),
        }
    }

    #[test]
    fn legacy_rx_record_decodes_to_packet() {
        let id = Id::Standard(StandardId::new(0x7E0).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[9, 9]).unwrap();
        let record = LegacyRecord::from_frame(&frame, 0, canstack_protocol::legacy::ECHO_ID_RX, 500);
        let bytes = zerocopy::AsBytes::as_bytes(&record);
        match decode_legacy(bytes).unwrap() {
            Packet::Rx { frame: decoded, timestamp } => {
                assert_eq!(decoded.data(), &[9, 9]);
                assert_eq!(timestamp, Some(500));
            }
            _ => panic!("expected Rx"),
        }
    }

    #[test]
    fn legacy_non_rx_record_decodes_to_echo() {
        let id = Id::Standard(StandardId::new(1).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[]).unwrap();
        let record = LegacyRecord::from_frame(&frame, 0, 42, 0);
        let bytes = zerocopy::AsBytes::as_bytes(&record);
        match decode_legacy(bytes).unwrap() {
            Packet::Echo { marker, .. } => assert_eq!(marker, 42),
            _ => panic!("expected Echo"),
        }
    }

    #[test]
    fn hex_formats_uppercase_pairs() {
        assert_eq!(hex(&[0x0a, 0xff]), "0A FF");
    }
}
