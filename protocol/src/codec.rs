//! Selects between the two wire framings behind one trait (§9 "two-protocol
//! dispatch"). The device and host each hold one codec value, chosen at
//! runtime from [`crate::mode::OpenFlags::EXTENDED_PROTOCOL`], and reject
//! incoming frames whose on-the-wire type disagrees with the active codec.

use crate::error_report::ErrorReport;
use crate::extended;
use crate::frame::Frame;
use crate::legacy::{LegacyRecord, ECHO_ID_RX, ERROR_SENTINEL_BIT};

/// Echo correlation token: a one-byte marker on extended framing, or the
/// host-assigned 32-bit `echo_id` echoed back verbatim on legacy framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoToken(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDecodeError {
    Truncated,
    BadFrame,
    NotATxFrame,
}

/// Common operations both framings must support, parameterized so that a
/// single dispatcher can hold `&dyn FrameCodec` chosen by the active mode.
pub trait FrameCodec {
    /// Encodes a bus-received frame as a device->host message. Returns the
    /// number of bytes written to `out`.
    fn encode_rx(&self, out: &mut [u8], frame: &Frame, channel: u8, timestamp: Option<u32>) -> usize;

    /// Encodes a Tx-echo/acknowledgement message.
    fn encode_tx_echo(&self, out: &mut [u8], token: EchoToken, timestamp: Option<u32>) -> usize;

    /// Encodes an error/bus-status report.
    fn encode_error(&self, out: &mut [u8], report: &ErrorReport, err_id: u32, timestamp: Option<u32>) -> usize;

    /// Decodes a host->device Tx submission.
    fn decode_tx(&self, buf: &[u8]) -> Result<(Frame, EchoToken), CodecDecodeError>;

    /// Upper bound on one encoded message, used to size transmit buffers.
    fn max_message_len(&self) -> usize;
}

/// Legacy fixed-80-byte framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyCodec;

impl FrameCodec for LegacyCodec {
    fn encode_rx(&self, out: &mut [u8], frame: &Frame, channel: u8, timestamp: Option<u32>) -> usize {
        let record = LegacyRecord::from_frame(frame, channel, ECHO_ID_RX, timestamp.unwrap_or(0));
        out[..crate::legacy::RECORD_LEN].copy_from_slice(zerocopy::AsBytes::as_bytes(&record));
        crate::legacy::RECORD_LEN
    }

    fn encode_tx_echo(&self, out: &mut [u8], token: EchoToken, timestamp: Option<u32>) -> usize {
        // The legacy protocol has no dedicated echo message: it re-sends the
        // original record with the host's echo_id intact. Callers that hold
        // the original frame should call `encode_rx`-style logic themselves;
        // this path covers callers that only have the marker, producing a
        // zero-length placeholder record carrying just the echo id.
        let mut record = LegacyRecord::from_frame(
            &Frame::new_remote(embedded_can::Id::Standard(embedded_can::StandardId::new(0).unwrap()), 0).unwrap(),
            0,
            token.0,
            timestamp.unwrap_or(0),
        );
        record.dlc = 0;
        out[..crate::legacy::RECORD_LEN].copy_from_slice(zerocopy::AsBytes::as_bytes(&record));
        crate::legacy::RECORD_LEN
    }

    fn encode_error(&self, out: &mut [u8], report: &ErrorReport, _err_id: u32, timestamp: Option<u32>) -> usize {
        let mut payload = [0u8; 64];
        payload[..8].copy_from_slice(&report.to_bytes());
        let record = LegacyRecord {
            echo_id: ECHO_ID_RX,
            can_id: ERROR_SENTINEL_BIT,
            dlc: 8,
            channel: 0,
            flags: 0,
            reserved: 0,
            payload,
            timestamp_us: timestamp.unwrap_or(0),
        };
        out[..crate::legacy::RECORD_LEN].copy_from_slice(zerocopy::AsBytes::as_bytes(&record));
        crate::legacy::RECORD_LEN
    }

    fn decode_tx(&self, buf: &[u8]) -> Result<(Frame, EchoToken), CodecDecodeError> {
        if buf.len() < crate::legacy::RECORD_LEN {
            return Err(CodecDecodeError::Truncated);
        }
        let record = <LegacyRecord as zerocopy::FromBytes>::ref_from(&buf[..crate::legacy::RECORD_LEN])
            .ok_or(CodecDecodeError::Truncated)?;
        if record.is_rx() {
            return Err(CodecDecodeError::NotATxFrame);
        }
        let frame = record.to_frame().map_err(|_| CodecDecodeError::BadFrame)?;
        Ok((frame, EchoToken(record.echo_id)))
    }

    fn max_message_len(&self) -> usize {
        crate::legacy::RECORD_LEN
    }
}

/// Extended compact, variable-length framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtendedCodec {
    pub timestamps_enabled: bool,
}

impl FrameCodec for ExtendedCodec {
    fn encode_rx(&self, out: &mut [u8], frame: &Frame, _channel: u8, timestamp: Option<u32>) -> usize {
        let ts = if self.timestamps_enabled { timestamp } else { None };
        extended::encode_rx_frame(out, frame, ts)
    }

    fn encode_tx_echo(&self, out: &mut [u8], token: EchoToken, timestamp: Option<u32>) -> usize {
        let ts = if self.timestamps_enabled { timestamp } else { None };
        extended::encode_tx_echo(out, token.0 as u8, ts)
    }

    fn encode_error(&self, out: &mut [u8], report: &ErrorReport, err_id: u32, timestamp: Option<u32>) -> usize {
        let ts = if self.timestamps_enabled { timestamp } else { None };
        extended::encode_error(out, report, err_id, ts)
    }

    fn decode_tx(&self, buf: &[u8]) -> Result<(Frame, EchoToken), CodecDecodeError> {
        match extended::decode(buf, self.timestamps_enabled) {
            Ok(extended::Message::TxFrame { frame, marker }) => Ok((frame, EchoToken(marker as u32))),
            Ok(_) => Err(CodecDecodeError::NotATxFrame),
            Err(extended::DecodeError::Truncated) => Err(CodecDecodeError::Truncated),
            Err(_) => Err(CodecDecodeError::BadFrame),
        }
    }

    fn max_message_len(&self) -> usize {
        extended::MAX_MESSAGE_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlag;
    use embedded_can::{Id, StandardId};

    #[test]
    fn extended_codec_round_trips_tx_submission() {
        let codec = ExtendedCodec { timestamps_enabled: false };
        let id = Id::Standard(StandardId::new(0x42).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[9, 9]).unwrap();
        let mut buf = [0u8; extended::MAX_MESSAGE_LEN];
        let len = extended::encode_tx_frame(&mut buf, &frame, 3);
        let (decoded, token) = codec.decode_tx(&buf[..len]).unwrap();
        assert_eq!(token, EchoToken(3));
        assert_eq!(decoded.data(), frame.data());
    }

    #[test]
    fn legacy_codec_rejects_rx_sentinel_as_tx_submission() {
        let codec = LegacyCodec;
        let id = Id::Standard(StandardId::new(0x10).unwrap());
        let frame = Frame::new_data(id, FrameFlag::empty(), &[1]).unwrap();
        let mut buf = [0u8; crate::legacy::RECORD_LEN];
        let len = codec.encode_rx(&mut buf, &frame, 0, None);
        assert_eq!(codec.decode_tx(&buf[..len]), Err(CodecDecodeError::NotATxFrame));
    }
}
