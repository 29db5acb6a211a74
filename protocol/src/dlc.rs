//! DLC <-> byte-length conversion for classic and FD payloads.
//!
//! Mirrors the gs_usb DLC table (`fd_len_to_dlc`/`fd_dlc_to_len` in the
//! teacher crate), exposed as a public, total pair of mutually inverse
//! functions over the valid length set `{0..=8,12,16,20,24,32,48,64}`.

/// All payload lengths a DLC can encode, in DLC order (0..=15).
pub const VALID_LENGTHS: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Converts a payload length in bytes to its DLC nibble.
///
/// Returns `None` if `len` is not one of the valid FD-coded sizes.
pub fn byte_count_to_dlc(len: usize) -> Option<u8> {
    match len {
        0..=8 => Some(len as u8),
        12 => Some(9),
        16 => Some(10),
        20 => Some(11),
        24 => Some(12),
        32 => Some(13),
        48 => Some(14),
        64 => Some(15),
        _ => None,
    }
}

/// Converts a DLC nibble (0..=15) to the payload length it represents.
pub fn dlc_to_byte_count(dlc: u8) -> Option<usize> {
    VALID_LENGTHS.get(dlc as usize).map(|&n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_valid_length() {
        for &len in &VALID_LENGTHS {
            let dlc = byte_count_to_dlc(len as usize).unwrap();
            assert_eq!(dlc_to_byte_count(dlc).unwrap(), len as usize);
        }
    }

    #[test]
    fn rejects_invalid_lengths() {
        assert_eq!(byte_count_to_dlc(9), None);
        assert_eq!(byte_count_to_dlc(65), None);
    }

    #[test]
    fn dlc_is_total_over_nibble_range() {
        for dlc in 0..16u8 {
            assert!(dlc_to_byte_count(dlc).is_some());
        }
    }
}
