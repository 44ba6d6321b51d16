//! CRC-CCITT (0x1021, init 0xFFFF, MSB first, no final XOR).

use super::constants::{CRC_INITIAL, CRC_POLYNOMIAL};

/// Compute the ASH frame CRC over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC_INITIAL, |crc, &byte| update(crc, byte))
}

fn update(mut crc: u16, byte: u8) -> u16 {
    crc ^= (byte as u16) << 8;
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ CRC_POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}

/// Append the big-endian CRC of `frame` to itself.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_be_bytes());
}

/// A frame with its CRC appended has a zero residue.
pub fn is_valid(frame: &[u8]) -> bool {
    crc16(frame) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_rst_frame_crc() {
        assert_eq!(crc16(&[0xC0]), 0x38BC);
    }

    #[test]
    fn test_rstack_frame_crc() {
        assert_eq!(crc16(&[0xC1, 0x02, 0x02]), 0x9B7B);
    }

    #[test]
    fn test_residue_is_zero() {
        let frames: [&[u8]; 3] = [&[0x81], &[0x25, 0x42, 0x21, 0xA8, 0x56], b"hello world"];
        for frame in frames {
            let mut buf = frame.to_vec();
            append_crc(&mut buf);
            assert!(is_valid(&buf), "{:02X?}", buf);
        }
    }

    #[test]
    fn test_corruption_detected() {
        let mut buf = vec![0xC1, 0x02, 0x02];
        append_crc(&mut buf);
        buf[1] ^= 0x01;
        assert!(!is_valid(&buf));
    }
}
