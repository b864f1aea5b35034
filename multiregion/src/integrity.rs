//! Integrity codec
//!
//! CRC-16 protects each session record, CRC-32 protects the whole store
//! image. The stored CRC always sits right after the bytes it covers.

/// Reflected CRC-16 polynomial (IBM/ARC family)
pub const CRC16_POLY: u16 = 0xA001;
/// CRC-16 initial value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Reflected CRC-32 polynomial (IEEE 802.3)
pub const CRC32_POLY: u32 = 0xEDB8_8320;
/// CRC-32 initial value
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;
/// CRC-32 final XOR
pub const CRC32_XOR_OUT: u32 = 0xFFFF_FFFF;

/// CRC-16 over `data`, polynomial 0xA001, init 0xFFFF, no final XOR
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-32 over `data`, polynomial 0xEDB88320, init and final XOR 0xFFFFFFFF
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = CRC32_INIT;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ CRC32_XOR_OUT
}

/// Compute the CRC-16 of `buf[..at]` and store it little-endian at `buf[at..at + 2]`.
pub fn seal_crc16(buf: &mut [u8], at: usize) -> u16 {
    let crc = crc16(&buf[..at]);
    buf[at..at + 2].copy_from_slice(&crc.to_le_bytes());
    crc
}

/// Check the little-endian CRC-16 stored at `buf[at..at + 2]` against `buf[..at]`.
pub fn check_crc16(buf: &[u8], at: usize) -> bool {
    let stored = u16::from_le_bytes([buf[at], buf[at + 1]]);
    crc16(&buf[..at]) == stored
}

/// Compute the CRC-32 of `buf[..at]` and store it little-endian at `buf[at..at + 4]`.
pub fn seal_crc32(buf: &mut [u8], at: usize) -> u32 {
    let crc = crc32(&buf[..at]);
    buf[at..at + 4].copy_from_slice(&crc.to_le_bytes());
    crc
}

/// Check the little-endian CRC-32 stored at `buf[at..at + 4]` against `buf[..at]`.
pub fn check_crc32(buf: &[u8], at: usize) -> bool {
    let stored = u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    crc32(&buf[..at]) == stored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        // CRC-16/MODBUS parameters
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn sealed_buffer_detects_any_flipped_byte() {
        let mut buf = [0u8; 34];
        for (i, b) in buf.iter_mut().enumerate().take(32) {
            *b = (i as u8).wrapping_mul(37);
        }
        seal_crc16(&mut buf, 32);
        assert!(check_crc16(&buf, 32));

        for i in 0..buf.len() {
            let mut corrupted = buf;
            corrupted[i] ^= 0x01;
            assert!(!check_crc16(&corrupted, 32), "flip at {} went undetected", i);
        }
    }

    #[test]
    fn crc32_seal_and_check() {
        let mut buf = [0xA5u8; 64];
        seal_crc32(&mut buf, 60);
        assert!(check_crc32(&buf, 60));
        buf[7] = 0;
        assert!(!check_crc32(&buf, 60));
    }
}
