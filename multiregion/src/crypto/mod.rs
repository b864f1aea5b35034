//! LoRaWAN cryptographic helpers
//!
//! This module provides:
//! - Key check values, for logging a key without revealing it
//! - LoRaWAN 1.0.x session key derivation
//! - Data frame MIC computation
//!
//! The manager only needs key check values. Derivation and MIC are for MAC
//! glue code and simulated network servers; stored MIC tokens are never
//! checked here.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::config::{AESKey, DevAddr};

/// Block size for AES-128
const BLOCK_SIZE: usize = 16;

/// Key check value size in bytes
pub const KCV_SIZE: usize = 3;

/// Direction identifiers for cryptographic operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    /// Uplink (device to network)
    Up = 0,
    /// Downlink (network to device)
    Down = 1,
}

/// Key check value: the first bytes of the key's encryption of a zero block
pub fn key_check_value(key: &AESKey) -> [u8; KCV_SIZE] {
    let cipher = Aes128::new(key.into());
    let mut block = [0u8; BLOCK_SIZE];
    cipher.encrypt_block((&mut block).into());

    let mut kcv = [0u8; KCV_SIZE];
    kcv.copy_from_slice(&block[..KCV_SIZE]);
    kcv
}

/// Derive network and application session keys from a join accept
///
/// # Arguments
/// * `app_key` - Application root key
/// * `join_nonce` - Join nonce from the join accept
/// * `net_id` - Network ID from the join accept
/// * `dev_nonce` - Device nonce from the join request
///
/// Returns `(nwk_s_key, app_s_key)`.
pub fn derive_session_keys(
    app_key: &AESKey,
    join_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: u16,
) -> (AESKey, AESKey) {
    let cipher = Aes128::new(app_key.into());

    let derive = |prefix: u8| {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = prefix;
        block[1..4].copy_from_slice(join_nonce);
        block[4..7].copy_from_slice(net_id);
        block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
        cipher.encrypt_block((&mut block).into());
        block
    };

    (derive(0x01), derive(0x02))
}

/// Compute the MIC of a data frame
///
/// # Arguments
/// * `key` - Network session key
/// * `msg` - MHDR through the end of FRMPayload
/// * `dev_addr` - Device address
/// * `fcnt` - Frame counter
/// * `dir` - Frame direction
pub fn compute_mic(key: &AESKey, msg: &[u8], dev_addr: DevAddr, fcnt: u32, dir: Direction) -> u32 {
    let mut b0 = [0u8; BLOCK_SIZE];
    b0[0] = 0x49;
    b0[5] = dir as u8;
    b0[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
    b0[15] = msg.len() as u8;

    let mut mac = <Cmac<Aes128> as KeyInit>::new(key.into());
    mac.update(&b0);
    mac.update(msg);
    let tag = mac.finalize().into_bytes();
    u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kcv_distinguishes_keys() {
        let a = key_check_value(&[0x00; 16]);
        let b = key_check_value(&[0x01; 16]);
        assert_ne!(a, b);
        assert_eq!(a, key_check_value(&[0x00; 16]));
        // AES-128 of a zero block under a zero key
        assert_eq!(a, [0x66, 0xE9, 0x4B]);
    }

    #[test]
    fn derived_keys_differ_by_prefix_and_nonce() {
        let key = [0x2B; 16];
        let (nwk, app) = derive_session_keys(&key, &[1, 2, 3], &[0, 0, 0x13], 7);
        assert_ne!(nwk, app);
        let (nwk2, _) = derive_session_keys(&key, &[1, 2, 3], &[0, 0, 0x13], 8);
        assert_ne!(nwk, nwk2);
    }

    #[test]
    fn mic_depends_on_counter_and_direction() {
        let key = [0x5A; 16];
        let msg = [0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x01, 0x00, 0x01, 0xAA];
        let up = compute_mic(&key, &msg, 0x0102_0304, 1, Direction::Up);
        assert_eq!(up, compute_mic(&key, &msg, 0x0102_0304, 1, Direction::Up));
        assert_ne!(up, compute_mic(&key, &msg, 0x0102_0304, 2, Direction::Up));
        assert_ne!(up, compute_mic(&key, &msg, 0x0102_0304, 1, Direction::Down));
    }
}
