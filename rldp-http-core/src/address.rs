//! ADNL literal address codec.
//!
//! A literal is 55 base-32 characters. With a leading `f` prepended it decodes to
//! 35 bytes: tag `0x2d`, the 32-byte key, then a big-endian CRC-16/XMODEM of the
//! first 33 bytes.

use crc::{Crc, CRC_16_XMODEM};
use data_encoding::BASE32;

/// Length of a literal address in characters (suffix excluded).
pub const LITERAL_LEN: usize = 55;

/// Hostname suffix marking a literal address.
pub const LITERAL_SUFFIX: &str = ".adnl";

const TAG: u8 = 0x2d;
const DECODED_LEN: usize = 35;
const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("malformed address: {0}")]
    MalformedAddress(&'static str),
    #[error("invalid address tag {0:#04x}")]
    InvalidAddressTag(u8),
    #[error("address checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// Decode a literal address into its 32-byte directory key.
pub fn decode(literal: &str) -> Result<[u8; 32], AddressError> {
    if literal.len() != LITERAL_LEN {
        return Err(AddressError::MalformedAddress("wrong length"));
    }
    let mut padded = String::with_capacity(LITERAL_LEN + 1);
    padded.push('F');
    padded.push_str(&literal.to_ascii_uppercase());
    let buf = BASE32
        .decode(padded.as_bytes())
        .map_err(|_| AddressError::MalformedAddress("invalid base32"))?;
    if buf.len() != DECODED_LEN {
        return Err(AddressError::MalformedAddress("wrong decoded length"));
    }
    if buf[0] != TAG {
        return Err(AddressError::InvalidAddressTag(buf[0]));
    }
    let actual = u16::from_be_bytes([buf[33], buf[34]]);
    let expected = XMODEM.checksum(&buf[..33]);
    if actual != expected {
        return Err(AddressError::ChecksumMismatch { expected, actual });
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&buf[1..33]);
    Ok(key)
}

/// Encode a 32-byte key as a lowercase literal address.
pub fn encode(key: &[u8; 32]) -> String {
    let mut buf = [0u8; DECODED_LEN];
    buf[0] = TAG;
    buf[1..33].copy_from_slice(key);
    let crc = XMODEM.checksum(&buf[..33]);
    buf[33..].copy_from_slice(&crc.to_be_bytes());
    // The tag always encodes to a leading 'F', which the literal omits.
    BASE32.encode(&buf)[1..].to_ascii_lowercase()
}

/// Split `host` into its literal part if it carries the `.adnl` suffix.
pub fn strip_literal_suffix(host: &str) -> Option<&str> {
    host.strip_suffix(LITERAL_SUFFIX)
}
