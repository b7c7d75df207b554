//! CRC-32 codec for frame headers.
//!
//! Non-reflected CRC-32 with polynomial 0x04C11DB7, initial value 0 and no
//! final XOR (CRC-32/CKSUM without its output inversion). The empty span
//! checksums to 0, and leading zero bytes do not change the result.

use crc::{Algorithm, Crc};

/// Generator polynomial (x^32 term implicit).
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

const ALGORITHM: Algorithm<u32> = Algorithm {
    width: 32,
    poly: POLYNOMIAL,
    init: 0,
    refin: false,
    refout: false,
    xorout: 0,
    check: 0x89A1_897F,
    residue: 0,
};

const CODEC: Crc<u32> = Crc::<u32>::new(&ALGORITHM);

/// Compute the CRC over an arbitrary byte span.
pub fn compute(bytes: &[u8]) -> u32 {
    CODEC.checksum(bytes)
}

/// Split a CRC into header bytes, most significant first.
pub fn format_bytes(crc: u32) -> [u8; 4] {
    crc.to_be_bytes()
}

/// Rebuild a CRC from the four header bytes written by [`format_bytes`].
pub fn parse_bytes(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Render a CRC byte by byte for diagnostics, e.g. `89 A1 89 7F`.
pub fn format_hex(crc: u32) -> String {
    let [a, b, c, d] = format_bytes(crc);
    format!("{a:02X} {b:02X} {c:02X} {d:02X}")
}
