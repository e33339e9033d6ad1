// Copyright 2025-2026 CEMAXECUTER LLC

//! BLE CRC-24.
//!
//! Polynomial: x^24 + x^10 + x^9 + x^6 + x^4 + x^3 + x + 1 (0x00065B).
//! The link layer shifts bits LSB first and transmits the remainder MSB first,
//! so the right-shifting register below runs entirely in the bit-reversed
//! domain: it is seeded with the bit-reversed CRCInit and its final value is
//! the little-endian reading of the three CRC bytes as they appear on air.

/// Reflected polynomial for the right-shifting register
const POLY_REVERSED: u32 = 0xDA6000;

/// Reflect (bit-reverse) a 24-bit value
pub const fn reverse24(mut v: u32) -> u32 {
    let mut result: u32 = 0;
    let mut i = 0;
    while i < 24 {
        result = (result << 1) | (v & 1);
        v >>= 1;
        i += 1;
    }
    result
}

/// CRC-24 seeded with an already bit-reversed CRCInit.
/// Returns the value in wire order (see [`crc_to_wire`]).
pub fn crc24_rev(data: &[u8], crc_init_rev: u32) -> u32 {
    let mut crc = crc_init_rev & 0xFFFFFF;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY_REVERSED;
            } else {
                crc >>= 1;
            }
        }
    }

    crc & 0xFFFFFF
}

/// CRC-24 from a CRCInit as it appears in CONNECT_IND (or 0x555555 for advertising)
pub fn crc24(data: &[u8], crc_init: u32) -> u32 {
    crc24_rev(data, reverse24(crc_init & 0xFFFFFF))
}

/// The remainder as the Core Spec LFSR diagram holds it (MSB-first domain)
pub fn crc24_remainder(data: &[u8], crc_init: u32) -> u32 {
    reverse24(crc24(data, crc_init))
}

/// Three CRC bytes in transmission order
pub fn crc_to_wire(crc: u32) -> [u8; 3] {
    [crc as u8, (crc >> 8) as u8, (crc >> 16) as u8]
}

/// Inverse of [`crc_to_wire`]. `bytes` must hold at least three octets.
pub fn crc_from_wire(bytes: &[u8]) -> u32 {
    bytes[0] as u32 | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16)
}
