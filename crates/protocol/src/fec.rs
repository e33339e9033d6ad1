// Copyright 2025-2026 CEMAXECUTER LLC

/// Forward error correction for BLE LE Coded PHY.
///
/// Convolutional code per Bluetooth Core Spec v5.4, Vol 6, Part B, Section 3.3:
///   Rate 1/2, constraint length K=4 (3 memory bits, 8 trellis states)
///   g0(D) = 1 + D + D^2 + D^3  (octal 17, 0b1111 = 15)
///   g1(D) = 1 + D^2 + D^3       (octal 15, 0b1011 in register layout)
///
/// Bits are processed LSB first within each octet. Each input bit yields the
/// pair (c0, c1), c0 in the lower bit position, so one input octet becomes one
/// little-endian 16-bit word of coded output.
///
/// Decoding is a majority vote rather than a trellis search: every data bit is
/// recovered three ways from the coded nibble (this pair + the next pair) and
/// the bits already decoded, and two agreeing reconstructions win.
///
/// Pattern mapping (S=8): coded bit 0 -> symbols 0011, 1 -> 1100 in
/// transmission order. S=2 transmits coded bits unchanged.

/// Number of memory bits in the shift register.
const FEC_MEM: usize = 3;
/// Number of trellis states (2^FEC_MEM).
const FEC_STATES: usize = 1 << FEC_MEM;
const STATE_MASK: u8 = (1 << FEC_MEM) - 1;
/// g0 polynomial: 1+D+D^2+D^3 = 0b1111
const G0: u8 = 0b1111;
/// g1 polynomial: 1+D^2+D^3 (octal 15)
/// Register [D^0, D^1, D^2, D^3] = [bit3, bit2, bit1, bit0]
/// Taps D^0(bit3) + D^2(bit1) + D^3(bit0) = 0b1011
const G1: u8 = 0b1011;

/// S=8 symbol nibbles, first transmitted symbol in bit 0
const PATTERN_ZERO: u8 = 0b1100; // 0,0,1,1
const PATTERN_ONE: u8 = 0b0011; // 1,1,0,0

/// Compute parity of a byte (XOR of all bits).
#[inline]
const fn parity(x: u8) -> u8 {
    let mut p = x;
    p ^= p >> 4;
    p ^= p >> 2;
    p ^= p >> 1;
    p & 1
}

#[inline]
const fn next_state(state: u8, bit: u8) -> u8 {
    ((bit << (FEC_MEM - 1)) | (state >> 1)) & STATE_MASK
}

/// ENCODE_TABLE[state][octet] = (coded word, state after the octet)
static ENCODE_TABLE: [[(u16, u8); 256]; FEC_STATES] = build_encode_table();

/// DECODE_TABLE[state][coded nibble] = majority-voted data bit
static DECODE_TABLE: [[u8; 16]; FEC_STATES] = build_decode_table();

/// UNMAP_TABLE[symbol nibble] = coded bit
static UNMAP_TABLE: [u8; 16] = build_unmap_table();

const fn build_encode_table() -> [[(u16, u8); 256]; FEC_STATES] {
    let mut table = [[(0u16, 0u8); 256]; FEC_STATES];
    let mut state0 = 0;
    while state0 < FEC_STATES {
        let mut octet = 0;
        while octet < 256 {
            let mut state = state0 as u8;
            let mut word: u16 = 0;
            let mut j = 0;
            while j < 8 {
                let input = ((octet >> j) & 1) as u8;
                let reg = (input << FEC_MEM) | state;
                word |= (parity(reg & G0) as u16) << (2 * j);
                word |= (parity(reg & G1) as u16) << (2 * j + 1);
                state = next_state(state, input);
                j += 1;
            }
            table[state0][octet] = (word, state);
            octet += 1;
        }
        state0 += 1;
    }
    table
}

#[inline]
const fn majority(a: u8, b: u8, c: u8) -> u8 {
    (a & b) | (a & c) | (b & c)
}

const fn build_decode_table() -> [[u8; 16]; FEC_STATES] {
    let mut table = [[0u8; 16]; FEC_STATES];
    let mut state = 0;
    while state < FEC_STATES {
        let mut nibble = 0;
        while nibble < 16 {
            let s = state as u8;
            let n = nibble as u8;
            let (c0, c1) = (n & 1, (n >> 1) & 1);
            let (n0, n1) = ((n >> 2) & 1, (n >> 3) & 1);
            // c1 = b ^ b[-2] ^ b[-3]
            let from_c1 = c1 ^ parity(s & (G1 & STATE_MASK));
            // c0 = b ^ b[-1] ^ b[-2] ^ b[-3]
            let from_c0 = c0 ^ parity(s & (G0 & STATE_MASK));
            // next pair: c0 ^ c1 = b
            let from_next = n0 ^ n1;
            table[state][nibble] = majority(from_c1, from_c0, from_next);
            nibble += 1;
        }
        state += 1;
    }
    table
}

const fn build_unmap_table() -> [u8; 16] {
    let mut table = [0u8; 16];
    let mut nibble = 0;
    while nibble < 16 {
        let n = nibble as u8;
        let d0 = (n ^ PATTERN_ZERO).count_ones();
        let d1 = (n ^ PATTERN_ONE).count_ones();
        table[nibble] = if d0 < d1 {
            0
        } else if d1 < d0 {
            1
        } else {
            // equidistant: the first symbol decides
            n & 1
        };
        nibble += 1;
    }
    table
}

/// Convolutional encode. Output is exactly twice the input length; the
/// encoder is not flushed, so the caller appends TERM bits if it needs them.
pub fn fec_encode(data: &[u8]) -> Vec<u8> {
    let mut coded = Vec::with_capacity(data.len() * 2);
    let mut state: u8 = 0;
    for &octet in data {
        let (word, next) = ENCODE_TABLE[state as usize][octet as usize];
        coded.extend_from_slice(&word.to_le_bytes());
        state = next;
    }
    coded
}

/// Majority-vote decode of [`fec_encode`] output. A trailing odd octet is ignored.
pub fn fec_decode(coded: &[u8]) -> Vec<u8> {
    let n_pairs = (coded.len() / 2) * 8;
    let mut decoded = vec![0u8; coded.len() / 2];
    let pair = |i: usize| (coded[i / 4] >> ((i % 4) * 2)) & 0b11;

    let mut state: u8 = 0;
    for i in 0..n_pairs {
        let this = pair(i);
        let bit = if i + 1 < n_pairs {
            DECODE_TABLE[state as usize][(this | (pair(i + 1) << 2)) as usize]
        } else {
            // no next pair: only two reconstructions, the c1 one wins ties
            let from_c1 = ((this >> 1) & 1) ^ parity(state & (G1 & STATE_MASK));
            let from_c0 = (this & 1) ^ parity(state & (G0 & STATE_MASK));
            majority(from_c1, from_c0, from_c1)
        };
        decoded[i / 8] |= bit << (i % 8);
        state = next_state(state, bit);
    }
    decoded
}

/// Pattern map at S=8: every coded bit becomes four symbols, so each coded
/// octet becomes four symbol octets (first symbol in the LSB).
pub fn pattern_map_s8(coded: &[u8]) -> Vec<u8> {
    let mut symbols = Vec::with_capacity(coded.len() * 4);
    for &octet in coded {
        let mut word: u32 = 0;
        for j in 0..8 {
            let nibble = if (octet >> j) & 1 == 0 { PATTERN_ZERO } else { PATTERN_ONE };
            word |= (nibble as u32) << (4 * j);
        }
        symbols.extend_from_slice(&word.to_le_bytes());
    }
    symbols
}

/// Inverse of [`pattern_map_s8`]. Nibbles that match neither pattern are
/// resolved by nearest pattern (first symbol on a tie). Trailing symbol
/// octets that do not fill a coded octet are ignored.
pub fn pattern_unmap_s8(symbols: &[u8]) -> Vec<u8> {
    symbols
        .chunks_exact(4)
        .map(|chunk| {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let mut octet = 0u8;
            for j in 0..8 {
                let nibble = ((word >> (4 * j)) & 0xF) as usize;
                octet |= UNMAP_TABLE[nibble] << j;
            }
            octet
        })
        .collect()
}
