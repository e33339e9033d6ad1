// Copyright 2025-2026 CEMAXECUTER LLC

//! Data whitening (x^7 + x^4 + 1 scrambler).
//!
//! The transform is its own inverse: whitening and dewhitening are the same call.

// Pre-computed 127-bit whitening sequence (7-bit maximal-length LFSR, period 127)
// All 40 BLE channels use the same sequence at different offsets
static WHITENING: [u8; 127] = [
    1, 1, 1, 1, 0, 1, 0, 1, 0, 1, 0, 0, 0, 0, 1, 0, 1, 1, 0, 1, 1, 1, 1, 0, 0,
    1, 1, 1, 0, 0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 0, 0, 0, 0, 1, 1, 0, 1, 1,
    0, 1, 0, 1, 1, 1, 0, 1, 0, 0, 0, 1, 1, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1, 1, 1, 1, 0, 1, 1, 1, 0, 0, 0, 0,
    1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 1, 1, 1, 0, 1, 1, 0, 0, 0, 1, 0, 1, 0, 0, 1,
    0, 1,
];

// Per-channel starting offset into the whitening sequence
static WHITENING_INDEX: [u8; 40] = [
    70, 62, 120, 111, 77, 46, 15, 101, 66, 39, 31, 26, 80, 83, 125, 89, 10, 35,
    8, 54, 122, 17, 33, 0, 58, 115, 6, 94, 86, 49, 52, 20, 40, 27, 84, 90, 63,
    112, 47, 102,
];

/// Whitening bit lookup: index into pre-computed sequence at channel-specific offset
#[inline]
pub fn whitening_bit(channel: u8, bit_position: u32) -> u8 {
    let start = WHITENING_INDEX[channel as usize % WHITENING_INDEX.len()] as u32;
    WHITENING[((start + bit_position) % WHITENING.len() as u32) as usize]
}

/// Whiten or dewhiten `data` for `channel`, starting at bit 0 of the sequence.
pub fn dewhiten(data: &[u8], channel: u8) -> Vec<u8> {
    let mut out = data.to_vec();
    dewhiten_in_place(&mut out, channel, 0);
    out
}

/// In-place variant. `start_bit` lets a caller continue a sequence across
/// separately delivered fragments of one packet. Returns the next bit position.
pub fn dewhiten_in_place(data: &mut [u8], channel: u8, start_bit: u32) -> u32 {
    let mut pos = start_bit;
    for byte in data.iter_mut() {
        let mut mask: u8 = 0;
        for j in 0..8 {
            mask |= whitening_bit(channel, pos) << j;
            pos += 1;
        }
        *byte ^= mask;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Bit-serial LFSR: position 0 seeded with 1, positions 1..6 with the channel (MSB first)
    fn lfsr_sequence(channel: u8, n: usize) -> Vec<u8> {
        let mut reg = [0u8; 7];
        reg[0] = 1;
        for i in 0..6 {
            reg[i + 1] = (channel >> (5 - i)) & 1;
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let o = reg[6];
            out.push(o);
            for i in (1..7).rev() {
                reg[i] = reg[i - 1];
            }
            reg[0] = o;
            reg[4] ^= o;
        }
        out
    }

    #[test]
    fn test_whitening_bit_range() {
        for ch in 0..40 {
            for bit in 0..256 {
                let wb = whitening_bit(ch, bit);
                assert!(wb <= 1, "whitening_bit({}, {}) = {}", ch, bit, wb);
            }
        }
    }

    #[test]
    fn test_table_matches_lfsr() {
        for ch in 0..40u8 {
            let expected = lfsr_sequence(ch, 300);
            for (i, &bit) in expected.iter().enumerate() {
                assert_eq!(whitening_bit(ch, i as u32), bit, "channel {} bit {}", ch, i);
            }
        }
    }

    #[test]
    fn test_dewhiten_involution() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for ch in 0..40u8 {
            for len in [0usize, 1, 2, 15, 16, 17, 37, 64, 255, 257] {
                let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                let once = dewhiten(&data, ch);
                if len > 2 {
                    assert_ne!(once, data, "channel {} len {} left unchanged", ch, len);
                }
                assert_eq!(dewhiten(&once, ch), data, "channel {} len {}", ch, len);
            }
        }
    }

    #[test]
    fn test_fragmented_matches_whole() {
        let data: Vec<u8> = (0..40u8).collect();
        let whole = dewhiten(&data, 12);
        let mut split = data.clone();
        let (a, b) = split.split_at_mut(13);
        let next = dewhiten_in_place(a, 12, 0);
        assert_eq!(next, 13 * 8);
        dewhiten_in_place(b, 12, next);
        assert_eq!(split, whole);
    }
}
