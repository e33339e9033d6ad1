// Copyright 2025-2026 CEMAXECUTER LLC

//! Capture frames and timestamp reconstruction.
//!
//! Wire layout of a frame as delivered by the sniffer firmware (all LE):
//!
//! ```notrust
//! +--------+--------+--------+------+------------+--------------+
//! |  tick  | length | event  | rssi | phy | chan |     body     |
//! |  u32   |  u16   |  u16   |  i8  | 2b  |  6b  | length bytes |
//! +--------+--------+--------+------+------------+--------------+
//! ```
//!
//! `length` bit 15 is the direction flag, bit 14 the CRC error flag and the
//! low 14 bits the body length.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::DecoderConfig;
use crate::crc::crc_from_wire;
use crate::error::FrameError;
use crate::fec::{fec_decode, pattern_unmap_s8};
use crate::state::DecoderState;
use crate::whitening::dewhiten;
use crate::{is_primary_adv_channel, BLE_NUM_CHANNELS};

const LEN_DIRECTION: u16 = 0x8000;
const LEN_CRC_ERROR: u16 = 0x4000;
const LEN_MASK: u16 = 0x3FFF;

/// BLE PHY type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phy {
    #[default]
    Phy1M,
    Phy2M,
    CodedS8,
    CodedS2,
}

impl Phy {
    /// Decode the two PHY bits of the channel byte
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Phy::Phy1M,
            1 => Phy::Phy2M,
            2 => Phy::CodedS8,
            _ => Phy::CodedS2,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Phy::Phy1M => 0,
            Phy::Phy2M => 1,
            Phy::CodedS8 => 2,
            Phy::CodedS2 => 3,
        }
    }

    pub fn is_coded(self) -> bool {
        matches!(self, Phy::CodedS8 | Phy::CodedS2)
    }

    /// Octets of preamble, access address, CRC and (coded) FEC block 1 overhead
    pub fn overhead_octets(self) -> u32 {
        match self {
            Phy::Phy1M | Phy::Phy2M => 8,
            Phy::CodedS8 => 10,
            Phy::CodedS2 => 27,
        }
    }

    pub fn us_per_octet(self) -> f64 {
        match self {
            Phy::Phy1M => 8.0,
            Phy::Phy2M => 4.0,
            Phy::CodedS8 => 64.0,
            Phy::CodedS2 => 16.0,
        }
    }

    /// On-air duration in microseconds of a packet whose PDU is `body_octets` long
    pub fn airtime_us(self, body_octets: usize) -> f64 {
        (self.overhead_octets() as f64 + body_octets as f64) * self.us_per_octet()
    }
}

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phy::Phy1M => "1M",
            Phy::Phy2M => "2M",
            Phy::CodedS8 => "CODED_S8",
            Phy::CodedS2 => "CODED_S2",
        };
        f.write_str(s)
    }
}

/// Which side of a connection sent a data channel packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    CentralToPeripheral,
    PeripheralToCentral,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::CentralToPeripheral => f.write_str("C->P"),
            Direction::PeripheralToCentral => f.write_str("P->C"),
        }
    }
}

/// A frame as received, before timestamp reconstruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub tick: u32,
    pub direction: Direction,
    pub crc_error: bool,
    pub event: u16,
    pub rssi: i8,
    pub channel: u8,
    pub phy: Phy,
    pub body: Vec<u8>,
    /// Received CRC in wire order, when the source delivers it
    pub crc: Option<u32>,
    /// Access address, when the source knows it (SDR, capture files)
    pub access_address: Option<u32>,
}

impl RawFrame {
    pub const HEADER_LEN: usize = 10;

    /// Parse a firmware frame: 10-byte header followed by the body.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(FrameError::ShortHeader(bytes.len()));
        }

        let tick = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len_field = u16::from_le_bytes([bytes[4], bytes[5]]);
        let event = u16::from_le_bytes([bytes[6], bytes[7]]);
        let rssi = bytes[8] as i8;
        let phy_chan = bytes[9];

        let body = &bytes[Self::HEADER_LEN..];
        let declared = (len_field & LEN_MASK) as usize;
        if declared != body.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        let channel = phy_chan & 0x3F;
        if channel >= BLE_NUM_CHANNELS {
            return Err(FrameError::BadChannel(channel));
        }

        Ok(Self {
            tick,
            direction: if len_field & LEN_DIRECTION != 0 {
                Direction::PeripheralToCentral
            } else {
                Direction::CentralToPeripheral
            },
            crc_error: len_field & LEN_CRC_ERROR != 0,
            event,
            rssi,
            channel,
            phy: Phy::from_bits(phy_chan >> 6),
            body: body.to_vec(),
            crc: None,
            access_address: None,
        })
    }

    /// Build a frame from demodulated over-the-air octets following the access address.
    ///
    /// `air` holds the whitened PDU and CRC; for coded PHYs it is FEC block 2
    /// as received (S=8 still pattern-mapped). Trailing octets past the CRC
    /// are ignored.
    pub fn from_air(
        tick: u32,
        channel: u8,
        phy: Phy,
        rssi: i8,
        access_address: u32,
        air: &[u8],
    ) -> Result<Self, FrameError> {
        if channel >= BLE_NUM_CHANNELS {
            return Err(FrameError::BadChannel(channel));
        }
        let whitened = match phy {
            Phy::Phy1M | Phy::Phy2M => air.to_vec(),
            Phy::CodedS2 => fec_decode(air),
            Phy::CodedS8 => fec_decode(&pattern_unmap_s8(air)),
        };
        let clear = dewhiten(&whitened, channel);
        if clear.len() < 2 {
            return Err(FrameError::ShortHeader(clear.len()));
        }

        let body_len = 2 + clear[1] as usize;
        if clear.len() < body_len + 3 {
            return Err(FrameError::LengthMismatch {
                declared: body_len,
                actual: clear.len().saturating_sub(3),
            });
        }

        Ok(Self {
            tick,
            direction: Direction::CentralToPeripheral,
            crc_error: false,
            event: 0,
            rssi,
            channel,
            phy,
            body: clear[..body_len].to_vec(),
            crc: Some(crc_from_wire(&clear[body_len..body_len + 3])),
            access_address: Some(access_address),
        })
    }

    /// Serialize back into the firmware frame layout (CRC and access address are not carried)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut len_field = (self.body.len() as u16) & LEN_MASK;
        if self.direction == Direction::PeripheralToCentral {
            len_field |= LEN_DIRECTION;
        }
        if self.crc_error {
            len_field |= LEN_CRC_ERROR;
        }

        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&len_field.to_le_bytes());
        out.extend_from_slice(&self.event.to_le_bytes());
        out.push(self.rssi as u8);
        out.push((self.phy.bits() << 6) | (self.channel & 0x3F));
        out.extend_from_slice(&self.body);
        out
    }
}

/// Timestamp reconstruction state: anchors the first tick to wall-clock time
/// and counts 32-bit wraparounds of the hardware clock.
#[derive(Debug, Clone, Default)]
pub struct CaptureClock {
    pub first_epoch_time: f64,
    /// `None` until the first frame (or marker) anchors the clock
    pub time_offset: Option<f64>,
    pub wrap_count: u32,
    pub last_tick: u32,
}

impl CaptureClock {
    pub fn is_anchored(&self) -> bool {
        self.time_offset.is_some()
    }

    /// Anchor `tick` to `epoch` (seconds since UNIX epoch). No-op once anchored.
    pub fn anchor(&mut self, tick: u32, epoch: f64, config: &DecoderConfig) {
        if self.is_anchored() {
            return;
        }
        self.first_epoch_time = epoch;
        self.time_offset = Some(-(tick as f64) / config.tick_rate_hz);
        self.wrap_count = 0;
        self.last_tick = tick;
        log::debug!("capture clock anchored at tick {} (epoch {:.6})", tick, epoch);
    }

    /// Seconds since the anchor for `tick`. Anchors on first use.
    ///
    /// A tick below its predecessor counts as a wraparound, unless it is no
    /// more than `late_tolerance_us` behind: that is a late frame, placed
    /// against the wrap it belongs to without moving the clock.
    pub fn stamp(&mut self, tick: u32, config: &DecoderConfig) -> f64 {
        if !self.is_anchored() {
            self.anchor(tick, wall_clock_now(), config);
        }
        let offset = self.time_offset.unwrap_or(0.0);

        let behind = self.last_tick.wrapping_sub(tick);
        let late = behind != 0 && behind <= config.late_tolerance_ticks();
        let wraps = if late {
            if tick > self.last_tick {
                // from before the most recent wrap (or before the anchor)
                self.wrap_count as i64 - 1
            } else {
                self.wrap_count as i64
            }
        } else {
            if tick < self.last_tick {
                self.wrap_count += 1;
            }
            self.last_tick = tick;
            self.wrap_count as i64
        };

        offset + tick as f64 / config.tick_rate_hz + wraps as f64 * config.wrap_period()
    }
}

/// Current wall-clock time in seconds since the UNIX epoch
pub fn wall_clock_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A frame with its reconstructed timestamp and access address context
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Seconds since the first frame of the session
    pub ts: f64,
    /// Seconds since the UNIX epoch
    pub ts_epoch: f64,
    pub tick: u32,
    pub rssi: i8,
    pub channel: u8,
    pub phy: Phy,
    pub direction: Direction,
    pub event: u16,
    pub crc_error: bool,
    pub crc: Option<u32>,
    pub access_address: u32,
    pub body: Vec<u8>,
}

impl Frame {
    /// Timestamp `raw` against `state` and attach the access address it belongs to.
    ///
    /// A frame on a primary advertising channel always resynchronizes the
    /// state back to the advertising context first.
    pub fn from_raw(raw: RawFrame, state: &mut DecoderState) -> Self {
        let ts = state.clock.stamp(raw.tick, &state.config);
        let ts_epoch = ts + state.clock.first_epoch_time;

        if is_primary_adv_channel(raw.channel) && !state.is_advertising() {
            state.reset_adv();
        }

        let access_address = raw
            .access_address
            .unwrap_or_else(|| state.current_access_address());

        Self {
            ts,
            ts_epoch,
            tick: raw.tick,
            rssi: raw.rssi,
            channel: raw.channel,
            phy: raw.phy,
            direction: raw.direction,
            event: raw.event,
            crc_error: raw.crc_error,
            crc: raw.crc,
            access_address,
            body: raw.body,
        }
    }

    pub fn is_primary_channel(&self) -> bool {
        is_primary_adv_channel(self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnContext;
    use crate::BLE_ADV_AA;

    fn raw(tick: u32, channel: u8, body: &[u8]) -> RawFrame {
        RawFrame {
            tick,
            direction: Direction::CentralToPeripheral,
            crc_error: false,
            event: 0,
            rssi: -50,
            channel,
            phy: Phy::Phy1M,
            body: body.to_vec(),
            crc: None,
            access_address: None,
        }
    }

    #[test]
    fn test_parse_header_fields() {
        let bytes = [
            0x40, 0x42, 0x0F, 0x00, // tick = 1_000_000
            0x03, 0xC0, // len = 3, direction + crc error
            0x07, 0x00, // event = 7
            0xC4, // rssi = -60
            0x40 | 12, // 2M, channel 12
            0xAA, 0xBB, 0xCC,
        ];
        let f = RawFrame::parse(&bytes).unwrap();
        assert_eq!(f.tick, 1_000_000);
        assert_eq!(f.direction, Direction::PeripheralToCentral);
        assert!(f.crc_error);
        assert_eq!(f.event, 7);
        assert_eq!(f.rssi, -60);
        assert_eq!(f.channel, 12);
        assert_eq!(f.phy, Phy::Phy2M);
        assert_eq!(f.body, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(f.to_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_parse_length_mismatch() {
        let mut bytes = raw(5, 37, &[1, 2, 3, 4]).to_bytes();
        bytes.pop();
        assert_eq!(
            RawFrame::parse(&bytes),
            Err(FrameError::LengthMismatch { declared: 4, actual: 3 })
        );
        assert_eq!(RawFrame::parse(&bytes[..6]), Err(FrameError::ShortHeader(6)));
    }

    #[test]
    fn test_parse_bad_channel() {
        let mut bytes = raw(5, 37, &[]).to_bytes();
        bytes[9] = 45;
        assert_eq!(RawFrame::parse(&bytes), Err(FrameError::BadChannel(45)));
    }

    fn on_air(body: &[u8], channel: u8) -> Vec<u8> {
        let mut pdu = body.to_vec();
        pdu.extend_from_slice(&crate::crc::crc_to_wire(crate::crc::crc24(body, crate::BLE_ADV_CRC_INIT)));
        dewhiten(&pdu, channel)
    }

    #[test]
    fn test_from_air_uncoded() {
        let body = [0x42u8, 0x06, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mut air = on_air(&body, 37);
        air.push(0x5A); // trailing noise
        let f = RawFrame::from_air(0, 37, Phy::Phy1M, -30, BLE_ADV_AA, &air).unwrap();
        assert_eq!(f.body, body.to_vec());
        assert_eq!(f.crc, Some(crate::crc::crc24(&body, crate::BLE_ADV_CRC_INIT)));

        let mut state = DecoderState::default();
        let pkt = crate::pdu::decode(Frame::from_raw(f, &mut state), &mut state);
        assert_eq!(pkt.crc_valid, Some(true));
    }

    #[test]
    fn test_from_air_coded() {
        use crate::fec::{fec_encode, pattern_map_s8};
        let body = [0x07u8, 0x03, 0x02, 0x08, 0x00];
        let coded = fec_encode(&on_air(&body, 12));

        let f = RawFrame::from_air(0, 12, Phy::CodedS2, -30, BLE_ADV_AA, &coded).unwrap();
        assert_eq!(f.body, body.to_vec());
        let f = RawFrame::from_air(0, 12, Phy::CodedS8, -30, BLE_ADV_AA, &pattern_map_s8(&coded)).unwrap();
        assert_eq!(f.body, body.to_vec());
        assert_eq!(f.phy, Phy::CodedS8);
    }

    #[test]
    fn test_from_air_short() {
        let air = on_air(&[0x00, 0x10, 1, 2], 37);
        assert!(matches!(
            RawFrame::from_air(0, 37, Phy::Phy1M, -30, BLE_ADV_AA, &air),
            Err(FrameError::LengthMismatch { declared: 18, .. })
        ));
    }

    #[test]
    fn test_airtime_model() {
        assert_eq!(Phy::Phy1M.airtime_us(39), 376.0);
        assert_eq!(Phy::Phy2M.airtime_us(39), 188.0);
        assert_eq!(Phy::CodedS8.airtime_us(14), 1536.0);
        assert_eq!(Phy::CodedS2.airtime_us(14), 656.0);
    }

    #[test]
    fn test_first_frame_is_time_zero() {
        let mut state = DecoderState::default();
        let f = Frame::from_raw(raw(123_456_789, 37, &[0, 0]), &mut state);
        assert_eq!(f.ts, 0.0);
        assert!(f.ts_epoch > 1.0e9, "epoch should be wall-clock anchored");
        let g = Frame::from_raw(raw(123_456_789 + 2_500, 37, &[0, 0]), &mut state);
        assert!((g.ts - 0.0025).abs() < 1e-9);
    }

    #[test]
    fn test_timestamps_monotonic_across_wrap() {
        let mut state = DecoderState::default();
        let mut tick: u32 = 0xFFFF_0000;
        let mut last = f64::NEG_INFINITY;
        for _ in 0..200 {
            let f = Frame::from_raw(raw(tick, 37, &[0, 0]), &mut state);
            assert!(f.ts > last, "timestamp went backwards at tick 0x{:08X}", tick);
            last = f.ts;
            tick = tick.wrapping_add(1_000);
        }
        assert_eq!(state.clock.wrap_count, 1);
        // 199 steps of 1 ms
        assert!((last - 0.199).abs() < 1e-6, "last = {}", last);
    }

    #[test]
    fn test_multiple_wraps() {
        let cfg = DecoderConfig::default();
        let mut clock = CaptureClock::default();
        clock.anchor(0, 0.0, &cfg);
        let mut ts = 0.0;
        for step in 1..=6u32 {
            ts = clock.stamp(step.wrapping_mul(0x6000_0000), &cfg);
        }
        assert_eq!(clock.wrap_count, 2);
        let expected = 6.0 * 0x6000_0000u32 as f64 / 1e6;
        assert!((ts - expected).abs() < 1e-6, "ts = {}", ts);
    }

    #[test]
    fn test_late_frame_is_not_a_wrap() {
        let cfg = DecoderConfig::default();
        let mut clock = CaptureClock::default();
        clock.anchor(10_000, 0.0, &cfg);
        assert!((clock.stamp(20_000, &cfg) - 0.010).abs() < 1e-9);
        // delivered out of order, 5 ms late
        assert!((clock.stamp(15_000, &cfg) - 0.005).abs() < 1e-9);
        assert_eq!(clock.wrap_count, 0);
        assert_eq!(clock.last_tick, 20_000);
    }

    #[test]
    fn test_late_frame_from_before_wrap() {
        let cfg = DecoderConfig::default();
        let mut clock = CaptureClock::default();
        clock.anchor(0xFFFF_F000, 0.0, &cfg);
        let after = clock.stamp(0x0000_1000, &cfg);
        assert_eq!(clock.wrap_count, 1);
        let late = clock.stamp(0xFFFF_F800, &cfg);
        assert!(late < after);
        assert!((late - 0x800 as f64 / 1e6).abs() < 1e-9);
    }

    #[test]
    fn test_long_gap_keeps_time_moving() {
        let cfg = DecoderConfig::default();
        let mut clock = CaptureClock::default();
        clock.anchor(0, 0.0, &cfg);
        let mut prev = 0.0;
        for tick in [0x9000_0000u32, 0xF000_0000, 0x1000_0000, 0xA000_0000, 0x2000_0000] {
            let ts = clock.stamp(tick, &cfg);
            assert!(ts > prev, "timestamp went backwards: {} after {}", ts, prev);
            assert_eq!(clock.last_tick, tick);
            prev = ts;
        }
        assert_eq!(clock.wrap_count, 2);
        let expected = (2.0 * 4_294_967_296.0 + 0x2000_0000u32 as f64) / 1e6;
        assert!((prev - expected).abs() < 1e-6, "ts = {}", prev);
    }

    #[test]
    fn test_late_frame_before_anchor() {
        let cfg = DecoderConfig::default();
        let mut clock = CaptureClock::default();
        clock.anchor(0x0000_0100, 0.0, &cfg);
        let ts = clock.stamp(0xFFFF_FF00, &cfg);
        assert!((ts + 0x200 as f64 / 1e6).abs() < 1e-9, "ts = {}", ts);
        assert_eq!(clock.wrap_count, 0);
        assert_eq!(clock.last_tick, 0x0000_0100);
    }

    #[test]
    fn test_step_back_past_tolerance_is_a_wrap() {
        let cfg = DecoderConfig::default();
        let mut clock = CaptureClock::default();
        clock.anchor(3_000_000, 0.0, &cfg);
        let ts = clock.stamp(1_000_000, &cfg);
        assert_eq!(clock.wrap_count, 1);
        assert_eq!(clock.last_tick, 1_000_000);
        assert!(ts > 0.0);
    }

    #[test]
    fn test_primary_channel_resets_context() {
        let mut state = DecoderState::default();
        state.enter_connection(ConnContext::new(0x50654321, 0x123456));
        let data = Frame::from_raw(raw(0, 5, &[0x01, 0x00]), &mut state);
        assert_eq!(data.access_address, 0x50654321);
        let adv = Frame::from_raw(raw(100, 38, &[0x00, 0x00]), &mut state);
        assert_eq!(adv.access_address, BLE_ADV_AA);
        assert_eq!(state.current_access_address(), BLE_ADV_AA);
    }

    #[test]
    fn test_known_access_address_wins() {
        let mut state = DecoderState::default();
        let mut r = raw(0, 20, &[0x01, 0x00]);
        r.access_address = Some(0xAF9A_8B7C);
        let f = Frame::from_raw(r, &mut state);
        assert_eq!(f.access_address, 0xAF9A_8B7C);
    }
}
