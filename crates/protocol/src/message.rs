// Copyright 2025-2026 CEMAXECUTER LLC

//! Messages delivered by the sniffer firmware.
//!
//! Every message arrives in an envelope `[word_count, type, payload...]`.
//! `word_count` is the serial framing length and is already consumed by the
//! time an envelope reaches [`Message::parse`].

use std::fmt;

use crate::error::{MessageError, Result};
use crate::frame::RawFrame;
use crate::pdu::ChannelMap;
use crate::state::SnifferState;

pub const MSG_PACKET: u8 = 0x10;
pub const MSG_DEBUG: u8 = 0x11;
pub const MSG_MARKER: u8 = 0x12;
pub const MSG_STATE: u8 = 0x13;
pub const MSG_MEASUREMENT: u8 = 0x14;

/// Host marker echoed back by the firmware with its current tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub tick: u32,
    pub token: Vec<u8>,
}

/// Firmware-side measurements of the link it is following
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measurement {
    /// Connection interval, 1.25 ms units
    Interval(u16),
    ChannelMap(ChannelMap),
    /// Advertising hop interval in µs
    AdvHop(u32),
    WinOffset(u16),
    DeltaInstant(u16),
    Version {
        major: u8,
        minor: u8,
        revision: u8,
        api_level: u8,
    },
    Unknown {
        kind: u8,
        data: Vec<u8>,
    },
}

impl Measurement {
    fn parse(p: &[u8]) -> std::result::Result<Self, MessageError> {
        let short = || MessageError::Truncated { kind: "measurement" };
        let (&kind, v) = p.split_first().ok_or_else(short)?;
        let u16_at = |v: &[u8]| -> std::result::Result<u16, MessageError> {
            v.get(..2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .ok_or_else(short)
        };
        let m = match kind {
            0 => Measurement::Interval(u16_at(v)?),
            1 => {
                if v.len() < 5 {
                    return Err(short());
                }
                Measurement::ChannelMap(ChannelMap::from_wire(v))
            }
            2 => {
                let b = v.get(..4).ok_or_else(short)?;
                Measurement::AdvHop(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            3 => Measurement::WinOffset(u16_at(v)?),
            4 => Measurement::DeltaInstant(u16_at(v)?),
            5 => {
                let b = v.get(..4).ok_or_else(short)?;
                Measurement::Version {
                    major: b[0],
                    minor: b[1],
                    revision: b[2],
                    api_level: b[3],
                }
            }
            kind => Measurement::Unknown {
                kind,
                data: v.to_vec(),
            },
        };
        Ok(m)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Interval(i) => write!(f, "Measured Connection Interval: {:.2} ms", *i as f64 * 1.25),
            Measurement::ChannelMap(m) => write!(f, "Measured Channel Map: {}", m),
            Measurement::AdvHop(us) => write!(f, "Measured Advertising Hop: {} us", us),
            Measurement::WinOffset(o) => write!(f, "Measured Window Offset: {}", o),
            Measurement::DeltaInstant(d) => write!(f, "Measured Delta Instant: {}", d),
            Measurement::Version {
                major,
                minor,
                revision,
                api_level,
            } => write!(f, "Firmware Version: {}.{}.{} (API {})", major, minor, revision, api_level),
            Measurement::Unknown { kind, data } => {
                write!(f, "Unknown Measurement {}: {}", kind, crate::pdu::hex(data))
            }
        }
    }
}

/// One decoded firmware message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Packet(RawFrame),
    Debug(String),
    Marker(Marker),
    State(SnifferState),
    Measurement(Measurement),
}

impl Message {
    pub fn parse(envelope: &[u8]) -> Result<Self> {
        if envelope.len() < 2 {
            return Err(MessageError::Short(envelope.len()).into());
        }
        let payload = &envelope[2..];

        let msg = match envelope[1] {
            MSG_PACKET => Message::Packet(RawFrame::parse(payload)?),
            MSG_DEBUG => Message::Debug(String::from_utf8_lossy(payload).into_owned()),
            MSG_MARKER => {
                if payload.len() < 4 {
                    return Err(MessageError::Truncated { kind: "marker" }.into());
                }
                Message::Marker(Marker {
                    tick: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                    token: payload[4..].to_vec(),
                })
            }
            MSG_STATE => {
                let &s = payload
                    .first()
                    .ok_or(MessageError::Truncated { kind: "state" })?;
                Message::State(SnifferState::from_u8(s))
            }
            MSG_MEASUREMENT => Message::Measurement(Measurement::parse(payload)?),
            other => return Err(MessageError::UnknownType(other).into()),
        };
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, FrameError};
    use crate::frame::{Direction, Phy};

    fn envelope(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![((payload.len() + 2 + 3) / 4) as u8, kind];
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn test_packet_message() {
        let frame = RawFrame {
            tick: 42,
            direction: Direction::PeripheralToCentral,
            crc_error: false,
            event: 3,
            rssi: -70,
            channel: 37,
            phy: Phy::CodedS8,
            body: vec![0x00, 0x00],
            crc: None,
            access_address: None,
        };
        let msg = Message::parse(&envelope(MSG_PACKET, &frame.to_bytes())).unwrap();
        assert_eq!(msg, Message::Packet(frame));
    }

    #[test]
    fn test_packet_framing_error_propagates() {
        let err = Message::parse(&envelope(MSG_PACKET, &[1, 2, 3])).unwrap_err();
        assert_eq!(err, Error::Frame(FrameError::ShortHeader(3)));
    }

    #[test]
    fn test_debug_marker_state() {
        assert_eq!(
            Message::parse(&envelope(MSG_DEBUG, b"hello")).unwrap(),
            Message::Debug("hello".into())
        );
        assert_eq!(
            Message::parse(&envelope(MSG_MARKER, &[0x10, 0x27, 0, 0, 0xAB])).unwrap(),
            Message::Marker(Marker { tick: 10_000, token: vec![0xAB] })
        );
        assert_eq!(
            Message::parse(&envelope(MSG_STATE, &[10])).unwrap(),
            Message::State(SnifferState::AdvertisingExt)
        );
        assert_eq!(
            Message::parse(&envelope(MSG_STATE, &[77])).unwrap(),
            Message::State(SnifferState::Unknown(77))
        );
    }

    #[test]
    fn test_measurements() {
        assert_eq!(
            Message::parse(&envelope(MSG_MEASUREMENT, &[0, 24, 0])).unwrap(),
            Message::Measurement(Measurement::Interval(24))
        );
        assert_eq!(
            Message::parse(&envelope(MSG_MEASUREMENT, &[5, 1, 3, 2, 7])).unwrap(),
            Message::Measurement(Measurement::Version { major: 1, minor: 3, revision: 2, api_level: 7 })
        );
        assert_eq!(
            Message::parse(&envelope(MSG_MEASUREMENT, &[9, 1, 2])).unwrap(),
            Message::Measurement(Measurement::Unknown { kind: 9, data: vec![1, 2] })
        );
        assert!(Message::parse(&envelope(MSG_MEASUREMENT, &[2, 1])).is_err());
    }

    #[test]
    fn test_bad_envelopes() {
        assert_eq!(Message::parse(&[1]).unwrap_err(), Error::Message(MessageError::Short(1)));
        assert_eq!(
            Message::parse(&[1, 0x42]).unwrap_err(),
            Error::Message(MessageError::UnknownType(0x42))
        );
        assert!(Message::parse(&envelope(MSG_MARKER, &[1, 2])).is_err());
        assert!(Message::parse(&envelope(MSG_STATE, &[])).is_err());
    }
}
