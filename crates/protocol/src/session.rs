// Copyright 2025-2026 CEMAXECUTER LLC

//! Capture session driver: one decoder state fed one frame at a time.

use crate::config::DecoderConfig;
use crate::error::Result;
use crate::frame::{wall_clock_now, Frame, RawFrame};
use crate::message::{Marker, Measurement, Message};
use crate::pdu::{self, DecodedPacket};
use crate::state::{DecoderState, SnifferState};

/// Running counters for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets: u64,
    pub framing_errors: u64,
    pub decode_errors: u64,
    pub crc_checked: u64,
    pub crc_valid: u64,
    pub messages: u64,
}

/// What a firmware message turned into
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Packet(DecodedPacket),
    Debug(String),
    Marker(Marker),
    State(SnifferState),
    Measurement(Measurement),
}

/// A frame from a parallel producer, stamped with a sortable capture time
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Capture time in µs on a clock shared by all producers
    pub time_us: u64,
    pub frame: RawFrame,
}

/// Flatten per-producer batches into one sequence ordered by capture time.
/// Equal times keep producer order.
pub fn merge_by_time(batches: Vec<Vec<Candidate>>) -> Vec<RawFrame> {
    let mut all: Vec<Candidate> = batches.into_iter().flatten().collect();
    all.sort_by_key(|c| c.time_us);
    all.into_iter().map(|c| c.frame).collect()
}

pub struct CaptureSession {
    state: DecoderState,
    stats: SessionStats,
}

impl CaptureSession {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            state: DecoderState::new(config),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Pin the timestamp epoch to `epoch` seconds at `tick`, if nothing has anchored it yet
    pub fn anchor(&mut self, tick: u32, epoch: f64) {
        self.state.clock.anchor(tick, epoch, &self.state.config);
    }

    /// Decode one frame against the session state
    pub fn process_frame(&mut self, raw: RawFrame) -> DecodedPacket {
        let frame = Frame::from_raw(raw, &mut self.state);
        let pkt = pdu::decode(frame, &mut self.state);

        self.stats.packets += 1;
        if pkt.pdu.is_err() {
            self.stats.decode_errors += 1;
        }
        if let Some(ok) = pkt.crc_valid {
            self.stats.crc_checked += 1;
            if ok {
                self.stats.crc_valid += 1;
            }
        }
        pkt
    }

    /// Decode the frames of several producers in capture-time order
    pub fn process_candidates(&mut self, batches: Vec<Vec<Candidate>>) -> Vec<DecodedPacket> {
        merge_by_time(batches)
            .into_iter()
            .map(|f| self.process_frame(f))
            .collect()
    }

    /// Handle one firmware message envelope.
    ///
    /// A message that cannot be framed is dropped with a warning and counted;
    /// the session carries on with the next one.
    pub fn handle_message(&mut self, envelope: &[u8]) -> Result<SessionEvent> {
        self.stats.messages += 1;
        let msg = match Message::parse(envelope) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping message: {}", e);
                self.stats.framing_errors += 1;
                return Err(e);
            }
        };

        let event = match msg {
            Message::Packet(raw) => SessionEvent::Packet(self.process_frame(raw)),
            Message::Debug(text) => {
                log::debug!("firmware: {}", text);
                SessionEvent::Debug(text)
            }
            Message::Marker(marker) => {
                if self.state.clock.is_anchored() {
                    // keep the wrap tracker current
                    self.state.clock.stamp(marker.tick, &self.state.config);
                } else {
                    self.anchor(marker.tick, wall_clock_now());
                }
                SessionEvent::Marker(marker)
            }
            Message::State(s) => {
                self.state.on_state(s);
                SessionEvent::State(s)
            }
            Message::Measurement(m) => {
                log::debug!("{}", m);
                SessionEvent::Measurement(m)
            }
        };
        Ok(event)
    }

    /// Count a framing error found outside [`handle_message`](Self::handle_message)
    pub fn record_framing_error(&mut self) {
        self.stats.framing_errors += 1;
    }

    /// Forget the followed link, open windows and clock anchor
    pub fn reset(&mut self) {
        let config = self.state.config.clone();
        self.state = DecoderState::new(config);
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}
