// Copyright 2025-2026 CEMAXECUTER LLC

use serde::{Deserialize, Serialize};

/// Tunables for timestamp reconstruction and auxiliary window matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Hardware tick rate in Hz (1 tick = 1 µs on the sniffer firmware)
    pub tick_rate_hz: f64,
    /// Inter-frame space in microseconds
    pub ifs_us: f64,
    /// Slack added to the scan response window
    pub scan_rsp_tolerance_us: f64,
    /// Slack added after an AuxPtr offset before the chain window closes
    pub chain_margin_us: f64,
    /// How far behind the newest tick a frame may arrive and still count as
    /// late rather than as a counter wrap
    pub late_tolerance_us: f64,
}

impl DecoderConfig {
    /// Seconds for one full 32-bit tick counter period
    pub fn wrap_period(&self) -> f64 {
        4_294_967_296.0 / self.tick_rate_hz
    }

    /// [`late_tolerance_us`](Self::late_tolerance_us) in hardware ticks
    pub fn late_tolerance_ticks(&self) -> u32 {
        (self.late_tolerance_us * self.tick_rate_hz / 1e6).clamp(0.0, u32::MAX as f64) as u32
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 1_000_000.0,
            ifs_us: 150.0,
            scan_rsp_tolerance_us: 50.0,
            chain_margin_us: 500.0,
            late_tolerance_us: 1_000_000.0,
        }
    }
}
