// Copyright 2025-2026 CEMAXECUTER LLC

//! Decoder state: which link the sniffer is following and which auxiliary
//! responses are currently expected.

use std::fmt;

use crate::config::DecoderConfig;
use crate::crc::reverse24;
use crate::frame::{CaptureClock, Phy};
use crate::{BLE_ADV_AA, BLE_ADV_CRC_INIT};

/// Sniffer firmware state, as reported by state messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnifferState {
    Static,
    AdvertSeek,
    AdvertHop,
    Data,
    Paused,
    Initiating,
    Central,
    Peripheral,
    Advertising,
    Scanning,
    AdvertisingExt,
    Unknown(u8),
}

impl SnifferState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => SnifferState::Static,
            1 => SnifferState::AdvertSeek,
            2 => SnifferState::AdvertHop,
            3 => SnifferState::Data,
            4 => SnifferState::Paused,
            5 => SnifferState::Initiating,
            6 => SnifferState::Central,
            7 => SnifferState::Peripheral,
            8 => SnifferState::Advertising,
            9 => SnifferState::Scanning,
            10 => SnifferState::AdvertisingExt,
            other => SnifferState::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SnifferState::Static => 0,
            SnifferState::AdvertSeek => 1,
            SnifferState::AdvertHop => 2,
            SnifferState::Data => 3,
            SnifferState::Paused => 4,
            SnifferState::Initiating => 5,
            SnifferState::Central => 6,
            SnifferState::Peripheral => 7,
            SnifferState::Advertising => 8,
            SnifferState::Scanning => 9,
            SnifferState::AdvertisingExt => 10,
            SnifferState::Unknown(v) => v,
        }
    }

    /// True for states in which the sniffer is following a connection
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SnifferState::Data | SnifferState::Central | SnifferState::Peripheral
        )
    }
}

impl fmt::Display for SnifferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnifferState::Static => "STATIC",
            SnifferState::AdvertSeek => "ADVERT_SEEK",
            SnifferState::AdvertHop => "ADVERT_HOP",
            SnifferState::Data => "DATA",
            SnifferState::Paused => "PAUSED",
            SnifferState::Initiating => "INITIATING",
            SnifferState::Central => "CENTRAL",
            SnifferState::Peripheral => "PERIPHERAL",
            SnifferState::Advertising => "ADVERTISING",
            SnifferState::Scanning => "SCANNING",
            SnifferState::AdvertisingExt => "ADVERTISING_EXT",
            SnifferState::Unknown(v) => return write!(f, "UNKNOWN({})", v),
        };
        f.write_str(s)
    }
}

/// Access address and CRC seed of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnContext {
    pub access_address: u32,
    /// Bit-reversed CRCInit, ready to seed the CRC register
    pub crc_init_rev: u32,
}

impl ConnContext {
    /// Build from a CRCInit as carried in the connect request
    pub fn new(access_address: u32, crc_init: u32) -> Self {
        Self {
            access_address,
            crc_init_rev: reverse24(crc_init & 0xFFFFFF),
        }
    }

    pub fn advertising() -> Self {
        Self::new(BLE_ADV_AA, BLE_ADV_CRC_INIT)
    }
}

/// Which link context frames are decoded against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Advertising,
    /// A connect request was seen; the link takes effect once confirmed
    ConnectionPending(ConnContext),
    Connected(ConnContext),
}

/// Advertising Data Info: 12-bit data identifier and 4-bit set identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Adi {
    pub did: u16,
    pub sid: u8,
}

impl Adi {
    pub fn from_le(v: u16) -> Self {
        Self {
            did: v & 0x0FFF,
            sid: (v >> 12) as u8,
        }
    }
}

/// An expected auxiliary PDU: where, by when, and for which advertising set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxWindow {
    pub adi: Option<Adi>,
    pub channel: u8,
    /// Session time in seconds after which the window is stale
    pub deadline: f64,
}

impl AuxWindow {
    /// A missing ADI on either side does not rule a frame out
    fn matches(&self, channel: u8, ts: f64, adi: Option<Adi>) -> bool {
        if self.channel != channel || ts > self.deadline {
            return false;
        }
        match (self.adi, adi) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// What an ambiguous secondary-channel PDU (type 7) turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    AdvInd,
    ScanRsp,
    ChainInd,
}

/// Mutable context for a capture session
#[derive(Debug, Clone)]
pub struct DecoderState {
    pub config: DecoderConfig,
    pub clock: CaptureClock,
    link: LinkState,
    scan_rsp_window: Option<AuxWindow>,
    chain_window: Option<AuxWindow>,
    last_state: Option<SnifferState>,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl DecoderState {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            clock: CaptureClock::default(),
            link: LinkState::Advertising,
            scan_rsp_window: None,
            chain_window: None,
            last_state: None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    /// Context frames are currently decoded against
    pub fn current(&self) -> ConnContext {
        match self.link {
            LinkState::Connected(c) => c,
            LinkState::Advertising | LinkState::ConnectionPending(_) => ConnContext::advertising(),
        }
    }

    pub fn current_access_address(&self) -> u32 {
        self.current().access_address
    }

    pub fn crc_init_reversed(&self) -> u32 {
        self.current().crc_init_rev
    }

    pub fn is_advertising(&self) -> bool {
        !matches!(self.link, LinkState::Connected(_))
    }

    pub fn pending_connection(&self) -> Option<ConnContext> {
        match self.link {
            LinkState::ConnectionPending(c) => Some(c),
            _ => None,
        }
    }

    pub fn pending_scan_rsp(&self) -> Option<AuxWindow> {
        self.scan_rsp_window
    }

    pub fn pending_chain(&self) -> Option<AuxWindow> {
        self.chain_window
    }

    pub fn last_sniffer_state(&self) -> Option<SnifferState> {
        self.last_state
    }

    /// CRC seed for a frame carrying `access_address`, if it belongs to a known link
    pub fn crc_seed_for(&self, access_address: u32) -> Option<u32> {
        if access_address == BLE_ADV_AA {
            return Some(ConnContext::advertising().crc_init_rev);
        }
        let cur = self.current();
        if access_address == cur.access_address {
            return Some(cur.crc_init_rev);
        }
        self.pending_connection()
            .filter(|c| c.access_address == access_address)
            .map(|c| c.crc_init_rev)
    }

    /// Return to the advertising context. Any pending connection is dropped.
    pub fn reset_adv(&mut self) {
        if let LinkState::Connected(c) = self.link {
            log::debug!("leaving connection AA=0x{:08X}", c.access_address);
        }
        self.link = LinkState::Advertising;
    }

    /// Start following `conn` immediately
    pub fn enter_connection(&mut self, conn: ConnContext) {
        log::info!(
            "following connection AA=0x{:08X} CRCInit=0x{:06X}",
            conn.access_address,
            reverse24(conn.crc_init_rev)
        );
        self.link = LinkState::Connected(conn);
    }

    /// A CONNECT_IND (primary channel) or AUX_CONNECT_REQ (secondary) was decoded.
    ///
    /// Legacy requests wait for the sniffer to report the connection. Extended
    /// requests wait for AUX_CONNECT_RSP, unless the sniffer itself is the
    /// extended advertiser, in which case the link starts now.
    pub fn on_connect_request(&mut self, conn: ConnContext, primary: bool) {
        if !primary && self.last_state == Some(SnifferState::AdvertisingExt) {
            self.enter_connection(conn);
            return;
        }
        log::debug!(
            "connection AA=0x{:08X} pending confirmation",
            conn.access_address
        );
        self.link = LinkState::ConnectionPending(conn);
    }

    /// AUX_CONNECT_RSP commits a pending extended connection
    pub fn on_aux_connect_rsp(&mut self) {
        if let LinkState::ConnectionPending(c) = self.link {
            self.enter_connection(c);
        }
    }

    /// A state message arrived from the sniffer
    pub fn on_state(&mut self, state: SnifferState) {
        let prev = self.last_state.replace(state);
        log::debug!(
            "sniffer state {} -> {}",
            prev.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            state
        );
        if state.is_connected() {
            if let LinkState::ConnectionPending(c) = self.link {
                self.enter_connection(c);
            }
        }
    }

    /// Drop windows whose deadline has passed. Call once per frame before matching.
    pub fn on_tick(&mut self, now: f64) {
        if self.scan_rsp_window.map_or(false, |w| now > w.deadline) {
            log::trace!("scan response window expired");
            self.scan_rsp_window = None;
        }
        if self.chain_window.map_or(false, |w| now > w.deadline) {
            log::trace!("chain window expired");
            self.chain_window = None;
        }
    }

    /// Classify a secondary-channel type-7 PDU, consuming the window it answers.
    /// The scan response window is checked before the chain window.
    pub fn resolve_aux(&mut self, ts: f64, channel: u8, adi: Option<Adi>) -> AuxKind {
        if let Some(w) = self.scan_rsp_window {
            if w.matches(channel, ts, adi) {
                self.scan_rsp_window = None;
                return AuxKind::ScanRsp;
            }
        }
        if let Some(w) = self.chain_window {
            if w.matches(channel, ts, adi) {
                self.chain_window = None;
                return AuxKind::ChainInd;
            }
        }
        AuxKind::AdvInd
    }

    /// Open the windows an auxiliary PDU implies.
    ///
    /// * `aux_ptr` (channel, offset in µs) opens a chain window.
    /// * A scannable AUX_ADV_IND (`scannable`) opens a scan response window on
    ///   the same channel, sized to fit AUX_SCAN_REQ and the response start.
    pub fn on_aux_adv(
        &mut self,
        ts: f64,
        channel: u8,
        phy: Phy,
        body_len: usize,
        adi: Option<Adi>,
        scannable: bool,
        aux_ptr: Option<(u8, u32)>,
    ) {
        if let Some((aux_chan, offset_us)) = aux_ptr {
            let deadline = ts + (offset_us as f64 + self.config.chain_margin_us) * 1e-6;
            self.chain_window = Some(AuxWindow {
                adi,
                channel: aux_chan,
                deadline,
            });
        }

        if scannable {
            // AUX_SCAN_REQ: header + ScanA + AdvA
            const SCAN_REQ_BODY: usize = 14;
            let span_us = phy.airtime_us(body_len)
                + self.config.ifs_us
                + phy.airtime_us(SCAN_REQ_BODY)
                + self.config.ifs_us
                + self.config.scan_rsp_tolerance_us;
            self.scan_rsp_window = Some(AuxWindow {
                adi,
                channel,
                deadline: ts + span_us * 1e-6,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADI: Adi = Adi { did: 0x123, sid: 4 };

    #[test]
    fn test_sniffer_state_codes() {
        for v in 0..=12u8 {
            assert_eq!(SnifferState::from_u8(v).as_u8(), v);
        }
        assert_eq!(SnifferState::from_u8(10), SnifferState::AdvertisingExt);
        assert_eq!(SnifferState::from_u8(42), SnifferState::Unknown(42));
        assert!(SnifferState::Central.is_connected());
        assert!(!SnifferState::Initiating.is_connected());
    }

    #[test]
    fn test_advertising_defaults() {
        let s = DecoderState::default();
        assert_eq!(s.current_access_address(), BLE_ADV_AA);
        assert_eq!(s.crc_init_reversed(), 0xAAAAAA);
        assert!(s.is_advertising());
    }

    #[test]
    fn test_adi_fields() {
        let adi = Adi::from_le(0x4123);
        assert_eq!(adi, ADI);
    }

    #[test]
    fn test_legacy_connect_waits_for_state() {
        let mut s = DecoderState::default();
        let conn = ConnContext::new(0x5065_4321, 0x0A0B0C);
        s.on_connect_request(conn, true);
        assert_eq!(s.current_access_address(), BLE_ADV_AA, "must not switch before confirmation");
        assert_eq!(s.pending_connection(), Some(conn));

        s.on_state(SnifferState::AdvertHop);
        assert_eq!(s.current_access_address(), BLE_ADV_AA);

        s.on_state(SnifferState::Data);
        assert_eq!(s.current_access_address(), 0x5065_4321);
        assert_eq!(s.crc_init_reversed(), reverse24(0x0A0B0C));
        assert_eq!(s.pending_connection(), None);
    }

    #[test]
    fn test_aux_connect_req_waits_for_rsp() {
        let mut s = DecoderState::default();
        let conn = ConnContext::new(0x1234_5678, 0x112233);
        s.on_connect_request(conn, false);
        assert_eq!(s.current_access_address(), BLE_ADV_AA);
        s.on_aux_connect_rsp();
        assert_eq!(s.current_access_address(), 0x1234_5678);
    }

    #[test]
    fn test_aux_connect_req_as_ext_advertiser() {
        let mut s = DecoderState::default();
        s.on_state(SnifferState::AdvertisingExt);
        s.on_connect_request(ConnContext::new(0x1234_5678, 0x112233), false);
        assert_eq!(s.current_access_address(), 0x1234_5678);
    }

    #[test]
    fn test_stray_aux_connect_rsp_ignored() {
        let mut s = DecoderState::default();
        s.on_aux_connect_rsp();
        assert_eq!(s.link_state(), LinkState::Advertising);
    }

    #[test]
    fn test_reset_adv() {
        let mut s = DecoderState::default();
        s.enter_connection(ConnContext::new(0xDEAD_BEEF, 1));
        assert!(!s.is_advertising());
        s.reset_adv();
        assert_eq!(s.current_access_address(), BLE_ADV_AA);
        assert_eq!(s.crc_init_reversed(), reverse24(BLE_ADV_CRC_INIT));
    }

    #[test]
    fn test_crc_seed_lookup() {
        let mut s = DecoderState::default();
        let conn = ConnContext::new(0x1111_2222, 0x123456);
        s.on_connect_request(conn, true);
        assert_eq!(s.crc_seed_for(BLE_ADV_AA), Some(0xAAAAAA));
        assert_eq!(s.crc_seed_for(0x1111_2222), Some(reverse24(0x123456)));
        assert_eq!(s.crc_seed_for(0x3333_4444), None);
    }

    #[test]
    fn test_scan_rsp_window() {
        let mut s = DecoderState::default();
        s.on_aux_adv(1.0, 20, Phy::Phy1M, 30, Some(ADI), true, None);
        let w = s.pending_scan_rsp().unwrap();
        // 304 + 150 + 176 + 150 + 50 µs
        assert!((w.deadline - 1.000830).abs() < 1e-9, "deadline {}", w.deadline);

        // wrong channel, then wrong set
        assert_eq!(s.resolve_aux(1.0005, 21, Some(ADI)), AuxKind::AdvInd);
        assert_eq!(s.resolve_aux(1.0005, 20, Some(Adi { did: 1, sid: 4 })), AuxKind::AdvInd);
        assert!(s.pending_scan_rsp().is_some());

        assert_eq!(s.resolve_aux(1.0005, 20, Some(ADI)), AuxKind::ScanRsp);
        assert!(s.pending_scan_rsp().is_none(), "match must clear the window");
    }

    #[test]
    fn test_scan_rsp_window_expires() {
        let mut s = DecoderState::default();
        s.on_aux_adv(1.0, 20, Phy::Phy1M, 30, Some(ADI), true, None);
        s.on_tick(1.01);
        assert!(s.pending_scan_rsp().is_none());
        assert_eq!(s.resolve_aux(1.01, 20, Some(ADI)), AuxKind::AdvInd);
    }

    #[test]
    fn test_chain_window_timing() {
        let mut s = DecoderState::default();
        // AuxPtr to channel 9, 3 ms out
        s.on_aux_adv(2.0, 20, Phy::Phy2M, 40, Some(ADI), false, Some((9, 3_000)));
        assert!(s.pending_scan_rsp().is_none());
        let w = s.pending_chain().unwrap();
        assert_eq!(w.channel, 9);
        assert!((w.deadline - 2.0035).abs() < 1e-9);

        s.on_tick(2.003);
        assert_eq!(s.resolve_aux(2.003, 9, Some(ADI)), AuxKind::ChainInd);
        assert!(s.pending_chain().is_none());
    }

    #[test]
    fn test_chain_window_timeout() {
        let mut s = DecoderState::default();
        s.on_aux_adv(2.0, 20, Phy::Phy1M, 40, Some(ADI), false, Some((9, 3_000)));
        s.on_tick(2.004);
        assert!(s.pending_chain().is_none(), "stale chain window must be cleared");
        assert_eq!(s.resolve_aux(2.004, 9, Some(ADI)), AuxKind::AdvInd);
    }

    #[test]
    fn test_scan_rsp_checked_before_chain() {
        let mut s = DecoderState::default();
        s.on_aux_adv(1.0, 20, Phy::Phy1M, 30, Some(ADI), true, Some((20, 300)));
        assert_eq!(s.resolve_aux(1.0003, 20, Some(ADI)), AuxKind::ScanRsp);
        assert_eq!(s.resolve_aux(1.0004, 20, Some(ADI)), AuxKind::ChainInd);
        assert_eq!(s.resolve_aux(1.0005, 20, Some(ADI)), AuxKind::AdvInd);
    }

    #[test]
    fn test_missing_adi_still_matches() {
        let mut s = DecoderState::default();
        s.on_aux_adv(1.0, 20, Phy::Phy1M, 30, Some(ADI), true, None);
        assert_eq!(s.resolve_aux(1.0005, 20, None), AuxKind::ScanRsp);
    }
}
