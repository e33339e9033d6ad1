// Copyright 2025-2026 CEMAXECUTER LLC

//! Link-layer PDU decoding.
//!
//! A frame whose access address is the advertising address decodes into the
//! advertising family, anything else into the data channel family. Decoding
//! advertising PDUs feeds connection and auxiliary-window events back into
//! [`DecoderState`].

pub mod adv;
pub mod control;
pub mod data;
pub mod ext;

use std::fmt;

use crate::crc::crc24_rev;
use crate::error::DecodeError;
use crate::frame::Frame;
use crate::state::DecoderState;
use crate::BLE_ADV_AA;

pub use adv::{AdvHeader, AdvPayload, ConnectRequest, DirectAdv, LlData, RawAdv, ScanRequest};
pub use control::{ControlFields, ControlOpcode, ControlPdu};
pub use data::{DataHeader, DataPdu, Llid};
pub use ext::{AdvMode, AuxPtr, ExtAdv, ExtHeader, SecondaryPhy, SyncInfo};

/// Device address in over-the-air byte order (LSB first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub octets: [u8; 6],
    pub random: bool,
}

impl DeviceAddress {
    /// `bytes` must hold at least six octets
    pub fn from_wire(bytes: &[u8], random: bool) -> Self {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[..6]);
        Self { octets, random }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.octets;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            o[5],
            o[4],
            o[3],
            o[2],
            o[1],
            o[0],
            if self.random { "random" } else { "public" }
        )
    }
}

/// 37-bit data channel map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMap(pub u64);

impl ChannelMap {
    /// `bytes` must hold at least five octets; bits above 36 are dropped
    pub fn from_wire(bytes: &[u8]) -> Self {
        let mut v = 0u64;
        for (i, &b) in bytes[..5].iter().enumerate() {
            v |= (b as u64) << (8 * i);
        }
        ChannelMap(v & 0x1F_FFFF_FFFF)
    }

    pub fn is_used(&self, channel: u8) -> bool {
        channel < 37 && self.0 & (1 << channel) != 0
    }

    pub fn used_channels(&self) -> Vec<u8> {
        (0..37).filter(|&c| self.is_used(c)).collect()
    }
}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:010X} ({} channels)", self.0, self.used_channels().len())
    }
}

/// Constant Tone Extension info (extended header or data PDU CTEInfo octet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CteInfo {
    /// Length in 8 µs units
    pub time: u8,
    pub cte_type: u8,
}

impl CteInfo {
    pub fn from_octet(b: u8) -> Self {
        Self {
            time: b & 0x1F,
            cte_type: b >> 6,
        }
    }
}

/// Check that `body` holds `needed` octets for `pdu`
pub(crate) fn need(body: &[u8], needed: usize, pdu: &'static str) -> Result<(), DecodeError> {
    if body.len() < needed {
        return Err(DecodeError::Truncated {
            pdu,
            needed,
            available: body.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u16(b: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([b[pos], b[pos + 1]])
}

pub(crate) fn read_u24(b: &[u8], pos: usize) -> u32 {
    b[pos] as u32 | (b[pos + 1] as u32) << 8 | (b[pos + 2] as u32) << 16
}

pub(crate) fn read_u32(b: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([b[pos], b[pos + 1], b[pos + 2], b[pos + 3]])
}

/// Space-separated hex
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Offset-prefixed hex dump, 16 octets per line
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("{:04x}: {}", i * 16, hex(chunk)));
    }
    out
}

/// A decoded link-layer PDU
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    AdvInd(AdvPayload),
    AdvDirectInd(DirectAdv),
    AdvNonconnInd(AdvPayload),
    ScanReq(ScanRequest),
    ScanRsp(AdvPayload),
    ConnectInd(ConnectRequest),
    AdvScanInd(AdvPayload),
    AdvExtInd(ExtAdv),
    AuxScanReq(ScanRequest),
    AuxConnectReq(ConnectRequest),
    AuxAdvInd(ExtAdv),
    AuxScanRsp(ExtAdv),
    AuxChainInd(ExtAdv),
    AuxConnectRsp(ExtAdv),
    /// Advertising PDU type not valid on the channel it was seen on
    AdvUnknown(RawAdv),
    DataReserved(DataPdu),
    DataContinuation(DataPdu),
    DataStart(DataPdu),
    Control(ControlPdu),
}

impl Pdu {
    pub fn name(&self) -> &'static str {
        match self {
            Pdu::AdvInd(_) => "ADV_IND",
            Pdu::AdvDirectInd(_) => "ADV_DIRECT_IND",
            Pdu::AdvNonconnInd(_) => "ADV_NONCONN_IND",
            Pdu::ScanReq(_) => "SCAN_REQ",
            Pdu::ScanRsp(_) => "SCAN_RSP",
            Pdu::ConnectInd(_) => "CONNECT_IND",
            Pdu::AdvScanInd(_) => "ADV_SCAN_IND",
            Pdu::AdvExtInd(_) => "ADV_EXT_IND",
            Pdu::AuxScanReq(_) => "AUX_SCAN_REQ",
            Pdu::AuxConnectReq(_) => "AUX_CONNECT_REQ",
            Pdu::AuxAdvInd(_) => "AUX_ADV_IND",
            Pdu::AuxScanRsp(_) => "AUX_SCAN_RSP",
            Pdu::AuxChainInd(_) => "AUX_CHAIN_IND",
            Pdu::AuxConnectRsp(_) => "AUX_CONNECT_RSP",
            Pdu::AdvUnknown(_) => "ADV_UNKNOWN",
            Pdu::DataReserved(_) => "LL_DATA_RESERVED",
            Pdu::DataContinuation(_) => "LL_DATA_CONT",
            Pdu::DataStart(_) => "LL_DATA_START",
            Pdu::Control(_) => "LL_CONTROL",
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Pdu::DataReserved(_) | Pdu::DataContinuation(_) | Pdu::DataStart(_) | Pdu::Control(_)
        )
    }

    /// Advertiser address, when the PDU carries one
    pub fn adv_address(&self) -> Option<DeviceAddress> {
        match self {
            Pdu::AdvInd(p) | Pdu::AdvNonconnInd(p) | Pdu::ScanRsp(p) | Pdu::AdvScanInd(p) => {
                Some(p.adv_a)
            }
            Pdu::AdvDirectInd(p) => Some(p.adv_a),
            Pdu::ScanReq(p) | Pdu::AuxScanReq(p) => Some(p.adv_a),
            Pdu::ConnectInd(p) | Pdu::AuxConnectReq(p) => Some(p.adv_a),
            Pdu::AdvExtInd(p)
            | Pdu::AuxAdvInd(p)
            | Pdu::AuxScanRsp(p)
            | Pdu::AuxChainInd(p)
            | Pdu::AuxConnectRsp(p) => p.ext.adv_a,
            _ => None,
        }
    }
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pdu::AdvInd(p) | Pdu::AdvNonconnInd(p) | Pdu::ScanRsp(p) | Pdu::AdvScanInd(p) => {
                write!(f, "{}  {}", self.name(), p)
            }
            Pdu::AdvDirectInd(p) => write!(f, "{}  {}", self.name(), p),
            Pdu::ScanReq(p) | Pdu::AuxScanReq(p) => write!(f, "{}  {}", self.name(), p),
            Pdu::ConnectInd(p) | Pdu::AuxConnectReq(p) => write!(f, "{}  {}", self.name(), p),
            Pdu::AdvExtInd(p)
            | Pdu::AuxAdvInd(p)
            | Pdu::AuxScanRsp(p)
            | Pdu::AuxChainInd(p)
            | Pdu::AuxConnectRsp(p) => write!(f, "{}  {}", self.name(), p),
            Pdu::AdvUnknown(p) => write!(f, "{}  {}", self.name(), p),
            Pdu::DataReserved(p) | Pdu::DataContinuation(p) | Pdu::DataStart(p) => {
                write!(f, "{}  {}", self.name(), p)
            }
            Pdu::Control(p) => write!(f, "{}  {}", self.name(), p),
        }
    }
}

/// A frame together with its decode result
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub frame: Frame,
    pub pdu: Result<Pdu, DecodeError>,
    /// `Some` when the frame carried a CRC and its link's seed is known
    pub crc_valid: Option<bool>,
    /// Bit-reversed CRC seed of the link the frame belongs to, if known
    pub crc_init_rev: Option<u32>,
}

impl DecodedPacket {
    /// CRC as transmitted: the received one, else recomputed from the link's seed
    pub fn wire_crc(&self) -> Option<u32> {
        self.frame
            .crc
            .or_else(|| self.crc_init_rev.map(|seed| crc24_rev(&self.frame.body, seed)))
    }

    /// Computed CRC result, falling back to the source's own CRC flag
    pub fn crc_ok(&self) -> bool {
        self.crc_valid.unwrap_or(!self.frame.crc_error)
    }
}

impl fmt::Display for DecodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fr = &self.frame;
        write!(
            f,
            "Timestamp: {:.6}  Length: {}  RSSI: {}  Channel: {}  PHY: {}",
            fr.ts,
            fr.body.len(),
            fr.rssi,
            fr.channel,
            fr.phy
        )?;
        if fr.access_address != BLE_ADV_AA {
            write!(f, "  Event: {}  Dir: {}", fr.event, fr.direction)?;
        }
        if let Some(addr) = self.pdu.as_ref().ok().and_then(Pdu::adv_address) {
            write!(f, "  AdvA: {}", addr)?;
        }
        match self.crc_valid {
            Some(true) => write!(f, "  CRC: ok")?,
            Some(false) => write!(f, "  CRC: BAD")?,
            None if fr.crc_error => write!(f, "  CRC: BAD")?,
            None => {}
        }
        writeln!(f)?;

        match &self.pdu {
            Ok(pdu) => writeln!(f, "{}", pdu)?,
            Err(e) => {
                writeln!(f, "<decode error: {}>", e)?;
                let header = &fr.body[..fr.body.len().min(2)];
                writeln!(f, "    Header: {}", hex(header))?;
            }
        }
        write!(f, "{}", hexdump(&fr.body))
    }
}

/// Decode one frame against `state`, applying the state transitions the PDU implies.
pub fn decode(frame: Frame, state: &mut DecoderState) -> DecodedPacket {
    state.on_tick(frame.ts);

    let crc_init_rev = state.crc_seed_for(frame.access_address);
    let crc_valid = match (frame.crc, crc_init_rev) {
        (Some(rx), Some(seed)) => Some(crc24_rev(&frame.body, seed) == rx),
        _ => None,
    };

    let pdu = if frame.access_address == BLE_ADV_AA {
        adv::decode(&frame, state)
    } else {
        data::decode(&frame)
    };

    match &pdu {
        Ok(p) => log::trace!("ch {} {:.6}: {}", frame.channel, frame.ts, p.name()),
        Err(e) => log::debug!("ch {} {:.6}: {}", frame.channel, frame.ts, e),
    }

    DecodedPacket {
        frame,
        pdu,
        crc_valid,
        crc_init_rev,
    }
}
