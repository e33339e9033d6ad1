// Copyright 2025-2026 CEMAXECUTER LLC

//! Common Extended Advertising Payload Format.

use std::fmt;

use super::adv::AdvHeader;
use super::{hex, need, read_u16, read_u24, read_u32, ChannelMap, CteInfo, DeviceAddress};
use crate::error::DecodeError;
use crate::state::Adi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvMode {
    NonConnectableNonScannable,
    Connectable,
    Scannable,
    Reserved,
}

impl AdvMode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AdvMode::NonConnectableNonScannable,
            1 => AdvMode::Connectable,
            2 => AdvMode::Scannable,
            _ => AdvMode::Reserved,
        }
    }
}

impl fmt::Display for AdvMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdvMode::NonConnectableNonScannable => "Non-connectable Non-scannable",
            AdvMode::Connectable => "Connectable",
            AdvMode::Scannable => "Scannable",
            AdvMode::Reserved => "Reserved",
        };
        f.write_str(s)
    }
}

/// PHY of the auxiliary packet an AuxPtr points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryPhy {
    Le1M,
    Le2M,
    LeCoded,
    Reserved(u8),
}

impl fmt::Display for SecondaryPhy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecondaryPhy::Le1M => f.write_str("1M"),
            SecondaryPhy::Le2M => f.write_str("2M"),
            SecondaryPhy::LeCoded => f.write_str("Coded"),
            SecondaryPhy::Reserved(v) => write!(f, "Reserved({})", v),
        }
    }
}

/// AuxPtr: pointer to the next auxiliary packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxPtr {
    pub channel: u8,
    /// Clock accuracy bit set: 0-50 ppm, clear: 51-500 ppm
    pub ca: bool,
    /// Offset unit flag: 300 µs when set, 30 µs otherwise
    pub offset_units: bool,
    pub aux_offset: u16,
    pub phy: SecondaryPhy,
}

impl AuxPtr {
    /// `b` must hold three octets
    pub fn from_wire(b: &[u8]) -> Self {
        let raw = read_u24(b, 0);
        let phy = match (raw >> 21) & 0x07 {
            0 => SecondaryPhy::Le1M,
            1 => SecondaryPhy::Le2M,
            2 => SecondaryPhy::LeCoded,
            other => SecondaryPhy::Reserved(other as u8),
        };
        Self {
            channel: (raw & 0x3F) as u8,
            ca: (raw >> 6) & 0x01 != 0,
            offset_units: (raw >> 7) & 0x01 != 0,
            aux_offset: ((raw >> 8) & 0x1FFF) as u16,
            phy,
        }
    }

    pub fn offset_usec(&self) -> u32 {
        self.aux_offset as u32 * if self.offset_units { 300 } else { 30 }
    }
}

/// SyncInfo: periodic advertising train parameters (18 octets)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInfo {
    pub sync_packet_offset: u16,
    pub offset_units: bool,
    pub offset_adjust: bool,
    /// Periodic interval in 1.25 ms units
    pub interval: u16,
    pub channel_map: ChannelMap,
    pub sca: u8,
    pub access_address: u32,
    pub crc_init: u32,
    pub event_counter: u16,
}

impl SyncInfo {
    pub const LEN: usize = 18;

    /// `b` must hold [`SyncInfo::LEN`] octets
    pub fn from_wire(b: &[u8]) -> Self {
        let v = read_u16(b, 0);
        Self {
            sync_packet_offset: v & 0x1FFF,
            offset_units: (v >> 13) & 0x01 != 0,
            offset_adjust: (v >> 14) & 0x01 != 0,
            interval: read_u16(b, 2),
            channel_map: ChannelMap::from_wire(&b[4..9]),
            sca: b[8] >> 5,
            access_address: read_u32(b, 9),
            crc_init: read_u24(b, 13),
            event_counter: read_u16(b, 16),
        }
    }

    pub fn offset_usec(&self) -> u32 {
        let unit = if self.offset_units { 300 } else { 30 };
        let adjust = if self.offset_adjust { 2_457_600 } else { 0 };
        self.sync_packet_offset as u32 * unit + adjust
    }
}

/// Extended header fields. Absent fields are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtHeader {
    pub adv_mode: AdvMode,
    /// Declared extended header length (flags byte onwards)
    pub length: u8,
    pub flags: u8,
    pub adv_a: Option<DeviceAddress>,
    pub target_a: Option<DeviceAddress>,
    pub cte_info: Option<CteInfo>,
    pub adi: Option<Adi>,
    pub aux_ptr: Option<AuxPtr>,
    pub sync_info: Option<SyncInfo>,
    pub tx_power: Option<i8>,
    pub acad: Vec<u8>,
}

/// Sequential reader bounded by the declared extended header length
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn take(&mut self, present: bool, n: usize, field: &'static str) -> Result<Option<&'a [u8]>, DecodeError> {
        if !present {
            return Ok(None);
        }
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::ExtFieldOverrun { field });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(Some(s))
    }
}

impl ExtHeader {
    /// Parse the extended header proper (`hdr` starts at the flags byte)
    fn parse(adv_mode: AdvMode, hdr: &[u8], tx_add: bool, rx_add: bool) -> Result<Self, DecodeError> {
        let mut out = ExtHeader {
            adv_mode,
            length: hdr.len() as u8,
            flags: 0,
            adv_a: None,
            target_a: None,
            cte_info: None,
            adi: None,
            aux_ptr: None,
            sync_info: None,
            tx_power: None,
            acad: Vec::new(),
        };
        if hdr.is_empty() {
            return Ok(out);
        }

        let flags = hdr[0];
        out.flags = flags;
        let mut r = FieldReader { buf: hdr, pos: 1 };

        // Fields appear in fixed order when their flag bit is set
        out.adv_a = r
            .take(flags & 0x01 != 0, 6, "AdvA")?
            .map(|b| DeviceAddress::from_wire(b, tx_add));
        out.target_a = r
            .take(flags & 0x02 != 0, 6, "TargetA")?
            .map(|b| DeviceAddress::from_wire(b, rx_add));
        out.cte_info = r
            .take(flags & 0x04 != 0, 1, "CTEInfo")?
            .map(|b| CteInfo::from_octet(b[0]));
        out.adi = r
            .take(flags & 0x08 != 0, 2, "ADI")?
            .map(|b| Adi::from_le(read_u16(b, 0)));
        out.aux_ptr = r.take(flags & 0x10 != 0, 3, "AuxPtr")?.map(AuxPtr::from_wire);
        out.sync_info = r
            .take(flags & 0x20 != 0, SyncInfo::LEN, "SyncInfo")?
            .map(SyncInfo::from_wire);
        out.tx_power = r.take(flags & 0x40 != 0, 1, "TxPower")?.map(|b| b[0] as i8);
        out.acad = hdr[r.pos..].to_vec();

        Ok(out)
    }
}

/// Any PDU using the common extended advertising payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtAdv {
    pub header: AdvHeader,
    pub ext: ExtHeader,
    /// Everything after the declared extended header
    pub adv_data: Vec<u8>,
}

impl ExtAdv {
    pub fn parse(header: AdvHeader, body: &[u8]) -> Result<Self, DecodeError> {
        need(body, 3, "extended advertising PDU")?;
        let ext_len = (body[2] & 0x3F) as usize;
        let adv_mode = AdvMode::from_bits(body[2] >> 6);

        let available = body.len() - 3;
        if ext_len > available {
            return Err(DecodeError::ExtHeaderOverrun {
                declared: ext_len,
                available,
            });
        }

        let ext = ExtHeader::parse(adv_mode, &body[3..3 + ext_len], header.tx_add, header.rx_add)?;
        Ok(Self {
            header,
            ext,
            adv_data: body[3 + ext_len..].to_vec(),
        })
    }
}

impl fmt::Display for ExtAdv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = &self.ext;
        write!(f, "{}\n    AdvMode: {}", self.header, e.adv_mode)?;
        if let Some(a) = &e.adv_a {
            write!(f, "\n    AdvA: {}", a)?;
        }
        if let Some(a) = &e.target_a {
            write!(f, "\n    TargetA: {}", a)?;
        }
        if let Some(c) = &e.cte_info {
            write!(f, "\n    CTEInfo: time {} type {}", c.time, c.cte_type)?;
        }
        if let Some(adi) = &e.adi {
            write!(f, "\n    ADI: DID 0x{:03X} SID {}", adi.did, adi.sid)?;
        }
        if let Some(p) = &e.aux_ptr {
            write!(
                f,
                "\n    AuxPtr: Chan {}  PHY {}  Offset {} us  CA {}",
                p.channel,
                p.phy,
                p.offset_usec(),
                if p.ca { "0-50 ppm" } else { "51-500 ppm" }
            )?;
        }
        if let Some(s) = &e.sync_info {
            write!(
                f,
                "\n    SyncInfo: Offset {} us  Interval {}  AA 0x{:08X}  CRCInit 0x{:06X}  Event {}  ChM {}",
                s.offset_usec(),
                s.interval,
                s.access_address,
                s.crc_init,
                s.event_counter,
                s.channel_map
            )?;
        }
        if let Some(p) = e.tx_power {
            write!(f, "\n    TxPower: {} dBm", p)?;
        }
        if !e.acad.is_empty() {
            write!(f, "\n    ACAD: {}", hex(&e.acad))?;
        }
        write!(f, "\n    AdvData: {}", hex(&self.adv_data))
    }
}
