// Copyright 2025-2026 CEMAXECUTER LLC

//! Advertising channel PDUs (legacy and extended).

use std::fmt;

use super::ext::{AdvMode, ExtAdv};
use super::{hex, need, read_u16, read_u24, read_u32, ChannelMap, DeviceAddress, Pdu};
use crate::error::DecodeError;
use crate::frame::Frame;
use crate::state::{AuxKind, ConnContext, DecoderState};

/// Two-octet advertising PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvHeader {
    pub pdu_type: u8,
    /// ChSel: the advertiser supports channel selection algorithm #2
    pub ch_sel: bool,
    pub tx_add: bool,
    pub rx_add: bool,
    /// Declared payload length
    pub length: u8,
}

impl AdvHeader {
    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        if body.is_empty() {
            return Err(DecodeError::Empty);
        }
        need(body, 2, "advertising header")?;
        Ok(Self {
            pdu_type: body[0] & 0x0F,
            ch_sel: body[0] & 0x20 != 0,
            tx_add: body[0] & 0x40 != 0,
            rx_add: body[0] & 0x80 != 0,
            length: body[1],
        })
    }
}

impl fmt::Display for AdvHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChSel: {}  TxAdd: {}  RxAdd: {}  Length: {}",
            self.ch_sel as u8, self.tx_add as u8, self.rx_add as u8, self.length
        )
    }
}

/// ADV_IND, ADV_NONCONN_IND, ADV_SCAN_IND and SCAN_RSP: AdvA followed by data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvPayload {
    pub header: AdvHeader,
    pub adv_a: DeviceAddress,
    /// AdvData, or ScanRspData for SCAN_RSP
    pub data: Vec<u8>,
}

impl AdvPayload {
    fn parse(header: AdvHeader, body: &[u8], pdu: &'static str) -> Result<Self, DecodeError> {
        need(body, 8, pdu)?;
        Ok(Self {
            header,
            adv_a: DeviceAddress::from_wire(&body[2..8], header.tx_add),
            data: body[8..].to_vec(),
        })
    }
}

impl fmt::Display for AdvPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n    AdvA: {}\n    AdvData: {}",
            self.header,
            self.adv_a,
            hex(&self.data)
        )
    }
}

/// ADV_DIRECT_IND
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectAdv {
    pub header: AdvHeader,
    pub adv_a: DeviceAddress,
    pub target_a: DeviceAddress,
}

impl fmt::Display for DirectAdv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n    AdvA: {}\n    TargetA: {}",
            self.header, self.adv_a, self.target_a
        )
    }
}

/// SCAN_REQ and AUX_SCAN_REQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub header: AdvHeader,
    pub scan_a: DeviceAddress,
    pub adv_a: DeviceAddress,
}

impl fmt::Display for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n    ScanA: {}\n    AdvA: {}",
            self.header, self.scan_a, self.adv_a
        )
    }
}

/// LLData block of CONNECT_IND / AUX_CONNECT_REQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlData {
    pub access_address: u32,
    pub crc_init: u32,
    /// 1.25 ms units
    pub win_size: u8,
    /// 1.25 ms units
    pub win_offset: u16,
    /// 1.25 ms units
    pub interval: u16,
    pub latency: u16,
    /// 10 ms units
    pub timeout: u16,
    pub channel_map: ChannelMap,
    pub hop: u8,
    pub sca: u8,
}

impl LlData {
    pub const LEN: usize = 22;

    fn from_wire(b: &[u8]) -> Self {
        Self {
            access_address: read_u32(b, 0),
            crc_init: read_u24(b, 4),
            win_size: b[7],
            win_offset: read_u16(b, 8),
            interval: read_u16(b, 10),
            latency: read_u16(b, 12),
            timeout: read_u16(b, 14),
            channel_map: ChannelMap::from_wire(&b[16..21]),
            hop: b[21] & 0x1F,
            sca: b[21] >> 5,
        }
    }

    pub fn context(&self) -> ConnContext {
        ConnContext::new(self.access_address, self.crc_init)
    }

    pub fn interval_us(&self) -> u32 {
        self.interval as u32 * 1250
    }

    /// Worst-case sleep clock accuracy for the SCA field
    pub fn sca_ppm(&self) -> u16 {
        const PPM: [u16; 8] = [500, 250, 150, 100, 75, 50, 30, 20];
        PPM[(self.sca & 0x07) as usize]
    }
}

/// CONNECT_IND and AUX_CONNECT_REQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub header: AdvHeader,
    pub init_a: DeviceAddress,
    pub adv_a: DeviceAddress,
    pub ll_data: LlData,
}

impl ConnectRequest {
    pub const BODY_LEN: usize = 2 + 12 + LlData::LEN;

    fn parse(header: AdvHeader, body: &[u8], pdu: &'static str) -> Result<Self, DecodeError> {
        need(body, Self::BODY_LEN, pdu)?;
        Ok(Self {
            header,
            init_a: DeviceAddress::from_wire(&body[2..8], header.tx_add),
            adv_a: DeviceAddress::from_wire(&body[8..14], header.rx_add),
            ll_data: LlData::from_wire(&body[14..Self::BODY_LEN]),
        })
    }
}

impl fmt::Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.ll_data;
        write!(
            f,
            "{}\n    InitA: {}\n    AdvA: {}\n    AA: 0x{:08X}  CRCInit: 0x{:06X}\n    \
             WinSize: {}  WinOffset: {}  Interval: {}  Latency: {}  Timeout: {}\n    \
             ChM: {}  Hop: {}  SCA: {} ({} ppm)",
            self.header,
            self.init_a,
            self.adv_a,
            d.access_address,
            d.crc_init,
            d.win_size,
            d.win_offset,
            d.interval,
            d.latency,
            d.timeout,
            d.channel_map,
            d.hop,
            d.sca,
            d.sca_ppm()
        )
    }
}

/// Advertising PDU with a type not valid on its channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdv {
    pub header: AdvHeader,
    pub payload: Vec<u8>,
}

impl fmt::Display for RawAdv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {}  {}\n    Payload: {}",
            self.header.pdu_type,
            self.header,
            hex(&self.payload)
        )
    }
}

fn raw(header: AdvHeader, body: &[u8]) -> Pdu {
    Pdu::AdvUnknown(RawAdv {
        header,
        payload: body[2..].to_vec(),
    })
}

/// Decode an advertising-AA frame. Connect requests and auxiliary PDUs update `state`.
pub fn decode(frame: &Frame, state: &mut DecoderState) -> Result<Pdu, DecodeError> {
    let body = &frame.body[..];
    let header = AdvHeader::parse(body)?;

    if frame.is_primary_channel() {
        decode_primary(header, body, state)
    } else {
        decode_secondary(header, frame, state)
    }
}

fn decode_primary(header: AdvHeader, body: &[u8], state: &mut DecoderState) -> Result<Pdu, DecodeError> {
    let pdu = match header.pdu_type {
        0 => Pdu::AdvInd(AdvPayload::parse(header, body, "ADV_IND")?),
        1 => {
            need(body, 14, "ADV_DIRECT_IND")?;
            Pdu::AdvDirectInd(DirectAdv {
                header,
                adv_a: DeviceAddress::from_wire(&body[2..8], header.tx_add),
                target_a: DeviceAddress::from_wire(&body[8..14], header.rx_add),
            })
        }
        2 => Pdu::AdvNonconnInd(AdvPayload::parse(header, body, "ADV_NONCONN_IND")?),
        3 => Pdu::ScanReq(scan_request(header, body, "SCAN_REQ")?),
        4 => Pdu::ScanRsp(AdvPayload::parse(header, body, "SCAN_RSP")?),
        5 => {
            let req = ConnectRequest::parse(header, body, "CONNECT_IND")?;
            state.on_connect_request(req.ll_data.context(), true);
            Pdu::ConnectInd(req)
        }
        6 => Pdu::AdvScanInd(AdvPayload::parse(header, body, "ADV_SCAN_IND")?),
        7 => Pdu::AdvExtInd(ExtAdv::parse(header, body)?),
        _ => raw(header, body),
    };
    Ok(pdu)
}

fn decode_secondary(header: AdvHeader, frame: &Frame, state: &mut DecoderState) -> Result<Pdu, DecodeError> {
    let body = &frame.body[..];
    let pdu = match header.pdu_type {
        3 => Pdu::AuxScanReq(scan_request(header, body, "AUX_SCAN_REQ")?),
        5 => {
            let req = ConnectRequest::parse(header, body, "AUX_CONNECT_REQ")?;
            state.on_connect_request(req.ll_data.context(), false);
            Pdu::AuxConnectReq(req)
        }
        7 => {
            let ext = ExtAdv::parse(header, body)?;
            let kind = state.resolve_aux(frame.ts, frame.channel, ext.ext.adi);
            state.on_aux_adv(
                frame.ts,
                frame.channel,
                frame.phy,
                body.len(),
                ext.ext.adi,
                kind == AuxKind::AdvInd && ext.ext.adv_mode == AdvMode::Scannable,
                ext.ext.aux_ptr.map(|p| (p.channel, p.offset_usec())),
            );
            match kind {
                AuxKind::AdvInd => Pdu::AuxAdvInd(ext),
                AuxKind::ScanRsp => Pdu::AuxScanRsp(ext),
                AuxKind::ChainInd => Pdu::AuxChainInd(ext),
            }
        }
        8 => {
            // the response type alone confirms the pending connection
            state.on_aux_connect_rsp();
            Pdu::AuxConnectRsp(ExtAdv::parse(header, body)?)
        }
        _ => raw(header, body),
    };
    Ok(pdu)
}

fn scan_request(header: AdvHeader, body: &[u8], pdu: &'static str) -> Result<ScanRequest, DecodeError> {
    need(body, 14, pdu)?;
    Ok(ScanRequest {
        header,
        scan_a: DeviceAddress::from_wire(&body[2..8], header.tx_add),
        adv_a: DeviceAddress::from_wire(&body[8..14], header.rx_add),
    })
}
