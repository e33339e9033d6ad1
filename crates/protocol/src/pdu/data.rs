// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;

use super::control::ControlPdu;
use super::{hex, need, CteInfo, Pdu};
use crate::error::DecodeError;
use crate::frame::Frame;

/// Link Layer ID: the 2-bit payload class of a data channel PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Llid {
    Reserved,
    Continuation,
    Start,
    Control,
}

impl Llid {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Llid::Reserved,
            1 => Llid::Continuation,
            2 => Llid::Start,
            _ => Llid::Control,
        }
    }
}

/// Two-octet data channel PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub llid: Llid,
    pub nesn: bool,
    pub sn: bool,
    pub md: bool,
    /// CTEInfo present
    pub cp: bool,
    pub length: u8,
}

impl DataHeader {
    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        if body.is_empty() {
            return Err(DecodeError::Empty);
        }
        need(body, 2, "data header")?;
        Ok(Self {
            llid: Llid::from_bits(body[0]),
            nesn: body[0] & 0x04 != 0,
            sn: body[0] & 0x08 != 0,
            md: body[0] & 0x10 != 0,
            cp: body[0] & 0x20 != 0,
            length: body[1],
        })
    }
}

impl fmt::Display for DataHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLID: {:?}  NESN: {}  SN: {}  MD: {}  Length: {}",
            self.llid, self.nesn as u8, self.sn as u8, self.md as u8, self.length
        )
    }
}

/// Data channel PDU carrying L2CAP fragments (or a reserved LLID)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    pub header: DataHeader,
    pub cte_info: Option<CteInfo>,
    pub payload: Vec<u8>,
}

impl fmt::Display for DataPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        if let Some(c) = &self.cte_info {
            write!(f, "\n    CTEInfo: time {} type {}", c.time, c.cte_type)?;
        }
        write!(f, "\n    Data: {}", hex(&self.payload))
    }
}

pub fn decode(frame: &Frame) -> Result<Pdu, DecodeError> {
    let body = &frame.body[..];
    let header = DataHeader::parse(body)?;

    let (cte_info, payload) = if header.cp {
        need(body, 3, "data CTEInfo")?;
        (Some(CteInfo::from_octet(body[2])), &body[3..])
    } else {
        (None, &body[2..])
    };

    let data = || DataPdu {
        header,
        cte_info,
        payload: payload.to_vec(),
    };
    Ok(match header.llid {
        Llid::Reserved => Pdu::DataReserved(data()),
        Llid::Continuation => Pdu::DataContinuation(data()),
        Llid::Start => Pdu::DataStart(data()),
        Llid::Control => Pdu::Control(ControlPdu::parse(header, cte_info, payload)?),
    })
}
