// Copyright 2025-2026 CEMAXECUTER LLC

//! LL control PDUs (LLID 3).

use std::fmt;

use super::data::DataHeader;
use super::{hex, need, read_u16, ChannelMap, CteInfo};
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOpcode {
    ConnectionUpdateInd,
    ChannelMapInd,
    TerminateInd,
    EncReq,
    EncRsp,
    StartEncReq,
    StartEncRsp,
    UnknownRsp,
    FeatureReq,
    FeatureRsp,
    PauseEncReq,
    PauseEncRsp,
    VersionInd,
    RejectInd,
    PeripheralFeatureReq,
    ConnectionParamReq,
    ConnectionParamRsp,
    RejectExtInd,
    PingReq,
    PingRsp,
    LengthReq,
    LengthRsp,
    PhyReq,
    PhyRsp,
    PhyUpdateInd,
    MinUsedChannelsInd,
    CteReq,
    CteRsp,
    PeriodicSyncInd,
    ClockAccuracyReq,
    ClockAccuracyRsp,
    CisReq,
    CisRsp,
    CisInd,
    CisTerminateInd,
    PowerControlReq,
    PowerControlRsp,
    PowerChangeInd,
    SubrateReq,
    SubrateInd,
    ChannelReportingInd,
    ChannelStatusInd,
    Reserved(u8),
}

// Indexed by opcode value
const OPCODES: [(ControlOpcode, &str); 42] = [
    (ControlOpcode::ConnectionUpdateInd, "LL_CONNECTION_UPDATE_IND"),
    (ControlOpcode::ChannelMapInd, "LL_CHANNEL_MAP_IND"),
    (ControlOpcode::TerminateInd, "LL_TERMINATE_IND"),
    (ControlOpcode::EncReq, "LL_ENC_REQ"),
    (ControlOpcode::EncRsp, "LL_ENC_RSP"),
    (ControlOpcode::StartEncReq, "LL_START_ENC_REQ"),
    (ControlOpcode::StartEncRsp, "LL_START_ENC_RSP"),
    (ControlOpcode::UnknownRsp, "LL_UNKNOWN_RSP"),
    (ControlOpcode::FeatureReq, "LL_FEATURE_REQ"),
    (ControlOpcode::FeatureRsp, "LL_FEATURE_RSP"),
    (ControlOpcode::PauseEncReq, "LL_PAUSE_ENC_REQ"),
    (ControlOpcode::PauseEncRsp, "LL_PAUSE_ENC_RSP"),
    (ControlOpcode::VersionInd, "LL_VERSION_IND"),
    (ControlOpcode::RejectInd, "LL_REJECT_IND"),
    (ControlOpcode::PeripheralFeatureReq, "LL_PERIPHERAL_FEATURE_REQ"),
    (ControlOpcode::ConnectionParamReq, "LL_CONNECTION_PARAM_REQ"),
    (ControlOpcode::ConnectionParamRsp, "LL_CONNECTION_PARAM_RSP"),
    (ControlOpcode::RejectExtInd, "LL_REJECT_EXT_IND"),
    (ControlOpcode::PingReq, "LL_PING_REQ"),
    (ControlOpcode::PingRsp, "LL_PING_RSP"),
    (ControlOpcode::LengthReq, "LL_LENGTH_REQ"),
    (ControlOpcode::LengthRsp, "LL_LENGTH_RSP"),
    (ControlOpcode::PhyReq, "LL_PHY_REQ"),
    (ControlOpcode::PhyRsp, "LL_PHY_RSP"),
    (ControlOpcode::PhyUpdateInd, "LL_PHY_UPDATE_IND"),
    (ControlOpcode::MinUsedChannelsInd, "LL_MIN_USED_CHANNELS_IND"),
    (ControlOpcode::CteReq, "LL_CTE_REQ"),
    (ControlOpcode::CteRsp, "LL_CTE_RSP"),
    (ControlOpcode::PeriodicSyncInd, "LL_PERIODIC_SYNC_IND"),
    (ControlOpcode::ClockAccuracyReq, "LL_CLOCK_ACCURACY_REQ"),
    (ControlOpcode::ClockAccuracyRsp, "LL_CLOCK_ACCURACY_RSP"),
    (ControlOpcode::CisReq, "LL_CIS_REQ"),
    (ControlOpcode::CisRsp, "LL_CIS_RSP"),
    (ControlOpcode::CisInd, "LL_CIS_IND"),
    (ControlOpcode::CisTerminateInd, "LL_CIS_TERMINATE_IND"),
    (ControlOpcode::PowerControlReq, "LL_POWER_CONTROL_REQ"),
    (ControlOpcode::PowerControlRsp, "LL_POWER_CONTROL_RSP"),
    (ControlOpcode::PowerChangeInd, "LL_POWER_CHANGE_IND"),
    (ControlOpcode::SubrateReq, "LL_SUBRATE_REQ"),
    (ControlOpcode::SubrateInd, "LL_SUBRATE_IND"),
    (ControlOpcode::ChannelReportingInd, "LL_CHANNEL_REPORTING_IND"),
    (ControlOpcode::ChannelStatusInd, "LL_CHANNEL_STATUS_IND"),
];

impl ControlOpcode {
    pub fn from_u8(v: u8) -> Self {
        OPCODES
            .get(v as usize)
            .map(|&(op, _)| op)
            .unwrap_or(ControlOpcode::Reserved(v))
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ControlOpcode::Reserved(v) => v,
            op => OPCODES.iter().position(|&(o, _)| o == op).unwrap_or(0xFF) as u8,
        }
    }

    pub fn name(self) -> &'static str {
        OPCODES
            .iter()
            .find(|&&(o, _)| o == self)
            .map(|&(_, n)| n)
            .unwrap_or("LL_RESERVED")
    }
}

impl fmt::Display for ControlOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_u8())
    }
}

/// Structured CtrData for the opcodes worth breaking out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFields {
    ConnectionUpdate {
        win_size: u8,
        win_offset: u16,
        interval: u16,
        latency: u16,
        timeout: u16,
        instant: u16,
    },
    ChannelMap {
        channel_map: ChannelMap,
        instant: u16,
    },
    /// TERMINATE_IND, REJECT_IND
    ErrorCode(u8),
    EncReq {
        rand: [u8; 8],
        ediv: u16,
        skd_c: [u8; 8],
        iv_c: [u8; 4],
    },
    EncRsp {
        skd_p: [u8; 8],
        iv_p: [u8; 4],
    },
    UnknownRsp {
        unknown_type: u8,
    },
    /// FEATURE_REQ, FEATURE_RSP, PERIPHERAL_FEATURE_REQ
    Features(u64),
    Version {
        version: u8,
        company_id: u16,
        subversion: u16,
    },
    /// CONNECTION_PARAM_REQ, CONNECTION_PARAM_RSP
    ConnectionParam {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
        preferred_periodicity: u8,
        reference_event: u16,
        offsets: [u16; 6],
    },
    RejectExt {
        reject_opcode: u8,
        error_code: u8,
    },
    /// LENGTH_REQ, LENGTH_RSP
    Length {
        max_rx_octets: u16,
        max_rx_time: u16,
        max_tx_octets: u16,
        max_tx_time: u16,
    },
    /// PHY_REQ, PHY_RSP
    Phys {
        tx_phys: u8,
        rx_phys: u8,
    },
    PhyUpdate {
        c_to_p_phy: u8,
        p_to_c_phy: u8,
        instant: u16,
    },
    MinUsedChannels {
        phys: u8,
        min_used_channels: u8,
    },
    /// No CtrData defined (START_ENC_*, PAUSE_ENC_*, PING_*)
    Empty,
    /// Kept as raw CtrData
    Opaque,
}

fn array<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[..N]);
    out
}

impl ControlFields {
    fn parse(opcode: ControlOpcode, d: &[u8]) -> Result<Self, DecodeError> {
        use ControlOpcode::*;

        let name = opcode.name();
        let fields = match opcode {
            ConnectionUpdateInd => {
                need(d, 11, name)?;
                ControlFields::ConnectionUpdate {
                    win_size: d[0],
                    win_offset: read_u16(d, 1),
                    interval: read_u16(d, 3),
                    latency: read_u16(d, 5),
                    timeout: read_u16(d, 7),
                    instant: read_u16(d, 9),
                }
            }
            ChannelMapInd => {
                need(d, 7, name)?;
                ControlFields::ChannelMap {
                    channel_map: ChannelMap::from_wire(&d[..5]),
                    instant: read_u16(d, 5),
                }
            }
            TerminateInd | RejectInd => {
                need(d, 1, name)?;
                ControlFields::ErrorCode(d[0])
            }
            EncReq => {
                need(d, 22, name)?;
                ControlFields::EncReq {
                    rand: array(&d[0..8]),
                    ediv: read_u16(d, 8),
                    skd_c: array(&d[10..18]),
                    iv_c: array(&d[18..22]),
                }
            }
            EncRsp => {
                need(d, 12, name)?;
                ControlFields::EncRsp {
                    skd_p: array(&d[0..8]),
                    iv_p: array(&d[8..12]),
                }
            }
            UnknownRsp => {
                need(d, 1, name)?;
                ControlFields::UnknownRsp { unknown_type: d[0] }
            }
            FeatureReq | FeatureRsp | PeripheralFeatureReq => {
                need(d, 8, name)?;
                ControlFields::Features(u64::from_le_bytes(array(&d[..8])))
            }
            VersionInd => {
                need(d, 5, name)?;
                ControlFields::Version {
                    version: d[0],
                    company_id: read_u16(d, 1),
                    subversion: read_u16(d, 3),
                }
            }
            ConnectionParamReq | ConnectionParamRsp => {
                need(d, 23, name)?;
                let mut offsets = [0u16; 6];
                for (i, o) in offsets.iter_mut().enumerate() {
                    *o = read_u16(d, 11 + 2 * i);
                }
                ControlFields::ConnectionParam {
                    interval_min: read_u16(d, 0),
                    interval_max: read_u16(d, 2),
                    latency: read_u16(d, 4),
                    timeout: read_u16(d, 6),
                    preferred_periodicity: d[8],
                    reference_event: read_u16(d, 9),
                    offsets,
                }
            }
            RejectExtInd => {
                need(d, 2, name)?;
                ControlFields::RejectExt {
                    reject_opcode: d[0],
                    error_code: d[1],
                }
            }
            LengthReq | LengthRsp => {
                need(d, 8, name)?;
                ControlFields::Length {
                    max_rx_octets: read_u16(d, 0),
                    max_rx_time: read_u16(d, 2),
                    max_tx_octets: read_u16(d, 4),
                    max_tx_time: read_u16(d, 6),
                }
            }
            PhyReq | PhyRsp => {
                need(d, 2, name)?;
                ControlFields::Phys {
                    tx_phys: d[0],
                    rx_phys: d[1],
                }
            }
            PhyUpdateInd => {
                need(d, 4, name)?;
                ControlFields::PhyUpdate {
                    c_to_p_phy: d[0],
                    p_to_c_phy: d[1],
                    instant: read_u16(d, 2),
                }
            }
            MinUsedChannelsInd => {
                need(d, 2, name)?;
                ControlFields::MinUsedChannels {
                    phys: d[0],
                    min_used_channels: d[1],
                }
            }
            StartEncReq | StartEncRsp | PauseEncReq | PauseEncRsp | PingReq | PingRsp => {
                ControlFields::Empty
            }
            _ => ControlFields::Opaque,
        };
        Ok(fields)
    }
}

/// LL control PDU: opcode plus CtrData
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPdu {
    pub header: DataHeader,
    pub cte_info: Option<CteInfo>,
    pub opcode: ControlOpcode,
    pub ctr_data: Vec<u8>,
    pub fields: ControlFields,
}

impl ControlPdu {
    /// `payload` starts at the opcode octet
    pub fn parse(header: DataHeader, cte_info: Option<CteInfo>, payload: &[u8]) -> Result<Self, DecodeError> {
        need(payload, 1, "LL control opcode")?;
        let opcode = ControlOpcode::from_u8(payload[0]);
        let ctr_data = &payload[1..];
        let fields = ControlFields::parse(opcode, ctr_data)?;
        Ok(Self {
            header,
            cte_info,
            opcode,
            ctr_data: ctr_data.to_vec(),
            fields,
        })
    }
}

impl fmt::Display for ControlPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n    Opcode: {}", self.header, self.opcode)?;
        match &self.fields {
            ControlFields::ConnectionUpdate {
                win_size,
                win_offset,
                interval,
                latency,
                timeout,
                instant,
            } => write!(
                f,
                "\n    WinSize: {}  WinOffset: {}  Interval: {}  Latency: {}  Timeout: {}  Instant: {}",
                win_size, win_offset, interval, latency, timeout, instant
            ),
            ControlFields::ChannelMap { channel_map, instant } => {
                write!(f, "\n    ChM: {}  Instant: {}", channel_map, instant)
            }
            ControlFields::ErrorCode(code) => write!(f, "\n    ErrorCode: 0x{:02X}", code),
            ControlFields::EncReq { rand, ediv, skd_c, iv_c } => write!(
                f,
                "\n    Rand: {}  EDIV: 0x{:04X}\n    SKDc: {}  IVc: {}",
                hex(rand),
                ediv,
                hex(skd_c),
                hex(iv_c)
            ),
            ControlFields::EncRsp { skd_p, iv_p } => {
                write!(f, "\n    SKDp: {}  IVp: {}", hex(skd_p), hex(iv_p))
            }
            ControlFields::UnknownRsp { unknown_type } => {
                write!(f, "\n    UnknownType: {}", ControlOpcode::from_u8(*unknown_type))
            }
            ControlFields::Features(feat) => write!(f, "\n    FeatureSet: 0x{:016X}", feat),
            ControlFields::Version {
                version,
                company_id,
                subversion,
            } => write!(
                f,
                "\n    VersNr: {}  CompId: 0x{:04X}  SubVersNr: 0x{:04X}",
                version, company_id, subversion
            ),
            ControlFields::ConnectionParam {
                interval_min,
                interval_max,
                latency,
                timeout,
                preferred_periodicity,
                reference_event,
                offsets,
            } => write!(
                f,
                "\n    Interval: {}-{}  Latency: {}  Timeout: {}  Periodicity: {}  RefEvent: {}  Offsets: {:?}",
                interval_min,
                interval_max,
                latency,
                timeout,
                preferred_periodicity,
                reference_event,
                offsets
            ),
            ControlFields::RejectExt {
                reject_opcode,
                error_code,
            } => write!(
                f,
                "\n    RejectOpcode: {}  ErrorCode: 0x{:02X}",
                ControlOpcode::from_u8(*reject_opcode),
                error_code
            ),
            ControlFields::Length {
                max_rx_octets,
                max_rx_time,
                max_tx_octets,
                max_tx_time,
            } => write!(
                f,
                "\n    MaxRx: {} octets / {} us  MaxTx: {} octets / {} us",
                max_rx_octets, max_rx_time, max_tx_octets, max_tx_time
            ),
            ControlFields::Phys { tx_phys, rx_phys } => {
                write!(f, "\n    TxPhys: 0x{:02X}  RxPhys: 0x{:02X}", tx_phys, rx_phys)
            }
            ControlFields::PhyUpdate {
                c_to_p_phy,
                p_to_c_phy,
                instant,
            } => write!(
                f,
                "\n    PhyC->P: 0x{:02X}  PhyP->C: 0x{:02X}  Instant: {}",
                c_to_p_phy, p_to_c_phy, instant
            ),
            ControlFields::MinUsedChannels {
                phys,
                min_used_channels,
            } => write!(f, "\n    Phys: 0x{:02X}  MinUsedChannels: {}", phys, min_used_channels),
            ControlFields::Empty => Ok(()),
            ControlFields::Opaque => write!(f, "\n    CtrData: {}", hex(&self.ctr_data)),
        }
    }
}
