// Copyright 2025-2026 CEMAXECUTER LLC

//! pcap capture files with LINKTYPE_BLUETOOTH_LE_LL_WITH_PHDR records.
//!
//! Record layout after the pcap record header:
//!
//! ```notrust
//! rf_channel(1) signal(1) noise(1) aa_offenses(1) ref_aa(4) flags(2)
//! access_address(4) [coding_indicator(1), coded PHY only] pdu(n) crc(3)
//! ```

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use llsniff_protocol::frame::{Direction, Phy, RawFrame};
use llsniff_protocol::pdu::{DecodedPacket, Pdu};
use llsniff_protocol::{channel_to_rf, rf_to_channel, BLE_ADV_AA};

pub const PCAP_MAGIC: u32 = 0xa1b2c3d4;
pub const DLT_BLUETOOTH_LE_LL_WITH_PHDR: u32 = 256;

/// Per-record LE header length
const LE_HDR_LEN: usize = 10;

// BLE LE header flags
const LE_DEWHITENED: u16 = 0x0001;
const LE_SIGNAL_POWER_VALID: u16 = 0x0002;
const LE_REF_AA_VALID: u16 = 0x0010;
const LE_CRC_CHECKED: u16 = 0x0400;
const LE_CRC_VALID: u16 = 0x0800;

// PDU type class, bits 7-9
const LE_PDU_TYPE_SHIFT: u16 = 7;
const LE_PDU_TYPE_MASK: u16 = 0x0380;
const LE_PDU_ADV: u16 = 0;
const LE_PDU_AUX_ADV: u16 = 1;
const LE_PDU_DATA_C2P: u16 = 2;
const LE_PDU_DATA_P2C: u16 = 3;

// Auxiliary advertising type, bits 12-13 (PDU type class 1 only)
const LE_AUX_TYPE_SHIFT: u16 = 12;
const LE_AUX_ADV_IND: u16 = 0;
const LE_AUX_CHAIN_IND: u16 = 1;
const LE_AUX_SCAN_RSP: u16 = 3;

// PHY encoding in flags bits 14-15
const LE_PHY_1M: u16 = 0x0000;
const LE_PHY_2M: u16 = 0x4000;
const LE_PHY_CODED: u16 = 0x8000;
const LE_PHY_MASK: u16 = 0xC000;

const NOISE_UNKNOWN: i8 = -128;

/// Map PHY to flags bits 14-15
fn phy_to_flags(phy: Phy) -> u16 {
    match phy {
        Phy::Phy1M => LE_PHY_1M,
        Phy::Phy2M => LE_PHY_2M,
        Phy::CodedS8 | Phy::CodedS2 => LE_PHY_CODED,
    }
}

fn pdu_class(pkt: &DecodedPacket) -> u16 {
    let frame = &pkt.frame;
    if frame.access_address != BLE_ADV_AA {
        return match frame.direction {
            Direction::CentralToPeripheral => LE_PDU_DATA_C2P,
            Direction::PeripheralToCentral => LE_PDU_DATA_P2C,
        };
    }
    if frame.is_primary_channel() {
        LE_PDU_ADV
    } else {
        LE_PDU_AUX_ADV
    }
}

fn record_flags(pkt: &DecodedPacket) -> u16 {
    let mut flags = LE_DEWHITENED | LE_SIGNAL_POWER_VALID | LE_REF_AA_VALID;
    if pkt.wire_crc().is_some() {
        flags |= LE_CRC_CHECKED;
        if pkt.crc_ok() {
            flags |= LE_CRC_VALID;
        }
    }

    let class = pdu_class(pkt);
    flags |= class << LE_PDU_TYPE_SHIFT;
    if class == LE_PDU_AUX_ADV {
        let aux = match &pkt.pdu {
            Ok(Pdu::AuxChainInd(_)) => LE_AUX_CHAIN_IND,
            Ok(Pdu::AuxScanRsp(_)) => LE_AUX_SCAN_RSP,
            _ => LE_AUX_ADV_IND,
        };
        flags |= aux << LE_AUX_TYPE_SHIFT;
    }

    flags | phy_to_flags(pkt.frame.phy)
}

/// Split epoch seconds into pcap (sec, usec)
fn split_timestamp(ts_epoch: f64) -> (u32, u32) {
    let total_us = (ts_epoch * 1e6).round().max(0.0) as u64;
    ((total_us / 1_000_000) as u32, (total_us % 1_000_000) as u32)
}

/// PCAP file writer
pub struct PcapWriter<W: Write> {
    writer: W,
}

impl<W: Write> PcapWriter<W> {
    /// Create a new PCAP file writer with the global header.
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_u32::<LittleEndian>(PCAP_MAGIC)?;
        writer.write_u16::<LittleEndian>(2)?; // version_major
        writer.write_u16::<LittleEndian>(4)?; // version_minor
        writer.write_i32::<LittleEndian>(0)?; // thiszone
        writer.write_u32::<LittleEndian>(0)?; // sigfigs
        let snaplen = (LE_HDR_LEN + 4 + 1 + 257 + 3) as u32;
        writer.write_u32::<LittleEndian>(snaplen)?;
        writer.write_u32::<LittleEndian>(DLT_BLUETOOTH_LE_LL_WITH_PHDR)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Write one decoded packet as a record
    pub fn write_packet(&mut self, pkt: &DecodedPacket) -> io::Result<()> {
        let frame = &pkt.frame;
        let coded = frame.phy.is_coded();
        let total_len = LE_HDR_LEN + 4 + coded as usize + frame.body.len() + 3;
        let (sec, usec) = split_timestamp(frame.ts_epoch);

        // PCAP record header
        self.writer.write_u32::<LittleEndian>(sec)?;
        self.writer.write_u32::<LittleEndian>(usec)?;
        self.writer.write_u32::<LittleEndian>(total_len as u32)?;
        self.writer.write_u32::<LittleEndian>(total_len as u32)?;

        // BLE LE link-layer header (10 bytes, packed LE)
        self.writer.write_u8(channel_to_rf(frame.channel))?;
        self.writer.write_i8(frame.rssi)?;
        self.writer.write_i8(NOISE_UNKNOWN)?;
        self.writer.write_u8(0)?; // aa_offenses
        self.writer.write_u32::<LittleEndian>(frame.access_address)?; // ref_aa
        self.writer.write_u16::<LittleEndian>(record_flags(pkt))?;

        // Packet
        self.writer.write_u32::<LittleEndian>(frame.access_address)?;
        if coded {
            self.writer.write_u8(if frame.phy == Phy::CodedS2 { 1 } else { 0 })?;
        }
        self.writer.write_all(&frame.body)?;
        let crc = pkt.wire_crc().unwrap_or(0);
        self.writer.write_u24::<LittleEndian>(crc & 0xFFFFFF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush the writer
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// One record read back from a capture file
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    /// Record time, seconds since the UNIX epoch
    pub ts_epoch: f64,
    pub flags: u16,
    /// Frame with access address and CRC filled in; `tick` is the record time in µs, truncated to 32 bits
    pub frame: RawFrame,
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// PCAP file reader for files produced by [`PcapWriter`]
pub struct PcapReader<R: Read> {
    reader: R,
}

impl<R: Read> PcapReader<R> {
    /// Read and validate the global header
    pub fn new(mut reader: R) -> io::Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != PCAP_MAGIC {
            return Err(invalid(format!("unsupported pcap magic 0x{:08x}", magic)));
        }
        let _version_major = reader.read_u16::<LittleEndian>()?;
        let _version_minor = reader.read_u16::<LittleEndian>()?;
        let _thiszone = reader.read_i32::<LittleEndian>()?;
        let _sigfigs = reader.read_u32::<LittleEndian>()?;
        let snaplen = reader.read_u32::<LittleEndian>()?;
        let linktype = reader.read_u32::<LittleEndian>()?;
        if linktype != DLT_BLUETOOTH_LE_LL_WITH_PHDR {
            return Err(invalid(format!("unsupported link type {}", linktype)));
        }
        log::debug!("pcap: linktype {}, snaplen {}", linktype, snaplen);
        Ok(Self { reader })
    }

    /// Next record, or `None` at end of file
    pub fn next_record(&mut self) -> io::Result<Option<CaptureRecord>> {
        let sec = match self.reader.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let usec = self.reader.read_u32::<LittleEndian>()?;
        let incl_len = self.reader.read_u32::<LittleEndian>()? as usize;
        let _orig_len = self.reader.read_u32::<LittleEndian>()?;

        let mut buf = vec![0u8; incl_len];
        self.reader.read_exact(&mut buf)?;
        let record = parse_record(&buf, sec, usec)?;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for PcapReader<R> {
    type Item = io::Result<CaptureRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn parse_record(buf: &[u8], sec: u32, usec: u32) -> io::Result<CaptureRecord> {
    if buf.len() < LE_HDR_LEN + 4 + 3 {
        return Err(invalid(format!("record too short: {} bytes", buf.len())));
    }
    let mut hdr = &buf[..LE_HDR_LEN];
    let rf_channel = hdr.read_u8()?;
    let rssi = hdr.read_i8()?;
    let _noise = hdr.read_i8()?;
    let _offenses = hdr.read_u8()?;
    let _ref_aa = hdr.read_u32::<LittleEndian>()?;
    let flags = hdr.read_u16::<LittleEndian>()?;

    if rf_channel >= 40 {
        return Err(invalid(format!("rf channel {} out of range", rf_channel)));
    }

    let mut rest = &buf[LE_HDR_LEN..];
    let access_address = rest.read_u32::<LittleEndian>()?;
    let phy = match flags & LE_PHY_MASK {
        LE_PHY_1M => Phy::Phy1M,
        LE_PHY_2M => Phy::Phy2M,
        LE_PHY_CODED => match rest.read_u8()? {
            1 => Phy::CodedS2,
            _ => Phy::CodedS8,
        },
        other => return Err(invalid(format!("reserved PHY bits 0x{:04x}", other))),
    };
    if rest.len() < 3 {
        return Err(invalid("record missing CRC".into()));
    }
    let (body, crc) = rest.split_at(rest.len() - 3);
    // an unchecked record carries a zero placeholder
    let crc = (flags & LE_CRC_CHECKED != 0)
        .then(|| crc[0] as u32 | (crc[1] as u32) << 8 | (crc[2] as u32) << 16);

    let direction = if (flags & LE_PDU_TYPE_MASK) >> LE_PDU_TYPE_SHIFT == LE_PDU_DATA_P2C {
        Direction::PeripheralToCentral
    } else {
        Direction::CentralToPeripheral
    };
    let crc_error = flags & LE_CRC_CHECKED != 0 && flags & LE_CRC_VALID == 0;

    let total_us = sec as u64 * 1_000_000 + usec as u64;
    Ok(CaptureRecord {
        ts_epoch: total_us as f64 / 1e6,
        flags,
        frame: RawFrame {
            tick: total_us as u32,
            direction,
            crc_error,
            event: 0,
            rssi,
            channel: rf_to_channel(rf_channel),
            phy,
            body: body.to_vec(),
            crc,
            access_address: Some(access_address),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llsniff_protocol::crc::crc24;
    use llsniff_protocol::{CaptureSession, BLE_ADV_CRC_INIT};

    fn raw(tick: u32, channel: u8, phy: Phy, body: &[u8]) -> RawFrame {
        RawFrame {
            tick,
            direction: Direction::CentralToPeripheral,
            crc_error: false,
            event: 0,
            rssi: -48,
            channel,
            phy,
            body: body.to_vec(),
            crc: None,
            access_address: None,
        }
    }

    fn adv_ind() -> Vec<u8> {
        vec![0x40, 0x09, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x02, 0x01, 0x06]
    }

    fn ext_aux(adv_mode: u8) -> Vec<u8> {
        // ADI only
        vec![0x07, 0x06, 0x03 | (adv_mode << 6), 0x08, 0x01, 0x10, 0xAB, 0xCD]
    }

    #[test]
    fn test_pcap_global_header() {
        let mut buf = Vec::new();
        let _writer = PcapWriter::new(&mut buf).unwrap();

        assert_eq!(buf.len(), 24);
        assert_eq!(buf[0..4], [0xd4, 0xc3, 0xb2, 0xa1]);
        assert_eq!(buf[4..6], [2, 0]);
        assert_eq!(buf[6..8], [4, 0]);
        assert_eq!(buf[20..24], [0x00, 0x01, 0, 0], "linktype 256");
    }

    #[test]
    fn test_adv_record_layout() {
        let mut session = CaptureSession::default();
        let pkt = session.process_frame(raw(0, 38, Phy::Phy1M, &adv_ind()));

        let mut w = PcapWriter::new(Vec::new()).unwrap();
        w.write_packet(&pkt).unwrap();
        let buf = w.into_inner();
        let rec = &buf[24..];

        let incl = u32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]) as usize;
        assert_eq!(incl, 10 + 4 + 11 + 3);
        let le = &rec[16..];
        assert_eq!(le[0], 12, "channel 38 is rf channel 12");
        assert_eq!(le[1] as i8, -48);
        assert_eq!(le[2] as i8, -128);
        assert_eq!(u32::from_le_bytes([le[4], le[5], le[6], le[7]]), BLE_ADV_AA);
        let flags = u16::from_le_bytes([le[8], le[9]]);
        assert_eq!(flags & LE_PDU_TYPE_MASK, 0);
        assert_eq!(flags & LE_PHY_MASK, LE_PHY_1M);
        assert_ne!(flags & LE_CRC_CHECKED, 0);
        assert_ne!(flags & LE_CRC_VALID, 0);
        assert_eq!(&le[10..14], &[0xD6, 0xBE, 0x89, 0x8E]);
        assert_eq!(&le[14..25], &adv_ind()[..]);
        let crc = crc24(&adv_ind(), BLE_ADV_CRC_INIT);
        assert_eq!(&le[25..28], &[crc as u8, (crc >> 8) as u8, (crc >> 16) as u8]);
    }

    #[test]
    fn test_aux_flags() {
        let mut session = CaptureSession::default();
        // scannable AUX_ADV_IND, then the scan response on the same channel
        let adv = session.process_frame(raw(0, 22, Phy::Phy2M, &ext_aux(2)));
        let rsp = session.process_frame(raw(400, 22, Phy::Phy2M, &ext_aux(0)));
        assert!(matches!(rsp.pdu, Ok(Pdu::AuxScanRsp(_))));

        let f = record_flags(&adv);
        assert_eq!((f & LE_PDU_TYPE_MASK) >> LE_PDU_TYPE_SHIFT, LE_PDU_AUX_ADV);
        assert_eq!((f >> LE_AUX_TYPE_SHIFT) & 0x3, LE_AUX_ADV_IND);
        assert_eq!(f & LE_PHY_MASK, LE_PHY_2M);
        let f = record_flags(&rsp);
        assert_eq!((f >> LE_AUX_TYPE_SHIFT) & 0x3, LE_AUX_SCAN_RSP);
    }

    #[test]
    fn test_capture_round_trip() {
        let mut session = CaptureSession::default();
        let mut data = raw(3_000, 17, Phy::Phy2M, &[0x0E, 0x03, 0x12, 0x34, 0x56]);
        data.direction = Direction::PeripheralToCentral;
        data.access_address = Some(0x5065_4321);
        data.crc = Some(0x00A1B2);
        let frames = vec![
            raw(1_000, 37, Phy::Phy1M, &adv_ind()),
            raw(2_000, 9, Phy::CodedS2, &ext_aux(0)),
            raw(2_500, 9, Phy::CodedS8, &ext_aux(0)),
            data,
        ];
        let pkts: Vec<DecodedPacket> = frames.into_iter().map(|f| session.process_frame(f)).collect();

        let mut w = PcapWriter::new(Vec::new()).unwrap();
        for p in &pkts {
            w.write_packet(p).unwrap();
        }
        let buf = w.into_inner();

        let records: Vec<CaptureRecord> = PcapReader::new(&buf[..])
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(records.len(), pkts.len());
        for (rec, pkt) in records.iter().zip(&pkts) {
            assert_eq!(rec.frame.access_address, Some(pkt.frame.access_address));
            assert_eq!(rec.frame.channel, pkt.frame.channel);
            assert_eq!(rec.frame.phy, pkt.frame.phy);
            assert_eq!(rec.frame.body, pkt.frame.body);
            assert_eq!(rec.frame.rssi, pkt.frame.rssi);
            assert_eq!(rec.frame.direction, pkt.frame.direction);
            assert_eq!(rec.frame.crc, pkt.wire_crc());
            assert!((rec.ts_epoch - pkt.frame.ts_epoch).abs() < 1e-6);
        }
        // unknown link: no seed, CRC carried through but not judged
        assert_eq!(records[3].frame.crc, Some(0x00A1B2));
    }

    #[test]
    fn test_redecode_from_capture() {
        let mut session = CaptureSession::default();
        session.process_frame(raw(0, 37, Phy::Phy1M, &adv_ind()));
        let pkt = session.process_frame(raw(100, 38, Phy::Phy1M, &adv_ind()));

        let mut w = PcapWriter::new(Vec::new()).unwrap();
        w.write_packet(&pkt).unwrap();
        let buf = w.into_inner();

        let mut reader = PcapReader::new(&buf[..]).unwrap();
        let rec = reader.next_record().unwrap().unwrap();
        assert!(reader.next_record().unwrap().is_none());

        let mut fresh = CaptureSession::default();
        let again = fresh.process_frame(rec.frame);
        assert_eq!(again.pdu, pkt.pdu);
        assert_eq!(again.crc_valid, Some(true));
    }

    #[test]
    fn test_unknown_link_crc_not_checked() {
        let mut session = CaptureSession::default();
        let mut data = raw(0, 5, Phy::Phy1M, &[0x01, 0x00]);
        data.access_address = Some(0x1234_5678);
        let pkt = session.process_frame(data);
        assert_eq!(pkt.wire_crc(), None, "no seed for an unknown link");
        let mut w = PcapWriter::new(Vec::new()).unwrap();
        w.write_packet(&pkt).unwrap();
        let buf = w.into_inner();
        let flags = u16::from_le_bytes([buf[24 + 16 + 8], buf[24 + 16 + 9]]);
        assert_eq!(flags & LE_CRC_CHECKED, 0);

        let rec = PcapReader::new(&buf[..]).unwrap().next_record().unwrap().unwrap();
        assert_eq!(rec.frame.crc, None);
        assert!(!rec.frame.crc_error);
    }

    #[test]
    fn test_reader_rejects_foreign_files() {
        let mut buf = Vec::new();
        PcapWriter::new(&mut buf).unwrap();
        buf[20] = 1; // DLT_EN10MB
        buf[21] = 0;
        let err = PcapReader::new(&buf[..]).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut bad_magic = buf.clone();
        bad_magic[0] = 0;
        assert_eq!(PcapReader::new(&bad_magic[..]).err().unwrap().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_split_timestamp() {
        assert_eq!(split_timestamp(1_700_000_000.25), (1_700_000_000, 250_000));
        assert_eq!(split_timestamp(12.9999999), (13, 0));
    }
}
