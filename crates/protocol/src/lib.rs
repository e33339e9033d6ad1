// Copyright 2025-2026 CEMAXECUTER LLC

pub mod config;
pub mod crc;
pub mod error;
pub mod fec;
pub mod frame;
pub mod message;
pub mod pdu;
pub mod session;
pub mod state;
pub mod whitening;

pub use config::DecoderConfig;
pub use error::{DecodeError, Error, FrameError, MessageError};
pub use frame::{Direction, Frame, Phy, RawFrame};
pub use message::Message;
pub use pdu::{DecodedPacket, Pdu};
pub use session::{CaptureSession, SessionEvent, SessionStats};
pub use state::{DecoderState, SnifferState};

/// Access address used by every advertising-channel PDU
pub const BLE_ADV_AA: u32 = 0x8E89BED6;

/// CRCInit used by every advertising-channel PDU
pub const BLE_ADV_CRC_INIT: u32 = 0x555555;

/// Number of BLE link-layer channels (0-36 data/secondary, 37-39 primary advertising)
pub const BLE_NUM_CHANNELS: u8 = 40;

/// True for the three primary advertising channels
#[inline]
pub fn is_primary_adv_channel(channel: u8) -> bool {
    (37..=39).contains(&channel)
}

/// Frequency in MHz to BLE channel number mapping. `None` off the 2 MHz
/// channel grid of 2402-2480 MHz.
pub fn freq_to_channel(freq_mhz: u32) -> Option<u8> {
    if !(2402..=2480).contains(&freq_mhz) || freq_mhz % 2 != 0 {
        return None;
    }
    Some(rf_to_channel(((freq_mhz - 2402) / 2) as u8))
}

/// BLE channel number to centre frequency in MHz
pub fn channel_to_freq(channel: u8) -> u32 {
    2402 + 2 * channel_to_rf(channel) as u32
}

/// BLE channel number (37/38/39 + 0..36 numbering) to RF channel index
/// (0..39, ascending frequency).
pub fn channel_to_rf(channel: u8) -> u8 {
    match channel {
        37 => 0,
        38 => 12,
        39 => 39,
        c if c <= 10 => c + 1,
        c => c + 2,
    }
}

/// RF channel index (ascending frequency) to BLE channel number
pub fn rf_to_channel(rf: u8) -> u8 {
    match rf {
        0 => 37,
        12 => 38,
        39 => 39,
        c if c < 12 => c - 1,
        c => c - 2,
    }
}
