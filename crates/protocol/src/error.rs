// Copyright 2025-2026 CEMAXECUTER LLC

//! Error types for frame parsing, PDU decoding and message handling

use thiserror::Error;

/// A capture frame could not be framed. The frame is dropped; the session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame header too short: {0} bytes (need 10)")]
    ShortHeader(usize),

    #[error("length field says {declared} body bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("channel {0} out of range")]
    BadChannel(u8),
}

/// A framed body is structurally invalid for the PDU type it claims to be.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty PDU body")]
    Empty,

    #[error("{pdu} truncated: need {needed} bytes, have {available}")]
    Truncated {
        pdu: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("extended header length {declared} exceeds remaining {available} bytes")]
    ExtHeaderOverrun { declared: usize, available: usize },

    #[error("extended header field {field} runs past declared header length")]
    ExtFieldOverrun { field: &'static str },
}

/// A hardware message envelope could not be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message envelope too short ({0} bytes)")]
    Short(usize),

    #[error("unknown message type 0x{0:02X}")]
    UnknownType(u8),

    #[error("{kind} message truncated")]
    Truncated { kind: &'static str },
}

/// Crate-level error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

pub type Result<T> = std::result::Result<T, Error>;
