//! ATP packet codec.
//!
//! Layout on the wire, after the DDP type byte:
//!
//! ```text
//! [u8 control] [u8 bitmap/sequence] [u16 BE transaction id] [4 user bytes] [data]
//! ```
//!
//! The control byte carries the function code in its top two bits, then the
//! XO, EOM and STS flags, and the TRel timeout indicator in the low three bits.
//! A responder only acts on XO and the timeout indicator.
//! User bytes and data together form the transaction payload handed to the
//! server.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::ddp::DDP_TYPE_ATP;

/// Control byte + bitmap/sequence + TID.
pub const ATP_HEADER_LEN: usize = 4;

/// User bytes at the start of every payload.
pub const ATP_USER_BYTES: usize = 4;

/// Data bytes one ATP packet may carry after the user bytes.
pub const ATP_MAX_DATA: usize = 578;

/// Largest payload (user bytes + data) of one packet.
pub const ATP_MAX_PAYLOAD: usize = ATP_USER_BYTES + ATP_MAX_DATA;

mod control {
    pub const FUNCTION_MASK: u8 = 0xC0;
    pub const TREQ: u8 = 0x40;
    pub const TRESP: u8 = 0x80;
    pub const TREL: u8 = 0xC0;
    pub const XO: u8 = 0x20;
    pub const EOM: u8 = 0x10;
    pub const TREL_TIMEOUT_MASK: u8 = 0x07;
}

/// Base TRel timeout; the indicator doubles it.
const TREL_TIMEOUT_BASE: Duration = Duration::from_secs(30);

/// Largest defined TRel timeout indicator (8 minutes).
const TREL_TIMEOUT_MAX_INDICATOR: u8 = 4;

/// ATP function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Transaction request (TReq).
    Request,
    /// Transaction response (TResp).
    Response,
    /// Transaction release (TRel).
    Release,
}

/// Decoded ATP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtpHeader {
    /// Packet function.
    pub function: Function,
    /// Exactly-once transaction.
    pub exactly_once: bool,
    /// TRel timeout indicator (0..=4).
    pub release_indicator: u8,
    /// Response bitmap in a TReq, sequence number in a TResp.
    pub bitmap_or_sequence: u8,
    /// Transaction id.
    pub tid: u16,
}

impl AtpHeader {
    /// How long an exactly-once response must be kept for this request.
    ///
    /// Unknown indicators fall back to the 30 second default.
    pub fn release_timeout(&self) -> Duration {
        if self.release_indicator > TREL_TIMEOUT_MAX_INDICATOR {
            return TREL_TIMEOUT_BASE;
        }
        TREL_TIMEOUT_BASE * (1u32 << self.release_indicator)
    }
}

/// Decode a datagram read from a DDP socket (type byte included).
///
/// Returns the header and the payload (user bytes + data).
///
/// # Errors
///
/// Returns an error if the datagram is not ATP, is shorter than a header plus
/// user bytes, or carries the reserved function code.
pub fn decode(datagram: &[u8]) -> Result<(AtpHeader, &[u8])> {
    let Some((&ddp_type, rest)) = datagram.split_first() else {
        bail!("empty datagram");
    };
    if ddp_type != DDP_TYPE_ATP {
        bail!("not an ATP datagram (DDP type {ddp_type})");
    }
    if rest.len() < ATP_HEADER_LEN + ATP_USER_BYTES {
        bail!("ATP packet too short ({} bytes)", rest.len());
    }

    let ctrl = rest[0];
    let function = match ctrl & control::FUNCTION_MASK {
        control::TREQ => Function::Request,
        control::TRESP => Function::Response,
        control::TREL => Function::Release,
        _ => bail!("ATP packet with reserved function code (control {ctrl:#04x})"),
    };

    let header = AtpHeader {
        function,
        exactly_once: ctrl & control::XO != 0,
        release_indicator: ctrl & control::TREL_TIMEOUT_MASK,
        bitmap_or_sequence: rest[1],
        tid: u16::from_be_bytes([rest[2], rest[3]]),
    };

    Ok((header, &rest[ATP_HEADER_LEN..]))
}

/// Encode a single-packet TResp carrying `payload` (user bytes + data).
///
/// # Errors
///
/// Returns an error if the payload is missing its user bytes or does not fit
/// one packet.
pub fn encode_response(tid: u16, sequence: u8, payload: &[u8]) -> Result<Vec<u8>> {
    check_response_len(payload.len())?;

    let mut packet = Vec::with_capacity(1 + ATP_HEADER_LEN + payload.len());
    packet.push(DDP_TYPE_ATP);
    packet.push(control::TRESP | control::EOM);
    packet.push(sequence);
    packet.extend_from_slice(&tid.to_be_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Check that a response payload of `len` bytes fits one TResp.
///
/// # Errors
///
/// Returns an error if the payload is shorter than the user bytes or longer
/// than [`ATP_MAX_PAYLOAD`].
pub fn check_response_len(len: usize) -> Result<()> {
    if len < ATP_USER_BYTES {
        bail!("ATP response payload shorter than the user bytes");
    }
    if len > ATP_MAX_PAYLOAD {
        bail!("ATP response payload is {len} bytes, one packet carries at most {ATP_MAX_PAYLOAD}");
    }
    Ok(())
}

/// Encode a TReq, as a requester would.
#[cfg(test)]
pub(crate) fn encode_request(tid: u16, bitmap: u8, exactly_once: bool, payload: &[u8]) -> Vec<u8> {
    let mut ctrl = control::TREQ;
    if exactly_once {
        ctrl |= control::XO;
    }
    let mut packet = Vec::with_capacity(1 + ATP_HEADER_LEN + payload.len());
    packet.push(DDP_TYPE_ATP);
    packet.push(ctrl);
    packet.push(bitmap);
    packet.extend_from_slice(&tid.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}
