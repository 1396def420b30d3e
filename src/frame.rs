//! MBAP framing for Modbus TCP
//!
//! ```text
//! | transaction id (2) | protocol id (2) | length (2) | unit id (1) | PDU (length - 1) |
//! ```
//!
//! TCP gives no message boundaries, so sessions accumulate bytes in a
//! [`BytesMut`] and call [`decode_frame`] until it stops yielding frames.

use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;

use crate::codec::read_u16_be;
use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// Decoded MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Echoed back in the response
    pub transaction_id: u16,
    /// Echoed back in the response (0 for Modbus)
    pub protocol_id: u16,
    /// Unit id + PDU byte count
    pub length: u16,
    /// Echoed back in the response
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the first seven bytes of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MBAP_HEADER_LEN {
            return None;
        }
        Some(Self {
            transaction_id: read_u16_be(data, 0)?,
            protocol_id: read_u16_be(data, 2)?,
            length: read_u16_be(data, 4)?,
            unit_id: data[6],
        })
    }

    /// Number of bytes the whole frame occupies on the wire
    #[inline]
    pub fn frame_len(&self) -> usize {
        // the length field counts everything after itself
        MBAP_HEADER_LEN - 1 + self.length as usize
    }
}

/// A complete request frame taken off the wire
#[derive(Debug, Clone)]
pub struct RequestFrame {
    /// Header of the request
    pub header: MbapHeader,
    /// Function code and payload; empty when the frame carried no PDU
    pub pdu: ModbusPdu,
}

/// Take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed. A length field of zero or
/// beyond [`MAX_MBAP_LENGTH`] means the stream can no longer be resynchronised
/// and is reported as [`ModbusError::Frame`].
pub fn decode_frame(buf: &mut BytesMut) -> ModbusResult<Option<RequestFrame>> {
    let Some(header) = MbapHeader::parse(&buf[..]) else {
        return Ok(None);
    };

    let length = header.length as usize;
    if length == 0 || length > MAX_MBAP_LENGTH {
        return Err(ModbusError::frame(format!(
            "MBAP length {} outside 1..={}",
            length, MAX_MBAP_LENGTH
        )));
    }

    let frame_len = header.frame_len();
    if buf.len() < frame_len {
        return Ok(None);
    }

    let mut frame = buf.split_to(frame_len);
    frame.advance(MBAP_HEADER_LEN);
    let pdu = ModbusPdu::from_slice(&frame)?;

    debug!(
        "MBAP frame: tid={} pid={} len={} uid={} pdu_len={}",
        header.transaction_id,
        header.protocol_id,
        header.length,
        header.unit_id,
        pdu.len()
    );

    Ok(Some(RequestFrame { header, pdu }))
}

/// Encode a response frame, reusing the request's header fields.
pub fn encode_frame(request: &MbapHeader, pdu: &ModbusPdu, dst: &mut BytesMut) {
    dst.reserve(MBAP_HEADER_LEN + pdu.len());
    dst.put_u16(request.transaction_id);
    dst.put_u16(request.protocol_id);
    dst.put_u16(1 + pdu.len() as u16);
    dst.put_u8(request.unit_id);
    dst.put_slice(pdu.as_slice());
}
