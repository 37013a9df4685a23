//! Semtech UDP gateway protocol v2 datagram header (`spec.md` §6).
//!
//! Every datagram starts with `{version, token_hi, token_lo, type}`; PUSH_DATA,
//! PULL_DATA and TX_ACK additionally carry an 8-byte gateway MAC right after
//! the header.

use crate::error::ForwarderError;

pub const PROTOCOL_VERSION: u8 = crate::constants::PROTOCOL_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    PushData = 0,
    PushAck = 1,
    PullData = 2,
    PullResp = 3,
    PullAck = 4,
    TxAck = 5,
}

impl PacketType {
    fn from_byte(b: u8) -> Result<Self, ForwarderError> {
        match b {
            0 => Ok(PacketType::PushData),
            1 => Ok(PacketType::PushAck),
            2 => Ok(PacketType::PullData),
            3 => Ok(PacketType::PullResp),
            4 => Ok(PacketType::PullAck),
            5 => Ok(PacketType::TxAck),
            other => Err(ForwarderError::Protocol(format!("unknown packet type {other}"))),
        }
    }
}

/// A gateway identifier: the 8-byte MAC carried in PUSH_DATA/PULL_DATA/TX_ACK.
pub type GatewayId = [u8; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub token: u16,
    pub ptype: PacketType,
}

/// Encode the 4-byte header, followed by `gateway_id` when the packet type
/// carries one (PUSH_DATA, PULL_DATA, TX_ACK).
pub fn encode_header(header: Header, gateway_id: Option<GatewayId>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.push(PROTOCOL_VERSION);
    buf.push((header.token >> 8) as u8);
    buf.push((header.token & 0xFF) as u8);
    buf.push(header.ptype as u8);
    if let Some(id) = gateway_id {
        buf.extend_from_slice(&id);
    }
    buf
}

/// Parsed header plus the offset into `datagram` at which the body begins.
pub struct DecodedHeader {
    pub header: Header,
    pub gateway_id: Option<GatewayId>,
    pub body_offset: usize,
}

pub fn decode_header(datagram: &[u8]) -> Result<DecodedHeader, ForwarderError> {
    if datagram.len() < 4 {
        return Err(ForwarderError::Protocol("datagram shorter than header".into()));
    }
    if datagram[0] != PROTOCOL_VERSION {
        return Err(ForwarderError::Protocol(format!("unsupported protocol version {}", datagram[0])));
    }
    let token = ((datagram[1] as u16) << 8) | (datagram[2] as u16);
    let ptype = PacketType::from_byte(datagram[3])?;
    let carries_gateway_id = matches!(ptype, PacketType::PushData | PacketType::PullData | PacketType::TxAck);
    if carries_gateway_id {
        if datagram.len() < 12 {
            return Err(ForwarderError::Protocol("datagram missing gateway id".into()));
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&datagram[4..12]);
        Ok(DecodedHeader { header: Header { token, ptype }, gateway_id: Some(id), body_offset: 12 })
    } else {
        Ok(DecodedHeader { header: Header { token, ptype }, gateway_id: None, body_offset: 4 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_with_gateway_id() {
        let id: GatewayId = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];
        let encoded = encode_header(Header { token: 0xBEEF, ptype: PacketType::PushData }, Some(id));
        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded.header.token, 0xBEEF);
        assert_eq!(decoded.header.ptype, PacketType::PushData);
        assert_eq!(decoded.gateway_id, Some(id));
        assert_eq!(decoded.body_offset, 12);
    }

    #[test]
    fn header_without_gateway_id() {
        let encoded = encode_header(Header { token: 1, ptype: PacketType::PushAck }, None);
        assert_eq!(encoded.len(), 4);
        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded.gateway_id, None);
        assert_eq!(decoded.body_offset, 4);
    }

    #[test]
    fn rejects_bad_version() {
        let mut encoded = encode_header(Header { token: 1, ptype: PacketType::PushAck }, None);
        encoded[0] = 1;
        assert!(decode_header(&encoded).is_err());
    }
}
