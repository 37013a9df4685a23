//! Semtech UDP gateway protocol (`spec.md` §6): datagram header, JSON bodies,
//! and the encode/decode glue `upstream.rs`/`downstream.rs` build on.

pub mod b64;
pub mod header;
pub mod rxpk;
pub mod stat;
pub mod txpk;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use header::{decode_header, encode_header, DecodedHeader, GatewayId, Header, PacketType};
pub use rxpk::RxPk;
pub use stat::Stat;
pub use txpk::{TxAck, TxAckBody, TxPk};

use crate::error::ForwarderError;

/// A fresh random 16-bit token, as required on every PUSH_DATA/PULL_DATA.
pub fn random_token() -> u16 {
    rand::thread_rng().gen()
}

#[derive(Debug, Clone, Serialize)]
pub struct PushDataBody {
    pub rxpk: Vec<RxPk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat: Option<Stat>,
}

/// Build a complete PUSH_DATA datagram: header + gateway id + JSON body.
pub fn encode_push_data(token: u16, gateway_id: GatewayId, rxpk: Vec<RxPk>, stat: Option<Stat>) -> Result<Vec<u8>, ForwarderError> {
    let mut datagram = encode_header(Header { token, ptype: PacketType::PushData }, Some(gateway_id));
    let body = PushDataBody { rxpk, stat };
    datagram.extend_from_slice(&serde_json::to_vec(&body)?);
    Ok(datagram)
}

/// Build a PULL_DATA datagram (empty body).
pub fn encode_pull_data(token: u16, gateway_id: GatewayId) -> Vec<u8> {
    encode_header(Header { token, ptype: PacketType::PullData }, Some(gateway_id))
}

/// Build a TX_ACK datagram whose token echoes the triggering PULL_RESP.
pub fn encode_tx_ack(token: u16, gateway_id: GatewayId, body: TxAckBody) -> Result<Vec<u8>, ForwarderError> {
    let mut datagram = encode_header(Header { token, ptype: PacketType::TxAck }, Some(gateway_id));
    if !body.is_ok() || body.value.is_some() {
        let ack = TxAck { txpk_ack: body };
        datagram.extend_from_slice(&serde_json::to_vec(&ack)?);
    }
    Ok(datagram)
}

#[derive(Debug, Deserialize)]
struct PullRespBody {
    txpk: TxPk,
}

/// Parse a PULL_RESP datagram's JSON body (the header has already been
/// consumed via [`decode_header`]).
pub fn decode_pull_resp(body_bytes: &[u8]) -> Result<TxPk, ForwarderError> {
    let parsed: PullRespBody = serde_json::from_slice(body_bytes)?;
    Ok(parsed.txpk)
}
