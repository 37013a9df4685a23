//! `TXPK` — the downlink descriptor carried inside a PULL_RESP body, and the
//! `TX_ACK` body the gateway replies with.

use serde::{Deserialize, Serialize};

use crate::error::ForwarderError;

#[derive(Debug, Clone, Deserialize)]
pub struct TxPk {
    #[serde(default)]
    pub imme: bool,
    pub tmst: Option<u32>,
    pub tmms: Option<i64>,
    pub freq: f64,
    pub rfch: u8,
    pub powe: i8,
    pub modu: String,
    pub datr: String,
    pub codr: Option<String>,
    #[serde(default)]
    pub ipol: bool,
    pub prea: Option<u16>,
    #[serde(default)]
    pub ncrc: bool,
    #[serde(default)]
    pub nhdr: bool,
    pub size: u32,
    pub data: String,
    pub fdev: Option<u32>,
}

/// The resolved scheduling mode of a TXPK, per §4.3: exactly one of
/// `imme`/`tmst`/`tmms` determines the LoRaWAN class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduling {
    Immediate,
    AtCounter(u32),
    AtGpsTime(i64),
}

pub fn resolve_scheduling(txpk: &TxPk) -> Result<Scheduling, ForwarderError> {
    if txpk.imme {
        return Ok(Scheduling::Immediate);
    }
    if let Some(tmst) = txpk.tmst {
        return Ok(Scheduling::AtCounter(tmst));
    }
    if let Some(tmms) = txpk.tmms {
        return Ok(Scheduling::AtGpsTime(tmms));
    }
    Err(ForwarderError::Protocol("txpk has none of imme/tmst/tmms".into()))
}

/// Parsed LoRa `datr` field, e.g. `SF7BW125`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoraDatr {
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
}

pub fn parse_lora_datr(datr: &str) -> Result<LoraDatr, ForwarderError> {
    let rest = datr
        .strip_prefix("SF")
        .ok_or_else(|| ForwarderError::Protocol(format!("malformed datr {datr}")))?;
    let (sf_str, bw_str) = rest
        .split_once("BW")
        .ok_or_else(|| ForwarderError::Protocol(format!("malformed datr {datr}")))?;
    let spreading_factor: u8 = sf_str.parse().map_err(|_| ForwarderError::Protocol(format!("bad SF in {datr}")))?;
    let bandwidth_khz: u32 = bw_str.parse().map_err(|_| ForwarderError::Protocol(format!("bad BW in {datr}")))?;
    Ok(LoraDatr { spreading_factor, bandwidth_hz: bandwidth_khz * 1000 })
}

#[derive(Debug, Clone, Serialize)]
pub struct TxAckBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl TxAckBody {
    pub fn ok() -> Self {
        TxAckBody { error: None, warn: None, value: None }
    }

    pub fn error(code: &'static str) -> Self {
        TxAckBody { error: Some(code), warn: None, value: None }
    }

    pub fn tx_power_warning(used_dbm: i8) -> Self {
        TxAckBody { error: None, warn: Some("TX_POWER"), value: Some(used_dbm as i64) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.warn.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TxAck {
    pub txpk_ack: TxAckBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lora_datr() {
        let d = parse_lora_datr("SF7BW125").unwrap();
        assert_eq!(d.spreading_factor, 7);
        assert_eq!(d.bandwidth_hz, 125_000);
    }

    #[test]
    fn resolves_immediate_over_tmst() {
        let txpk = TxPk {
            imme: true,
            tmst: Some(123),
            tmms: None,
            freq: 868.1,
            rfch: 0,
            powe: 14,
            modu: "LORA".into(),
            datr: "SF7BW125".into(),
            codr: Some("4/5".into()),
            ipol: true,
            prea: None,
            ncrc: false,
            nhdr: false,
            size: 4,
            data: "AAAA".into(),
            fdev: None,
        };
        assert_eq!(resolve_scheduling(&txpk).unwrap(), Scheduling::Immediate);
    }

    #[test]
    fn rejects_missing_schedule_fields() {
        let txpk = TxPk {
            imme: false,
            tmst: None,
            tmms: None,
            freq: 868.1,
            rfch: 0,
            powe: 14,
            modu: "LORA".into(),
            datr: "SF7BW125".into(),
            codr: None,
            ipol: false,
            prea: None,
            ncrc: false,
            nhdr: false,
            size: 4,
            data: "AAAA".into(),
            fdev: None,
        };
        assert!(resolve_scheduling(&txpk).is_err());
    }

    #[test]
    fn tx_ack_body_serializes_empty_on_success() {
        let body = TxAckBody::ok();
        assert_eq!(serde_json::to_string(&body).unwrap(), "{}");
    }

    #[test]
    fn tx_ack_body_serializes_warning_with_value() {
        let body = TxAckBody::tx_power_warning(10);
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"warn\":\"TX_POWER\""));
        assert!(json.contains("\"value\":10"));
    }
}
