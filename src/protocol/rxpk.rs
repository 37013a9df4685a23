//! `RXPK` — one uplink radio packet as carried in a PUSH_DATA body.

use serde::{Deserialize, Serialize};

use crate::concentrator::{CrcStatus, Modulation, RxPacket};
use crate::protocol::b64;
use crate::time_ref::TimeSpec;

fn datr_string(modulation: &Modulation) -> String {
    match modulation {
        Modulation::LoRa { spreading_factor, bandwidth_hz, .. } => {
            format!("SF{}BW{}", spreading_factor, bandwidth_hz / 1000)
        }
        Modulation::Fsk { bitrate } => bitrate.to_string(),
    }
}

fn codr_string(modulation: &Modulation) -> &'static str {
    match modulation {
        Modulation::LoRa { coderate, .. } => coderate,
        Modulation::Fsk { .. } => "OFF",
    }
}

fn modu_string(modulation: &Modulation) -> &'static str {
    match modulation {
        Modulation::LoRa { .. } => "LORA",
        Modulation::Fsk { .. } => "FSK",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxPk {
    pub jver: u8,
    pub tmst: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ftime: Option<u32>,
    pub chan: u8,
    pub rfch: u8,
    pub freq: f64,
    pub mid: u8,
    pub stat: i8,
    pub modu: &'static str,
    pub datr: String,
    pub codr: &'static str,
    pub rssis: f32,
    pub lsnr: f32,
    pub foff: i32,
    pub rssi: f32,
    pub size: u32,
    pub data: String,
}

/// `stat` field per §6: CRC OK = 1, CRC failed = -1, no CRC = 0.
pub fn stat_from_crc(crc: CrcStatus) -> i8 {
    match crc {
        CrcStatus::Ok => 1,
        CrcStatus::Bad => -1,
        CrcStatus::None => 0,
    }
}

/// Build an RXPK object from a HAL-level received packet, optionally
/// annotated with a UTC timestamp from a valid time reference.
pub fn from_rx_packet(pkt: &RxPacket, utc: Option<TimeSpec>, gps_ms: Option<i64>) -> RxPk {
    RxPk {
        jver: 1,
        tmst: pkt.count_us.0,
        time: utc.map(|t| chrono_rfc3339(t)),
        tmms: gps_ms,
        ftime: pkt.fine_timestamp,
        chan: pkt.chan,
        rfch: pkt.rf_chain,
        freq: pkt.freq_hz as f64 / 1_000_000.0,
        mid: 0,
        stat: stat_from_crc(pkt.crc),
        modu: modu_string(&pkt.modulation),
        datr: datr_string(&pkt.modulation),
        codr: codr_string(&pkt.modulation),
        rssis: pkt.rssi_signal,
        lsnr: pkt.snr,
        foff: pkt.freq_offset_hz,
        rssi: pkt.rssi_chan,
        size: pkt.payload.len() as u32,
        data: b64::encode(&pkt.payload),
    }
}

fn chrono_rfc3339(t: TimeSpec) -> String {
    use chrono::{DateTime, Utc};
    let dt = DateTime::<Utc>::from_timestamp(t.sec, t.nsec).unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterUs;

    fn sample_packet() -> RxPacket {
        RxPacket {
            count_us: CounterUs(123_456),
            chan: 2,
            rf_chain: 0,
            freq_hz: 868_100_000,
            modulation: Modulation::LoRa { spreading_factor: 7, bandwidth_hz: 125_000, coderate: "4/5" },
            crc: CrcStatus::Ok,
            rssi_signal: -42.0,
            rssi_chan: -45.0,
            snr: 9.5,
            freq_offset_hz: 120,
            fine_timestamp: None,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn rxpk_fields_match_source_packet() {
        let rxpk = from_rx_packet(&sample_packet(), None, None);
        assert_eq!(rxpk.tmst, 123_456);
        assert_eq!(rxpk.chan, 2);
        assert_eq!(rxpk.modu, "LORA");
        assert_eq!(rxpk.datr, "SF7BW125");
        assert_eq!(rxpk.codr, "4/5");
        assert_eq!(rxpk.stat, 1);
        assert_eq!(rxpk.size, 4);
        assert_eq!(rxpk.data, b64::encode([0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn rxpk_serializes_without_null_optionals() {
        let rxpk = from_rx_packet(&sample_packet(), None, None);
        let json = serde_json::to_string(&rxpk).unwrap();
        assert!(!json.contains("\"time\""));
        assert!(!json.contains("\"tmms\""));
    }
}
