//! Typed configuration (`spec.md` §6): `SX130x_conf` and `gateway_conf`, each
//! loaded from `global_conf.json` then overlaid by `local_conf.json`.
//!
//! JSON parsing itself is out of scope (§1) — this module is the
//! typed-descriptor boundary the spec's DESIGN NOTES §9 calls for: unknown
//! enum values are rejected at `serde` deserialization time, not deep inside
//! the downstream loop.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{JSON_CONF_DEFAULT, JSON_CONF_LOCAL};
use crate::error::ForwarderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComType {
    Spi,
    Usb,
}

impl<'de> Deserialize<'de> for ComType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        match String::deserialize(de)?.as_str() {
            "SPI" => Ok(ComType::Spi),
            "USB" => Ok(ComType::Usb),
            other => Err(serde::de::Error::custom(format!("unknown com_type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioType {
    Sx1255,
    Sx1257,
    Sx1250,
}

impl<'de> Deserialize<'de> for RadioType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        match String::deserialize(de)?.as_str() {
            "SX1255" => Ok(RadioType::Sx1255),
            "SX1257" => Ok(RadioType::Sx1257),
            "SX1250" => Ok(RadioType::Sx1250),
            other => Err(serde::de::Error::custom(format!("unknown radio type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FineTimestampMode {
    HighCapacity,
    AllSf,
}

impl<'de> Deserialize<'de> for FineTimestampMode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        match String::deserialize(de)?.as_str() {
            "high_capacity" => Ok(FineTimestampMode::HighCapacity),
            "all_sf" => Ok(FineTimestampMode::AllSf),
            other => Err(serde::de::Error::custom(format!("unknown fine_timestamp.mode {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FineTimestampConf {
    pub enable: bool,
    pub mode: Option<FineTimestampMode>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RssiTcomp {
    #[serde(default)]
    pub coeff_a: f32,
    #[serde(default)]
    pub coeff_b: f32,
    #[serde(default)]
    pub coeff_c: f32,
    #[serde(default)]
    pub coeff_d: f32,
    #[serde(default)]
    pub coeff_e: f32,
}

/// Round-trip of the temperature-compensated RSSI correction curve
/// (§2 "Supplemented features"): `rssi_tcomp` evaluated at board temperature.
impl RssiTcomp {
    pub fn correction(&self, rssi_raw: f32, temperature_c: f32) -> f32 {
        self.coeff_a * temperature_c.powi(2) + self.coeff_b * temperature_c + self.coeff_c + self.coeff_d * rssi_raw + self.coeff_e
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TxGainLutEntry {
    pub rf_power: i8,
    pub pa_gain: u8,
    #[serde(default)]
    pub pwr_idx: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadioConf {
    pub enable: bool,
    pub freq: u32,
    #[serde(default)]
    pub rssi_offset: f32,
    #[serde(default)]
    pub rssi_tcomp: RssiTcomp,
    #[serde(rename = "type")]
    pub radio_type: RadioType,
    #[serde(default)]
    pub single_input_mode: bool,
    #[serde(default)]
    pub tx_enable: bool,
    #[serde(default)]
    pub tx_freq_min: u32,
    #[serde(default)]
    pub tx_freq_max: u32,
    #[serde(default)]
    pub tx_gain_lut: Vec<TxGainLutEntry>,
}

impl RadioConf {
    /// Nearest-lower gain-table entry for a requested power, per §4.3's
    /// `TX_POWER` substitution rule. `None` only if the LUT is empty.
    pub fn nearest_lower_power(&self, requested_dbm: i8) -> Option<i8> {
        self.tx_gain_lut
            .iter()
            .map(|e| e.rf_power)
            .filter(|&p| p <= requested_dbm)
            .max()
            .or_else(|| self.tx_gain_lut.iter().map(|e| e.rf_power).min())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChanMultiSfAll {
    pub spreading_factor_enable: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChanMultiSf {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_hz: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChanLoraStd {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_hz: i32,
    pub bandwidth: u32,
    pub spread_factor: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChanFsk {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_hz: i32,
    pub bandwidth: u32,
    pub datarate: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SpectralScanConf {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub freq_hz_start: u32,
    #[serde(default)]
    pub nb_chan: u8,
    #[serde(default)]
    pub nb_scan: u32,
    #[serde(default)]
    pub pace_s: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LbtConf {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sx1261Conf {
    pub spi_path: String,
    #[serde(default)]
    pub rssi_offset: f32,
    #[serde(default)]
    pub spectral_scan: SpectralScanConf,
    #[serde(default)]
    pub lbt: LbtConf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sx130xConf {
    pub com_type: ComType,
    pub com_path: String,
    #[serde(default)]
    pub lorawan_public: bool,
    #[serde(default)]
    pub clksrc: u8,
    #[serde(default)]
    pub full_duplex: bool,
    #[serde(default)]
    pub antenna_gain: i8,
    pub fine_timestamp: Option<FineTimestampConf>,
    pub sx1261_conf: Option<Sx1261Conf>,
    #[serde(default)]
    pub radio: Vec<RadioConf>,
    pub chan_multi_sf_all: Option<ChanMultiSfAll>,
    #[serde(default)]
    pub chan_multi_sf: Vec<Option<ChanMultiSf>>,
    pub chan_lora_std: Option<ChanLoraStd>,
    pub chan_fsk: Option<ChanFsk>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebugRefPayload {
    pub id: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DebugConf {
    #[serde(default)]
    pub ref_payload: Vec<DebugRefPayload>,
    pub log_file: Option<String>,
}

fn default_keepalive_s() -> u64 {
    crate::constants::DEFAULT_KEEPALIVE_S
}

fn default_stat_s() -> u64 {
    crate::constants::DEFAULT_STAT_S
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConf {
    pub gateway_id: String,
    pub server_address: String,
    pub serv_port_up: u16,
    pub serv_port_down: u16,
    #[serde(default = "default_keepalive_s")]
    pub keepalive_interval: u64,
    #[serde(default = "default_stat_s")]
    pub stat_interval: u64,
    #[serde(default)]
    pub push_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub forward_crc_valid: bool,
    #[serde(default)]
    pub forward_crc_error: bool,
    #[serde(default)]
    pub forward_crc_disabled: bool,
    pub gps_tty_path: Option<String>,
    #[serde(default)]
    pub ref_latitude: f64,
    #[serde(default)]
    pub ref_longitude: f64,
    #[serde(default)]
    pub ref_altitude: i32,
    #[serde(default)]
    pub fake_gps: bool,
    #[serde(default)]
    pub beacon_period: u32,
    #[serde(default = "crate::constants::default_beacon_freq_hz")]
    pub beacon_freq_hz: u32,
    #[serde(default = "crate::constants::default_beacon_freq_nb")]
    pub beacon_freq_nb: u8,
    #[serde(default)]
    pub beacon_freq_step: u32,
    #[serde(default = "crate::constants::default_beacon_datarate")]
    pub beacon_datarate: u8,
    #[serde(default = "crate::constants::default_beacon_bw_hz")]
    pub beacon_bw_hz: u32,
    #[serde(default = "crate::constants::default_beacon_power")]
    pub beacon_power: i8,
    #[serde(default)]
    pub beacon_infodesc: u8,
    #[serde(default)]
    pub autoquit_threshold: u32,
}

fn default_true() -> bool {
    true
}

/// Gateway MAC, parsed from `gateway_conf.gateway_id`'s 16-hex-digit string.
pub fn parse_gateway_id(hex_id: &str) -> Result<[u8; 8], ForwarderError> {
    let bytes = hex::decode(hex_id).map_err(|e| ForwarderError::Config(format!("bad gateway_id {hex_id:?}: {e}")))?;
    if bytes.len() != 8 {
        return Err(ForwarderError::Config(format!("gateway_id must be 8 bytes, got {}", bytes.len())));
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes);
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub sx130x: Sx130xConf,
    pub gateway: GatewayConf,
    pub debug: DebugConf,
}

#[derive(Deserialize)]
struct GlobalConfFile {
    #[serde(rename = "SX130x_conf")]
    sx130x_conf: Sx130xConf,
    gateway_conf: GatewayConf,
    debug_conf: Option<DebugConf>,
}

/// Partial overlay applied from `local_conf.json`: only `gateway_conf`
/// fields are meaningful to overlay, per §6.
#[derive(Deserialize)]
struct LocalConfFile {
    gateway_conf: Option<serde_json::Value>,
}

/// Load `global_conf.json` (or the `-c` override) then overlay
/// `local_conf.json` if present, per §6's CLI contract.
pub fn load(global_path: &Path) -> Result<ForwarderConfig, ForwarderError> {
    let global_text = std::fs::read_to_string(global_path)?;
    let global: GlobalConfFile = serde_json::from_str(&global_text)?;

    let mut gateway_value = serde_json::to_value(&global.gateway_conf)?;

    let local_path = global_path.with_file_name(JSON_CONF_LOCAL);
    if local_path.exists() {
        let local_text = std::fs::read_to_string(&local_path)?;
        let local: LocalConfFile = serde_json::from_str(&local_text)?;
        if let Some(overlay) = local.gateway_conf {
            merge_json(&mut gateway_value, overlay);
        }
    }

    let gateway: GatewayConf = serde_json::from_value(gateway_value)?;

    Ok(ForwarderConfig {
        sx130x: global.sx130x_conf,
        gateway,
        debug: global.debug_conf.unwrap_or_default(),
    })
}

/// Default global config path, per §6.
pub fn default_global_conf_path() -> &'static Path {
    Path::new(JSON_CONF_DEFAULT)
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    if let (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) = (base, overlay) {
        for (k, v) in overlay_map {
            base_map.insert(k, v);
        }
    }
}
