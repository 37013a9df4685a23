//! `STAT` — the periodic status object optionally piggy-backed on PUSH_DATA.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Stat {
    pub time: String,
    pub lati: f64,
    pub long: f64,
    pub alti: i32,
    pub rxnb: u64,
    pub rxok: u64,
    pub rxfw: u64,
    pub ackr: f32,
    pub dwnb: u64,
    pub txnb: u64,
    pub temp: f32,
}
