//! C7 — Beacon Generator.
//!
//! Builds the fixed beacon frame layout (`spec.md` §3) and pre-allocates
//! upcoming beacon slots into chain 0's JIT queue (§4.4).

use crc::{Algorithm, Crc};
use once_cell::sync::Lazy;

use crate::constants::{BEACON_PREAMBLE, JIT_NUM_BEACON_IN_QUEUE};
use crate::jit::{JitError, JitQueue, PacketClass, TxDescriptor};
use crate::time_ref::{TimeReferenceSnapshot, TimeSpec};
use crate::xtal::XtalTracker;

/// The beacon CRC: polynomial 0x1021, init 0x0000, MSB-first, no xor-out —
/// the same parameters the LoRaWAN beacon spec and `crc16()` in the
/// reference gateway implementation both use.
const BEACON_CRC_ALGO: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x0000,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x31C3,
    residue: 0x0000,
};

static BEACON_CRC: Lazy<Crc<u16>> = Lazy::new(|| Crc::<u16>::new(&BEACON_CRC_ALGO));

fn beacon_crc(data: &[u8]) -> u16 {
    BEACON_CRC.checksum(data)
}

/// RFU byte counts on either side of the gateway-specific fields, indexed by
/// beacon datarate (spreading factor at the fixed 125/500kHz beacon
/// bandwidth). Per the reference implementation's beacon-fill switch.
fn rfu_sizes(beacon_datarate: u8) -> Option<(usize, usize)> {
    match beacon_datarate {
        8 => Some((1, 3)),
        9 => Some((2, 0)),
        10 => Some((3, 1)),
        12 => Some((5, 3)),
        _ => None,
    }
}

/// Saturating signed 24-bit encode of a coordinate as a fraction of its
/// full-scale range (±90° for latitude, ±180° for longitude), per §3 and
/// Testable Property 4.
fn encode_coord_q23(value_deg: f64, full_scale_deg: f64) -> [u8; 3] {
    let scaled = (value_deg / full_scale_deg) * (1i64 << 23) as f64;
    let clamped = scaled.round().clamp(0xFF80_0000u32 as i32 as f64, 0x007F_FFFFi32 as f64) as i32;
    let bits = clamped as u32;
    [(bits & 0xFF) as u8, ((bits >> 8) & 0xFF) as u8, ((bits >> 16) & 0xFF) as u8]
}

/// Build the full beacon payload bytes per §3's layout, plus both CRC-16
/// fields, for given GPS second and reference coordinates.
pub fn build_beacon_payload(gps_sec: u32, beacon_datarate: u8, beacon_infodesc: u8, ref_lat: f64, ref_lon: f64) -> Result<Vec<u8>, &'static str> {
    let (rfu1, rfu2) = rfu_sizes(beacon_datarate).ok_or("unsupported beacon datarate")?;

    let mut payload = Vec::with_capacity(rfu1 + 4 + 2 + 7 + rfu2 + 2);
    payload.extend(std::iter::repeat(0u8).take(rfu1));
    payload.extend_from_slice(&gps_sec.to_le_bytes());

    let crc1 = beacon_crc(&payload);
    payload.extend_from_slice(&crc1.to_le_bytes());

    let gateway_part_start = payload.len();
    payload.push(beacon_infodesc);
    payload.extend_from_slice(&encode_coord_q23(ref_lat, 90.0));
    payload.extend_from_slice(&encode_coord_q23(ref_lon, 180.0));
    payload.extend(std::iter::repeat(0u8).take(rfu2));

    let crc2 = beacon_crc(&payload[gateway_part_start..]);
    payload.extend_from_slice(&crc2.to_le_bytes());

    Ok(payload)
}

/// Verify both CRC fields of an already-built beacon payload, per Testable
/// Property 3. Returns `false` on any length/framing mismatch.
pub fn verify_beacon_crc(payload: &[u8], beacon_datarate: u8) -> bool {
    let Some((rfu1, rfu2)) = rfu_sizes(beacon_datarate) else { return false };
    let crc1_offset = rfu1 + 4;
    let gateway_part_start = crc1_offset + 2;
    let crc2_offset = gateway_part_start + 7 + rfu2;
    if payload.len() != crc2_offset + 2 {
        return false;
    }
    let crc1_expected = u16::from_le_bytes([payload[crc1_offset], payload[crc1_offset + 1]]);
    let crc2_expected = u16::from_le_bytes([payload[crc2_offset], payload[crc2_offset + 1]]);
    beacon_crc(&payload[..crc1_offset]) == crc1_expected && beacon_crc(&payload[gateway_part_start..crc2_offset]) == crc2_expected
}

/// Static beacon scheduling parameters, sourced from `gateway_conf`.
#[derive(Debug, Clone)]
pub struct BeaconParams {
    pub period_s: u32,
    pub freq_hz: u32,
    pub freq_nb: u8,
    pub freq_step_hz: u32,
    pub datarate: u8,
    pub bw_hz: u32,
    pub power_dbm: i8,
    pub infodesc: u8,
    pub ref_lat: f64,
    pub ref_lon: f64,
}

/// Tracks `last_beacon_gps_time` and the per-slot retry counter across
/// calls to [`BeaconScheduler::fill_queue`].
pub struct BeaconScheduler {
    params: BeaconParams,
    last_beacon_gps_sec: Option<i64>,
}

impl BeaconScheduler {
    pub fn new(params: BeaconParams) -> Self {
        BeaconScheduler { params, last_beacon_gps_sec: None }
    }

    fn align_down(gps_sec: i64, period_s: i64) -> i64 {
        gps_sec - gps_sec.rem_euclid(period_s)
    }

    /// Run the §4.4 algorithm once: keep enqueueing future beacon slots into
    /// chain 0's queue until it holds `JIT_NUM_BEACON_IN_QUEUE` or a
    /// precondition fails. Returns the number of beacons newly enqueued.
    pub fn fill_queue(&mut self, now: crate::counter::CounterUs, snapshot: Option<&TimeReferenceSnapshot>, xtal: &XtalTracker, chain0: &mut JitQueue) -> usize {
        if self.params.period_s == 0 {
            return 0;
        }
        let Some(snapshot) = snapshot else { return 0 };
        if !xtal.is_locked() {
            return 0;
        }

        let timer = crate::util::PerfTimer::start("beacon_queue_fill");
        let mut enqueued = 0;
        let mut retry: i64 = 0;
        let period_us = self.params.period_s as i64 * 1_000_000;

        while chain0.num_beacons() < JIT_NUM_BEACON_IN_QUEUE {
            let base = self.last_beacon_gps_sec.unwrap_or_else(|| Self::align_down(snapshot.gps.sec, self.params.period_s as i64));
            let next_gps_sec = base + self.params.period_s as i64 * (1 + retry);
            let next_gps = TimeSpec::new(next_gps_sec, 0);
            let target_count = snapshot.gps_to_counter(next_gps);

            let chan = ((next_gps_sec / self.params.period_s as i64) as u32 % self.params.freq_nb.max(1) as u32) as u32;
            let freq_hz = self.params.freq_hz + chan * self.params.freq_step_hz;

            let payload = match build_beacon_payload(next_gps_sec as u32, self.params.datarate, self.params.infodesc, self.params.ref_lat, self.params.ref_lon) {
                Ok(p) => p,
                Err(_) => break,
            };

            let descriptor = TxDescriptor {
                count_us: target_count,
                pre_delay_us: 0,
                post_delay_us: beacon_time_on_air_us(self.params.datarate, self.params.bw_hz),
                packet_class: PacketClass::Beacon,
                freq_hz,
                power_dbm: self.params.power_dbm,
                payload,
            };

            match chain0.enqueue(now, descriptor, period_us) {
                Ok(()) => {
                    self.last_beacon_gps_sec = Some(next_gps_sec);
                    retry = 0;
                    enqueued += 1;
                }
                Err(JitError::CollisionBeacon) => {
                    retry += 1;
                }
                Err(_) => {
                    retry += 1;
                    if retry > 4 {
                        break;
                    }
                }
            }
        }
        timer.finish();
        enqueued
    }
}

/// Beacon preamble (§4.4) is fixed at 10 symbols; time-on-air at SF9/BW125
/// dominates the beacon period by a wide margin, so a coarse symbol-count
/// estimate is enough for the JIT window — exact airtime is computed by the
/// HAL at send time.
fn beacon_time_on_air_us(datarate: u8, bw_hz: u32) -> u32 {
    let symbol_us = (1u64 << datarate) * 1_000_000 / bw_hz as u64;
    let payload_symbols = 8 + (rfu_sizes(datarate).map(|(a, b)| a + b).unwrap_or(0) as u64) + 9;
    ((BEACON_PREAMBLE as u64 + 4 + payload_symbols) * symbol_us) as u32
}
