//! C5 — Downstream Receiver, with the Beacon Generator (C7) pre-allocation
//! step folded into the same loop per `spec.md` §4.3/§4.4.

use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::beacon::BeaconScheduler;
use crate::concentrator::ConcentratorHal;
use crate::config::RadioConf;
use crate::constants::{DOWNSTREAM_POLL, TX_START_DELAY};
use crate::error::ForwarderError;
use crate::instrumentation::DownstreamStats;
use crate::jit::{JitQueue, PacketClass, TxDescriptor};
use crate::protocol::header::{decode_header, PacketType};
use crate::protocol::txpk::{parse_lora_datr, resolve_scheduling, Scheduling, TxAckBody, TxPk};
use crate::protocol::{b64, decode_pull_resp, encode_pull_data, encode_tx_ack, random_token, GatewayId};
use crate::signal::Shutdown;
use crate::time_ref::TimeReference;
use crate::xtal::XtalTracker;

/// One RF chain's downlink surface: its JIT queue and its radio descriptor.
pub struct Chain {
    pub jit: SyncMutex<JitQueue>,
    pub radio: RadioConf,
}

pub struct DownstreamReceiver {
    socket: Arc<UdpSocket>,
    gateway_id: GatewayId,
    chains: Vec<Arc<Chain>>,
    concentrator: Arc<dyn ConcentratorHal>,
    time_ref: Arc<TimeReference>,
    xtal: Arc<XtalTracker>,
    beacon: SyncMutex<BeaconScheduler>,
    stats: Arc<DownstreamStats>,
    keepalive_interval: Duration,
    autoquit_threshold: u32,
}

impl DownstreamReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Arc<UdpSocket>,
        gateway_id: GatewayId,
        chains: Vec<Arc<Chain>>,
        concentrator: Arc<dyn ConcentratorHal>,
        time_ref: Arc<TimeReference>,
        xtal: Arc<XtalTracker>,
        beacon: BeaconScheduler,
        stats: Arc<DownstreamStats>,
        keepalive_interval: Duration,
        autoquit_threshold: u32,
    ) -> Self {
        DownstreamReceiver {
            socket,
            gateway_id,
            chains,
            concentrator,
            time_ref,
            xtal,
            beacon: SyncMutex::new(beacon),
            stats,
            keepalive_interval,
            autoquit_threshold,
        }
    }

    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ForwarderError> {
        let mut acked_since_last_pull = true;
        let mut last_pull = Instant::now() - self.keepalive_interval;
        let mut buf = [0u8; 2048];

        while !shutdown.should_stop() {
            if last_pull.elapsed() >= self.keepalive_interval {
                if !acked_since_last_pull {
                    let streak = self.stats.record_pull_unacked();
                    if self.autoquit_threshold > 0 && streak >= self.autoquit_threshold as u64 {
                        shutdown.request_graceful();
                    }
                }
                self.send_pull_data().await?;
                acked_since_last_pull = false;
                last_pull = Instant::now();
            }

            self.fill_beacon_queue().await;

            let Ok(Ok(n)) = tokio::time::timeout(DOWNSTREAM_POLL, self.socket.recv(&mut buf)).await else {
                continue;
            };
            if self.handle_datagram(&buf[..n]).await? {
                acked_since_last_pull = true;
            }
        }
        Ok(())
    }

    async fn send_pull_data(&self) -> Result<(), ForwarderError> {
        let token = random_token();
        let datagram = encode_pull_data(token, self.gateway_id);
        self.socket.send(&datagram).await.map_err(|e| ForwarderError::Network(e.to_string()))?;
        self.stats.record_pull_sent();
        Ok(())
    }

    async fn fill_beacon_queue(&self) {
        let Some(chain0) = self.chains.first() else { return };
        let snapshot = self.time_ref.snapshot();
        let Ok(now) = self.concentrator.trigger_count().await else { return };
        let mut beacon = self.beacon.lock().expect("beacon scheduler lock poisoned");
        let mut jit = chain0.jit.lock().expect("jit queue lock poisoned");
        beacon.fill_queue(now, snapshot.as_ref(), &self.xtal, &mut jit);
    }

    /// Handle one datagram; returns `true` if it was a PULL_ACK (to reset the
    /// auto-quit streak).
    async fn handle_datagram(&self, datagram: &[u8]) -> Result<bool, ForwarderError> {
        let decoded = decode_header(datagram)?;
        match decoded.header.ptype {
            PacketType::PullAck => {
                self.stats.record_pull_acked();
                Ok(true)
            }
            PacketType::PullResp => {
                self.stats.record_tx_requested();
                let txpk = decode_pull_resp(&datagram[decoded.body_offset..])?;
                let ack_body = self.handle_txpk(&txpk).await;
                if ack_body.is_ok() {
                    self.stats.record_tx_accepted();
                } else if ack_body.error.is_some() {
                    self.stats.record_tx_rejected();
                }
                let ack = encode_tx_ack(decoded.header.token, self.gateway_id, ack_body)?;
                self.socket.send(&ack).await.map_err(|e| ForwarderError::Network(e.to_string()))?;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Resolve scheduling, validate frequency/power, decode the payload and
    /// enqueue — returns the TX_ACK body to send back (§4.3).
    async fn handle_txpk(&self, txpk: &TxPk) -> TxAckBody {
        let chain = match self.chains.get(txpk.rfch as usize) {
            Some(c) => c.clone(),
            None => return TxAckBody::error("TX_FREQ"),
        };

        let freq_hz = (txpk.freq * 1_000_000.0).round() as u32;
        if freq_hz < chain.radio.tx_freq_min || freq_hz > chain.radio.tx_freq_max {
            return TxAckBody::error("TX_FREQ");
        }

        let target_count = match resolve_scheduling(txpk) {
            Ok(Scheduling::Immediate) => match self.concentrator.trigger_count().await {
                Ok(now) => now.offset(TX_START_DELAY.as_micros() as i64),
                Err(_) => return TxAckBody::error("GPS_UNLOCKED"),
            },
            Ok(Scheduling::AtCounter(tmst)) => crate::counter::CounterUs(tmst),
            Ok(Scheduling::AtGpsTime(tmms)) => {
                let Some(snapshot) = self.time_ref.snapshot().filter(|s| s.is_valid()) else {
                    return TxAckBody::error("GPS_UNLOCKED");
                };
                let gps = crate::time_ref::TimeSpec::new(tmms / 1000, ((tmms % 1000) * 1_000_000) as u32);
                snapshot.gps_to_counter(gps)
            }
            Err(_) => return TxAckBody::error("GPS_UNLOCKED"),
        };

        let (warn, power_dbm) = match chain.radio.nearest_lower_power(txpk.powe) {
            Some(p) if p == txpk.powe => (None, p),
            Some(p) => (Some(p), p),
            None => (None, txpk.powe),
        };

        let payload = match b64::decode(&txpk.data) {
            Ok(p) => p,
            Err(_) => return TxAckBody::error("INVALID_PARAM"),
        };
        if payload.len() != txpk.size as usize {
            return TxAckBody::error("INVALID_PARAM");
        }

        let post_delay_us = time_on_air_us(txpk, payload.len());
        let descriptor = TxDescriptor {
            count_us: target_count,
            pre_delay_us: TX_START_DELAY.as_micros() as u32,
            post_delay_us,
            packet_class: PacketClass::ClassA,
            freq_hz,
            power_dbm,
            payload,
        };

        let now = match self.concentrator.trigger_count().await {
            Ok(n) => n,
            Err(_) => return TxAckBody::error("GPS_UNLOCKED"),
        };
        let mut jit = chain.jit.lock().expect("jit queue lock poisoned");
        match jit.enqueue(now, descriptor, 0) {
            Ok(()) => match warn {
                Some(used) => TxAckBody::tx_power_warning(used),
                None => TxAckBody::ok(),
            },
            Err(e) => TxAckBody::error(e.as_wire_str()),
        }
    }
}

/// Coarse LoRa time-on-air estimate for the JIT collision window; the HAL
/// computes the precise figure at send time.
fn time_on_air_us(txpk: &TxPk, payload_len: usize) -> u32 {
    let Ok(datr) = parse_lora_datr(&txpk.datr) else { return 100_000 };
    let symbol_us = (1u64 << datr.spreading_factor) * 1_000_000 / datr.bandwidth_hz as u64;
    let preamble = txpk.prea.unwrap_or(crate::constants::STD_LORA_PREAMBLE) as u64;
    let payload_symbols = 8 + payload_len as u64;
    ((preamble + 4 + payload_symbols) * symbol_us) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::BeaconParams;
    use crate::config::{RadioType, RssiTcomp, TxGainLutEntry};
    use crate::instrumentation::DownstreamStats;

    fn radio_conf(lut: Vec<TxGainLutEntry>) -> RadioConf {
        RadioConf {
            enable: true,
            freq: 867_500_000,
            rssi_offset: 0.0,
            rssi_tcomp: RssiTcomp::default(),
            radio_type: RadioType::Sx1250,
            single_input_mode: false,
            tx_enable: true,
            tx_freq_min: 863_000_000,
            tx_freq_max: 870_000_000,
            tx_gain_lut: lut,
        }
    }

    fn sample_txpk(freq: f64, powe: i8) -> TxPk {
        TxPk {
            imme: true,
            tmst: None,
            tmms: None,
            freq,
            rfch: 0,
            powe,
            modu: "LORA".into(),
            datr: "SF7BW125".into(),
            codr: Some("4/5".into()),
            ipol: true,
            prea: None,
            ncrc: false,
            nhdr: false,
            size: 4,
            data: crate::protocol::b64::encode([1, 2, 3, 4]),
            fdev: None,
        }
    }

    fn bind_local_socket() -> UdpSocket {
        let std_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        std_socket.set_nonblocking(true).unwrap();
        UdpSocket::from_std(std_socket).unwrap()
    }

    fn make_receiver(lut: Vec<TxGainLutEntry>) -> (DownstreamReceiver, Arc<UdpSocket>) {
        // socket is only needed for type-completeness in these unit tests,
        // which call `handle_txpk` directly rather than `run`.
        let socket = Arc::new(bind_local_socket());
        let chain = Arc::new(Chain { jit: SyncMutex::new(JitQueue::new()), radio: radio_conf(lut) });
        let receiver = DownstreamReceiver::new(
            socket.clone(),
            [0u8; 8],
            vec![chain],
            Arc::new(crate::concentrator::MockConcentrator::new()),
            Arc::new(TimeReference::new()),
            Arc::new(XtalTracker::new()),
            BeaconScheduler::new(BeaconParams {
                period_s: 0,
                freq_hz: 869_525_000,
                freq_nb: 1,
                freq_step_hz: 0,
                datarate: 9,
                bw_hz: 125_000,
                power_dbm: 14,
                infodesc: 0,
                ref_lat: 0.0,
                ref_lon: 0.0,
            }),
            Arc::new(DownstreamStats::new()),
            Duration::from_secs(5),
            0,
        );
        (receiver, socket)
    }

    #[tokio::test]
    async fn s4_tx_power_warning_uses_nearest_lower_entry() {
        let (receiver, _socket) =
            make_receiver(vec![TxGainLutEntry { rf_power: 7, pa_gain: 0, pwr_idx: 0 }, TxGainLutEntry { rf_power: 10, pa_gain: 1, pwr_idx: 1 }, TxGainLutEntry { rf_power: 14, pa_gain: 2, pwr_idx: 2 }]);
        let ack = receiver.handle_txpk(&sample_txpk(868.1, 12)).await;
        assert_eq!(ack.warn, Some("TX_POWER"));
        assert_eq!(ack.value, Some(10));
    }

    #[tokio::test]
    async fn out_of_range_frequency_rejected_with_tx_freq() {
        let (receiver, _socket) = make_receiver(vec![]);
        let ack = receiver.handle_txpk(&sample_txpk(900.0, 14)).await;
        assert_eq!(ack.error, Some("TX_FREQ"));
    }

    #[tokio::test]
    async fn property6_class_b_without_gps_reference_is_rejected() {
        let (receiver, _socket) = make_receiver(vec![]);
        let mut txpk = sample_txpk(868.1, 14);
        txpk.imme = false;
        txpk.tmms = Some(1_280_000_000_000);
        let ack = receiver.handle_txpk(&txpk).await;
        assert_eq!(ack.error, Some("GPS_UNLOCKED"));
    }

    #[tokio::test]
    async fn size_mismatch_rejected_as_invalid_param() {
        let (receiver, _socket) = make_receiver(vec![]);
        let mut txpk = sample_txpk(868.1, 14);
        txpk.size = 99;
        let ack = receiver.handle_txpk(&txpk).await;
        assert_eq!(ack.error, Some("INVALID_PARAM"));
    }
}
