//! C4 — Upstream Forwarder.
//!
//! Drains received radio packets, annotates them with time, serializes to
//! the wire protocol, and tracks PUSH_DATA/PUSH_ACK round trips (`spec.md`
//! §4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::concentrator::{ConcentratorHal, CrcStatus, RxPacket};
use crate::config::DebugRefPayload;
use crate::constants::{FETCH_SLEEP, NB_PKT_MAX, PUSH_TIMEOUT};
use crate::error::ForwarderError;
use crate::instrumentation::{StatusMailbox, UpstreamStats};
use crate::protocol::header::{decode_header, PacketType};
use crate::protocol::{encode_push_data, random_token, rxpk, GatewayId};
use crate::signal::Shutdown;
use crate::time_ref::TimeReference;

/// Which CRC outcomes are allowed upstream, per `gateway_conf.forward_crc_*`.
#[derive(Debug, Clone, Copy)]
pub struct CrcForwardPolicy {
    pub valid: bool,
    pub error: bool,
    pub disabled: bool,
}

impl CrcForwardPolicy {
    fn allows(&self, crc: CrcStatus) -> bool {
        match crc {
            CrcStatus::Ok => self.valid,
            CrcStatus::Bad => self.error,
            CrcStatus::None => self.disabled,
        }
    }
}

pub struct UpstreamForwarder {
    socket: Arc<UdpSocket>,
    gateway_id: GatewayId,
    concentrator: Arc<dyn ConcentratorHal>,
    time_ref: Arc<TimeReference>,
    stats: Arc<UpstreamStats>,
    mailbox: Arc<StatusMailbox>,
    crc_policy: CrcForwardPolicy,
    push_timeout: Duration,
    ref_payload_ids: Vec<u32>,
    ref_payload_matches: AtomicU64,
}

impl UpstreamForwarder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Arc<UdpSocket>,
        gateway_id: GatewayId,
        concentrator: Arc<dyn ConcentratorHal>,
        time_ref: Arc<TimeReference>,
        stats: Arc<UpstreamStats>,
        mailbox: Arc<StatusMailbox>,
        crc_policy: CrcForwardPolicy,
        push_timeout: Duration,
        ref_payload: Vec<DebugRefPayload>,
    ) -> Self {
        UpstreamForwarder {
            socket,
            gateway_id,
            concentrator,
            time_ref,
            stats,
            mailbox,
            crc_policy,
            push_timeout: if push_timeout.is_zero() { PUSH_TIMEOUT } else { push_timeout },
            ref_payload_ids: ref_payload.into_iter().map(|r| r.id).collect(),
            ref_payload_matches: AtomicU64::new(0),
        }
    }

    /// `gateway_conf.debug.ref_payload`: best-effort match of each packet's
    /// leading 4 bytes (big-endian) against the configured reference IDs,
    /// logged and counted at `debug` — a diagnostic aid, not part of the
    /// STAT record.
    fn count_ref_payload_matches(&self, packets: &[RxPacket]) {
        if self.ref_payload_ids.is_empty() {
            return;
        }
        for p in packets {
            let Some(prefix) = p.payload.get(0..4) else { continue };
            let id = u32::from_be_bytes(prefix.try_into().expect("slice of length 4"));
            if self.ref_payload_ids.contains(&id) {
                let total = self.ref_payload_matches.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("ref_payload match: id={id:#010x} total={total}");
            }
        }
    }

    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ForwarderError> {
        while !shutdown.should_stop() {
            self.run_once().await?;
        }
        Ok(())
    }

    /// One fetch → annotate → PUSH_DATA → wait-for-ACK cycle. Split out for
    /// direct exercise in tests (scenario S5).
    pub async fn run_once(&self) -> Result<(), ForwarderError> {
        let packets = self.concentrator.receive(NB_PKT_MAX).await?;
        let pending_report = self.mailbox.take();

        if packets.is_empty() && pending_report.is_none() {
            tokio::time::sleep(FETCH_SLEEP).await;
            return Ok(());
        }

        self.count_ref_payload_matches(&packets);

        let snapshot = self.time_ref.snapshot().filter(|s| s.is_valid());
        let rxpk_list: Vec<_> = packets
            .iter()
            .inspect(|p| self.stats.record_rx(p.crc == CrcStatus::Ok, self.crc_policy.allows(p.crc)))
            .filter(|p| self.crc_policy.allows(p.crc))
            .map(|p| {
                let (utc, gps_ms) = match &snapshot {
                    Some(s) => {
                        let utc = s.counter_to_utc(p.count_us);
                        let gps = s.counter_to_gps(p.count_us);
                        (Some(utc), Some(gps.sec * 1000 + (gps.nsec / 1_000_000) as i64))
                    }
                    None => (None, None),
                };
                rxpk::from_rx_packet(p, utc, gps_ms)
            })
            .collect();

        let token = random_token();
        let datagram = encode_push_data(token, self.gateway_id, rxpk_list, pending_report)?;
        self.socket.send(&datagram).await.map_err(|e| ForwarderError::Network(e.to_string()))?;
        self.stats.record_dgram_sent(token);

        self.wait_for_ack().await;
        Ok(())
    }

    /// Single deadline-driven read, discarding non-matching datagrams until
    /// the deadline — the DESIGN NOTES §9 cleanup of the original's
    /// two-nested-halved-timeout PUSH_ACK wait.
    async fn wait_for_ack(&self) {
        let deadline = Instant::now() + self.push_timeout;
        let mut buf = [0u8; 64];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            let Ok(Ok(n)) = tokio::time::timeout(remaining, self.socket.recv(&mut buf)).await else {
                return;
            };
            let Ok(decoded) = decode_header(&buf[..n]) else { continue };
            if decoded.header.ptype == PacketType::PushAck && self.stats.record_ack(decoded.header.token) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concentrator::{MockConcentrator, Modulation, RxPacket};
    use crate::counter::CounterUs;

    fn sample_packet() -> RxPacket {
        RxPacket {
            count_us: CounterUs(1000),
            chan: 0,
            rf_chain: 0,
            freq_hz: 868_100_000,
            modulation: Modulation::LoRa { spreading_factor: 7, bandwidth_hz: 125_000, coderate: "4/5" },
            crc: CrcStatus::Ok,
            rssi_signal: -80.0,
            rssi_chan: -90.0,
            snr: 8.0,
            freq_offset_hz: 0,
            fine_timestamp: None,
            payload: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn crc_policy_respects_each_outcome_independently() {
        let policy = CrcForwardPolicy { valid: true, error: false, disabled: false };
        assert!(policy.allows(CrcStatus::Ok));
        assert!(!policy.allows(CrcStatus::Bad));
        assert!(!policy.allows(CrcStatus::None));
    }

    #[tokio::test]
    async fn ref_payload_match_is_counted_and_unmatched_is_not() {
        let forwarder = UpstreamForwarder::new(
            Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap()),
            [0u8; 8],
            Arc::new(MockConcentrator::new()),
            Arc::new(TimeReference::new()),
            Arc::new(UpstreamStats::new()),
            Arc::new(StatusMailbox::new()),
            CrcForwardPolicy { valid: true, error: true, disabled: true },
            Duration::from_millis(50),
            vec![DebugRefPayload { id: 0x0102_0304 }],
        );

        forwarder.count_ref_payload_matches(&[sample_packet()]);
        assert_eq!(forwarder.ref_payload_matches.load(Ordering::Relaxed), 1);

        let mut unmatched = sample_packet();
        unmatched.payload = vec![9, 9, 9, 9];
        forwarder.count_ref_payload_matches(&[unmatched]);
        assert_eq!(forwarder.ref_payload_matches.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn s5_push_ack_roundtrip_increments_ack_counter() {
        let up_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let srv_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let srv_addr = srv_socket.local_addr().unwrap();
        up_socket.connect(srv_addr).await.unwrap();
        srv_socket.connect(up_socket.local_addr().unwrap()).await.unwrap();

        let hal = Arc::new(MockConcentrator::new());
        hal.push_rx(sample_packet()).await;

        let stats = Arc::new(UpstreamStats::new());
        let forwarder = UpstreamForwarder::new(
            up_socket,
            [0u8; 8],
            hal,
            Arc::new(TimeReference::new()),
            stats.clone(),
            Arc::new(StatusMailbox::new()),
            CrcForwardPolicy { valid: true, error: true, disabled: true },
            Duration::from_millis(50),
            vec![],
        );

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let n = srv_socket.recv(&mut buf).await.unwrap();
            let decoded = decode_header(&buf[..n]).unwrap();
            let ack = crate::protocol::encode_header(
                crate::protocol::Header { token: decoded.header.token, ptype: PacketType::PushAck },
                None,
            );
            srv_socket.send(&ack).await.unwrap();
        });

        let (run_result, responder_result) = tokio::join!(forwarder.run_once(), responder);
        run_result.unwrap();
        responder_result.unwrap();

        assert_eq!(stats.snapshot().dgram_sent, 1);
        assert_eq!(stats.snapshot().ack_received, 1);
    }
}
