//! The concentrator hardware abstraction layer is explicitly out of scope
//! (`spec.md` §1): "only their interfaces are specified". This module defines
//! the trait boundary a real HAL crate would implement, plus an in-repo mock
//! used by the default binary and by tests, mirroring the teacher's
//! mock-vs-real split for its wM-Bus handle factory.

use async_trait::async_trait;

use crate::counter::CounterUs;
use crate::error::ForwarderError;

/// Modulation-specific fields carried on an uplink packet.
#[derive(Debug, Clone)]
pub enum Modulation {
    LoRa { spreading_factor: u8, bandwidth_hz: u32, coderate: &'static str },
    Fsk { bitrate: u32 },
}

/// CRC outcome reported by the concentrator for a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Ok,
    Bad,
    None,
}

/// One packet received from the radio.
#[derive(Debug, Clone)]
pub struct RxPacket {
    pub count_us: CounterUs,
    pub chan: u8,
    pub rf_chain: u8,
    pub freq_hz: u32,
    pub modulation: Modulation,
    pub crc: CrcStatus,
    pub rssi_signal: f32,
    pub rssi_chan: f32,
    pub snr: f32,
    pub freq_offset_hz: i32,
    pub fine_timestamp: Option<u32>,
    pub payload: Vec<u8>,
}

/// Status of an in-flight or completed transmission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    Scheduled,
    Emitting,
}

/// Status of an in-flight spectral scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Completed,
    Aborted,
}

/// The boundary the out-of-scope HAL crate would implement: hands received
/// packets upward, accepts TX descriptors, reports live counter/status, and
/// drives the optional background spectral scanner.
#[async_trait]
pub trait ConcentratorHal: Send + Sync {
    /// Drain up to `max` received packets without blocking past one poll.
    async fn receive(&self, max: usize) -> Result<Vec<RxPacket>, ForwarderError>;

    /// Live free-running microsecond counter.
    async fn trigger_count(&self) -> Result<CounterUs, ForwarderError>;

    /// Current TX status for the given RF chain.
    async fn tx_status(&self, chain: usize) -> Result<TxStatus, ForwarderError>;

    /// Hand a fully-resolved descriptor to the radio for transmission.
    async fn send(&self, chain: usize, freq_hz: u32, power_dbm: i8, payload: &[u8]) -> Result<(), ForwarderError>;

    /// Concentrator board temperature in degrees Celsius, for status reports.
    async fn temperature(&self) -> Result<f32, ForwarderError>;

    /// Start a spectral scan step at `freq_hz` over `nb_scan` samples.
    async fn scan_start(&self, freq_hz: u32, nb_scan: u32) -> Result<(), ForwarderError>;

    /// Poll the in-flight scan.
    async fn scan_status(&self) -> Result<ScanStatus, ForwarderError>;

    /// Read back levels from a completed scan.
    async fn scan_result(&self) -> Result<Vec<i16>, ForwarderError>;

    /// Abort an in-flight scan (called when a TX becomes due).
    async fn scan_abort(&self) -> Result<(), ForwarderError>;
}

/// A software-only concentrator used when no real HAL crate is linked in —
/// exercised by the integration tests and usable as a smoke-test backend.
pub struct MockConcentrator {
    counter: std::sync::atomic::AtomicU32,
    pending_rx: tokio::sync::Mutex<Vec<RxPacket>>,
}

impl Default for MockConcentrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConcentrator {
    pub fn new() -> Self {
        MockConcentrator {
            counter: std::sync::atomic::AtomicU32::new(0),
            pending_rx: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Test/demo hook: inject a packet as if the radio had just received it.
    pub async fn push_rx(&self, pkt: RxPacket) {
        self.pending_rx.lock().await.push(pkt);
    }

    /// Test/demo hook: advance the free-running counter.
    pub fn advance_us(&self, delta: u32) {
        self.counter.fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl ConcentratorHal for MockConcentrator {
    async fn receive(&self, max: usize) -> Result<Vec<RxPacket>, ForwarderError> {
        let mut pending = self.pending_rx.lock().await;
        let n = pending.len().min(max);
        Ok(pending.drain(..n).collect())
    }

    async fn trigger_count(&self) -> Result<CounterUs, ForwarderError> {
        Ok(CounterUs(self.counter.load(std::sync::atomic::Ordering::SeqCst)))
    }

    async fn tx_status(&self, _chain: usize) -> Result<TxStatus, ForwarderError> {
        Ok(TxStatus::Idle)
    }

    async fn send(&self, _chain: usize, _freq_hz: u32, _power_dbm: i8, _payload: &[u8]) -> Result<(), ForwarderError> {
        Ok(())
    }

    async fn temperature(&self) -> Result<f32, ForwarderError> {
        Ok(25.0)
    }

    async fn scan_start(&self, _freq_hz: u32, _nb_scan: u32) -> Result<(), ForwarderError> {
        Ok(())
    }

    async fn scan_status(&self) -> Result<ScanStatus, ForwarderError> {
        Ok(ScanStatus::Completed)
    }

    async fn scan_result(&self) -> Result<Vec<i16>, ForwarderError> {
        Ok(vec![])
    }

    async fn scan_abort(&self) -> Result<(), ForwarderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_reports_idle_and_advances_counter() {
        let hal = MockConcentrator::new();
        assert_eq!(hal.trigger_count().await.unwrap(), CounterUs(0));
        hal.advance_us(1000);
        assert_eq!(hal.trigger_count().await.unwrap(), CounterUs(1000));
        assert_eq!(hal.tx_status(0).await.unwrap(), TxStatus::Idle);
    }

    #[tokio::test]
    async fn mock_drains_pushed_packets() {
        let hal = MockConcentrator::new();
        hal.push_rx(RxPacket {
            count_us: CounterUs(0),
            chan: 0,
            rf_chain: 0,
            freq_hz: 868_100_000,
            modulation: Modulation::LoRa { spreading_factor: 7, bandwidth_hz: 125_000, coderate: "4/5" },
            crc: CrcStatus::Ok,
            rssi_signal: -80.0,
            rssi_chan: -90.0,
            snr: 7.5,
            freq_offset_hz: 0,
            fine_timestamp: None,
            payload: vec![1, 2, 3],
        })
        .await;
        let pkts = hal.receive(10).await.unwrap();
        assert_eq!(pkts.len(), 1);
        assert!(hal.receive(10).await.unwrap().is_empty());
    }
}
