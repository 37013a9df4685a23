//! C9 — Spectral Scan Task.
//!
//! Opportunistic RSSI sweep across a configured band whenever no TX chain is
//! busy (`spec.md` §4.8). Runs at the lowest priority of the tasks touching
//! the radio: every step first checks that nothing is scheduled or emitting,
//! and backs off for one pace interval if so.

use std::sync::Arc;

use crate::concentrator::{ConcentratorHal, ScanStatus, TxStatus};
use crate::constants::{SCAN_POLL_INTERVAL, SCAN_STEP_HZ, SCAN_TIMEOUT};
use crate::error::ForwarderError;
use crate::signal::Shutdown;

pub struct SpectralScanConf {
    pub freq_hz_start: u32,
    pub nb_chan: u8,
    pub nb_scan: u32,
    pub pace: std::time::Duration,
}

pub struct SpectralScanTask {
    conf: SpectralScanConf,
    concentrator: Arc<dyn ConcentratorHal>,
    num_chains: usize,
    next_freq_hz: std::sync::atomic::AtomicU32,
}

impl SpectralScanTask {
    pub fn new(conf: SpectralScanConf, concentrator: Arc<dyn ConcentratorHal>, num_chains: usize) -> Self {
        let start = conf.freq_hz_start;
        SpectralScanTask {
            conf,
            concentrator,
            num_chains,
            next_freq_hz: std::sync::atomic::AtomicU32::new(start),
        }
    }

    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ForwarderError> {
        while !shutdown.should_stop() {
            if self.any_chain_busy().await? {
                tokio::time::sleep(self.conf.pace).await;
                continue;
            }
            self.scan_step().await?;
            tokio::time::sleep(self.conf.pace).await;
        }
        Ok(())
    }

    async fn any_chain_busy(&self) -> Result<bool, ForwarderError> {
        for chain in 0..self.num_chains {
            if matches!(self.concentrator.tx_status(chain).await?, TxStatus::Scheduled | TxStatus::Emitting) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Start one step, poll to completion or timeout, and advance the
    /// frequency cursor with wraparound regardless of outcome.
    async fn scan_step(&self) -> Result<(), ForwarderError> {
        let freq_hz = self.next_freq_hz.load(std::sync::atomic::Ordering::SeqCst);
        self.advance_freq(freq_hz);

        self.concentrator.scan_start(freq_hz, self.conf.nb_scan).await?;

        let deadline = tokio::time::Instant::now() + SCAN_TIMEOUT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                self.concentrator.scan_abort().await?;
                return Ok(());
            }
            match self.concentrator.scan_status().await? {
                ScanStatus::Completed => {
                    let _levels = self.concentrator.scan_result().await?;
                    return Ok(());
                }
                ScanStatus::Aborted => return Ok(()),
                ScanStatus::Running => tokio::time::sleep(SCAN_POLL_INTERVAL).await,
            }
        }
    }

    fn advance_freq(&self, current: u32) {
        let span = self.conf.nb_chan as u32 * SCAN_STEP_HZ;
        let next = if span == 0 {
            self.conf.freq_hz_start
        } else {
            let offset = (current - self.conf.freq_hz_start + SCAN_STEP_HZ) % span;
            self.conf.freq_hz_start + offset
        };
        self.next_freq_hz.store(next, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concentrator::MockConcentrator;

    fn task(nb_chan: u8) -> SpectralScanTask {
        let conf = SpectralScanConf {
            freq_hz_start: 863_000_000,
            nb_chan,
            nb_scan: 10,
            pace: std::time::Duration::from_millis(1),
        };
        SpectralScanTask::new(conf, Arc::new(MockConcentrator::new()), 1)
    }

    #[tokio::test]
    async fn step_completes_and_advances_frequency() {
        let t = task(3);
        t.scan_step().await.unwrap();
        assert_eq!(t.next_freq_hz.load(std::sync::atomic::Ordering::SeqCst), 863_200_000);
    }

    #[tokio::test]
    async fn frequency_wraps_at_band_edge() {
        let t = task(2);
        t.next_freq_hz.store(863_200_000, std::sync::atomic::Ordering::SeqCst);
        t.scan_step().await.unwrap();
        assert_eq!(t.next_freq_hz.load(std::sync::atomic::Ordering::SeqCst), 863_000_000);
    }

    #[tokio::test]
    async fn busy_chain_is_detected() {
        let hal = Arc::new(MockConcentrator::new());
        let conf = SpectralScanConf {
            freq_hz_start: 863_000_000,
            nb_chan: 1,
            nb_scan: 1,
            pace: std::time::Duration::from_millis(1),
        };
        let t = SpectralScanTask::new(conf, hal.clone(), 1);
        assert!(!t.any_chain_busy().await.unwrap());
    }
}
