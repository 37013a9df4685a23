//! C6 — JIT Dispatcher.
//!
//! Every `JIT_POLL_INTERVAL`, pops each chain's ready entry and hands it to
//! the radio (`spec.md` §4.5).

use std::sync::{Arc, Mutex as SyncMutex};

use crate::concentrator::{ConcentratorHal, TxStatus};
use crate::constants::JIT_POLL_INTERVAL;
use crate::downstream::Chain;
use crate::error::ForwarderError;
use crate::instrumentation::DownstreamStats;
use crate::signal::Shutdown;
use crate::util::ThrottleManager;
use crate::xtal::XtalTracker;

/// Caps how often a repeated TX failure on the same chain reaches the log.
const TX_FAILURE_THROTTLE_WINDOW_MS: u64 = 10_000;
const TX_FAILURE_THROTTLE_CAP: u32 = 1;

pub struct JitDispatcher {
    chains: Vec<Arc<Chain>>,
    concentrator: Arc<dyn ConcentratorHal>,
    xtal: Arc<XtalTracker>,
    stats: Arc<DownstreamStats>,
    throttle: SyncMutex<ThrottleManager>,
}

impl JitDispatcher {
    pub fn new(chains: Vec<Arc<Chain>>, concentrator: Arc<dyn ConcentratorHal>, xtal: Arc<XtalTracker>, stats: Arc<DownstreamStats>) -> Self {
        JitDispatcher { chains, concentrator, xtal, stats, throttle: SyncMutex::new(ThrottleManager::new()) }
    }

    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ForwarderError> {
        while !shutdown.should_stop() {
            for (chain_idx, chain) in self.chains.iter().enumerate() {
                self.dispatch_chain(chain_idx, chain).await?;
            }
            tokio::time::sleep(JIT_POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn dispatch_chain(&self, chain_idx: usize, chain: &Arc<Chain>) -> Result<(), ForwarderError> {
        let now = self.concentrator.trigger_count().await?;

        let descriptor = {
            let mut jit = chain.jit.lock().expect("jit queue lock poisoned");
            match jit.peek(now) {
                Some(idx) => Some(jit.dequeue(idx)),
                None => None,
            }
        };
        let Some(mut descriptor) = descriptor else { return Ok(()) };

        if descriptor.packet_class.is_beacon() {
            descriptor.freq_hz = (descriptor.freq_hz as f64 * self.xtal.correction()).round() as u32;
        }

        match self.concentrator.tx_status(chain_idx).await? {
            TxStatus::Emitting => return Ok(()),
            TxStatus::Scheduled | TxStatus::Idle => {}
        }

        if matches!(self.concentrator.scan_status().await, Ok(crate::concentrator::ScanStatus::Running)) {
            self.concentrator.scan_abort().await?;
        }

        let is_beacon = descriptor.packet_class.is_beacon();
        match self.concentrator.send(chain_idx, descriptor.freq_hz, descriptor.power_dbm, &descriptor.payload).await {
            Ok(()) => self.stats.record_tx_emitted(is_beacon),
            Err(e) => {
                self.stats.record_tx_failed();
                let category = format!("tx_failed_chain_{chain_idx}");
                let mut throttle = self.throttle.lock().expect("dispatcher throttle lock poisoned");
                if throttle.allow(&category, TX_FAILURE_THROTTLE_WINDOW_MS, TX_FAILURE_THROTTLE_CAP) {
                    log::warn!("chain {chain_idx} TX failed: {e}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as SyncMutex;

    use super::*;
    use crate::concentrator::MockConcentrator;
    use crate::config::{RadioConf, RadioType, RssiTcomp};
    use crate::counter::CounterUs;
    use crate::jit::{JitQueue, PacketClass, TxDescriptor};

    fn test_chain(jit: JitQueue) -> Arc<Chain> {
        Arc::new(Chain {
            jit: SyncMutex::new(jit),
            radio: RadioConf {
                enable: true,
                freq: 867_500_000,
                rssi_offset: 0.0,
                rssi_tcomp: RssiTcomp::default(),
                radio_type: RadioType::Sx1250,
                single_input_mode: false,
                tx_enable: true,
                tx_freq_min: 863_000_000,
                tx_freq_max: 870_000_000,
                tx_gain_lut: vec![],
            },
        })
    }

    #[tokio::test]
    async fn dispatches_ready_entry_and_counts_success() {
        let hal = Arc::new(MockConcentrator::new());
        let mut queue = JitQueue::new();
        queue
            .enqueue(
                CounterUs(0),
                TxDescriptor {
                    count_us: CounterUs(2000),
                    pre_delay_us: 1500,
                    post_delay_us: 50_000,
                    packet_class: PacketClass::ClassA,
                    freq_hz: 868_100_000,
                    power_dbm: 14,
                    payload: vec![1, 2, 3],
                },
                0,
            )
            .unwrap();
        let chain = test_chain(queue);
        hal.advance_us(1000); // now within the 1500us pre-delay arming window of 2000

        let stats = Arc::new(DownstreamStats::new());
        let dispatcher = JitDispatcher::new(vec![chain.clone()], hal, Arc::new(XtalTracker::new()), stats.clone());
        dispatcher.dispatch_chain(0, &chain).await.unwrap();

        assert_eq!(stats.snapshot().tx_emitted, 1);
        assert!(chain.jit.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn beacon_frequency_scaled_by_xtal_correction() {
        let hal = Arc::new(MockConcentrator::new());
        let mut queue = JitQueue::new();
        queue
            .enqueue(
                CounterUs(0),
                TxDescriptor {
                    count_us: CounterUs(1000),
                    pre_delay_us: 0,
                    post_delay_us: 2_000_000,
                    packet_class: PacketClass::Beacon,
                    freq_hz: 869_525_000,
                    power_dbm: 14,
                    payload: vec![0u8; 17],
                },
                128_000_000,
            )
            .unwrap();
        let chain = test_chain(queue);
        let xtal = Arc::new(XtalTracker::new());
        for _ in 0..16 {
            xtal.tick(Some(1.0 + 1e-4));
        }
        assert!(xtal.is_locked());

        let stats = Arc::new(DownstreamStats::new());
        let dispatcher = JitDispatcher::new(vec![chain.clone()], hal, xtal, stats.clone());
        dispatcher.dispatch_chain(0, &chain).await.unwrap();

        assert_eq!(stats.snapshot().beacons_sent, 1);
    }

    #[tokio::test]
    async fn nothing_ready_is_a_no_op() {
        let hal = Arc::new(MockConcentrator::new());
        let chain = test_chain(JitQueue::new());
        let stats = Arc::new(DownstreamStats::new());
        let dispatcher = JitDispatcher::new(vec![chain.clone()], hal, Arc::new(XtalTracker::new()), stats.clone());
        dispatcher.dispatch_chain(0, &chain).await.unwrap();
        assert_eq!(stats.snapshot().tx_emitted, 0);
    }

    /// Always fails `send`, to exercise the failure/throttle path.
    struct FailingConcentrator(MockConcentrator);

    #[async_trait::async_trait]
    impl ConcentratorHal for FailingConcentrator {
        async fn receive(&self, max: usize) -> Result<Vec<crate::concentrator::RxPacket>, ForwarderError> {
            self.0.receive(max).await
        }
        async fn trigger_count(&self) -> Result<CounterUs, ForwarderError> {
            self.0.trigger_count().await
        }
        async fn tx_status(&self, chain: usize) -> Result<TxStatus, ForwarderError> {
            self.0.tx_status(chain).await
        }
        async fn send(&self, _chain: usize, _freq_hz: u32, _power_dbm: i8, _payload: &[u8]) -> Result<(), ForwarderError> {
            Err(ForwarderError::Concentrator("radio busy".into()))
        }
        async fn temperature(&self) -> Result<f32, ForwarderError> {
            self.0.temperature().await
        }
        async fn scan_start(&self, freq_hz: u32, nb_scan: u32) -> Result<(), ForwarderError> {
            self.0.scan_start(freq_hz, nb_scan).await
        }
        async fn scan_status(&self) -> Result<crate::concentrator::ScanStatus, ForwarderError> {
            self.0.scan_status().await
        }
        async fn scan_result(&self) -> Result<Vec<i16>, ForwarderError> {
            self.0.scan_result().await
        }
        async fn scan_abort(&self) -> Result<(), ForwarderError> {
            self.0.scan_abort().await
        }
    }

    #[tokio::test]
    async fn repeated_send_failures_are_counted_but_throttled() {
        let hal = Arc::new(FailingConcentrator(MockConcentrator::new()));
        let mut queue = JitQueue::new();
        queue
            .enqueue(
                CounterUs(0),
                TxDescriptor {
                    count_us: CounterUs(2000),
                    pre_delay_us: 1500,
                    post_delay_us: 50_000,
                    packet_class: PacketClass::ClassA,
                    freq_hz: 868_100_000,
                    power_dbm: 14,
                    payload: vec![1],
                },
                0,
            )
            .unwrap();
        let chain = test_chain(queue);
        hal.0.advance_us(1000);

        let stats = Arc::new(DownstreamStats::new());
        let dispatcher = JitDispatcher::new(vec![chain.clone()], hal, Arc::new(XtalTracker::new()), stats.clone());
        dispatcher.dispatch_chain(0, &chain).await.unwrap();

        assert_eq!(stats.snapshot().tx_failed, 1);
        assert_eq!(dispatcher.throttle.lock().unwrap().allow("tx_failed_chain_0", TX_FAILURE_THROTTLE_WINDOW_MS, TX_FAILURE_THROTTLE_CAP), false);
    }
}
