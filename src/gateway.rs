//! Process wiring: load configuration, build shared state, spawn C4–C9, and
//! drain them under a shared [`Shutdown`] (`spec.md` §6).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};

use crate::beacon::{BeaconParams, BeaconScheduler};
use crate::concentrator::ConcentratorHal;
use crate::config::{self, ForwarderConfig};
use crate::dispatcher::JitDispatcher;
use crate::downstream::{Chain, DownstreamReceiver};
use crate::error::ForwarderError;
use crate::gps::run_fake_gps;
use crate::instrumentation::{compose_report, DownstreamStats, Position, StatusMailbox, UpstreamStats};
use crate::jit::JitQueue;
use crate::signal::Shutdown;
use crate::spectral_scan::{SpectralScanConf, SpectralScanTask};
use crate::time_ref::TimeReference;
use crate::upstream::{CrcForwardPolicy, UpstreamForwarder};
use crate::xtal::{run_validator, XtalTracker};

/// Everything a running gateway process needs, built once from config and
/// handed to each task as an `Arc`.
pub struct GatewayState {
    pub config: ForwarderConfig,
    pub gateway_id: [u8; 8],
    pub chains: Vec<Arc<Chain>>,
    pub concentrator: Arc<dyn ConcentratorHal>,
    pub time_ref: Arc<TimeReference>,
    pub xtal: Arc<XtalTracker>,
    pub position: Arc<crate::gps::PositionStore>,
    pub upstream_stats: Arc<UpstreamStats>,
    pub downstream_stats: Arc<DownstreamStats>,
    pub mailbox: Arc<StatusMailbox>,
    pub shutdown: Arc<Shutdown>,
}

impl GatewayState {
    pub fn new(config: ForwarderConfig, concentrator: Arc<dyn ConcentratorHal>) -> Result<Self, ForwarderError> {
        let gateway_id = config::parse_gateway_id(&config.gateway.gateway_id)?;

        let chains: Vec<Arc<Chain>> = config
            .sx130x
            .radio
            .iter()
            .cloned()
            .map(|radio| {
                Arc::new(Chain {
                    jit: SyncMutex::new(JitQueue::new()),
                    radio,
                })
            })
            .collect();
        if chains.is_empty() {
            return Err(ForwarderError::Config("sx130x.radio must list at least one RF chain".into()));
        }

        let position = Arc::new(crate::gps::PositionStore::new(Position {
            lat: config.gateway.ref_latitude,
            lon: config.gateway.ref_longitude,
            alt_m: config.gateway.ref_altitude,
        }));

        Ok(GatewayState {
            gateway_id,
            chains,
            concentrator,
            time_ref: Arc::new(TimeReference::new()),
            xtal: Arc::new(XtalTracker::new()),
            position,
            upstream_stats: Arc::new(UpstreamStats::new()),
            downstream_stats: Arc::new(DownstreamStats::new()),
            mailbox: Arc::new(StatusMailbox::new()),
            shutdown: Arc::new(Shutdown::new()),
            config,
        })
    }

    fn beacon_params(&self) -> BeaconParams {
        let g = &self.config.gateway;
        BeaconParams {
            period_s: g.beacon_period,
            freq_hz: g.beacon_freq_hz,
            freq_nb: g.beacon_freq_nb,
            freq_step_hz: g.beacon_freq_step,
            datarate: g.beacon_datarate,
            bw_hz: g.beacon_bw_hz,
            power_dbm: g.beacon_power,
            infodesc: g.beacon_infodesc,
            ref_lat: g.ref_latitude,
            ref_lon: g.ref_longitude,
        }
    }

    fn crc_policy(&self) -> CrcForwardPolicy {
        CrcForwardPolicy {
            valid: self.config.gateway.forward_crc_valid,
            error: self.config.gateway.forward_crc_error,
            disabled: self.config.gateway.forward_crc_disabled,
        }
    }
}

/// Bind the upstream and downstream UDP sockets to the configured server
/// address/ports (§6).
async fn bind_sockets(gateway: &config::GatewayConf) -> Result<(Arc<UdpSocket>, Arc<UdpSocket>), ForwarderError> {
    let up_remote: SocketAddr = format!("{}:{}", gateway.server_address, gateway.serv_port_up)
        .parse()
        .map_err(|e| ForwarderError::Config(format!("bad server_address/serv_port_up: {e}")))?;
    let down_remote: SocketAddr = format!("{}:{}", gateway.server_address, gateway.serv_port_down)
        .parse()
        .map_err(|e| ForwarderError::Config(format!("bad server_address/serv_port_down: {e}")))?;

    let up_socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| ForwarderError::Network(e.to_string()))?;
    up_socket.connect(up_remote).await.map_err(|e| ForwarderError::Network(e.to_string()))?;

    let down_socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| ForwarderError::Network(e.to_string()))?;
    down_socket.connect(down_remote).await.map_err(|e| ForwarderError::Network(e.to_string()))?;

    Ok((Arc::new(up_socket), Arc::new(down_socket)))
}

/// Forward `SIGINT`/`SIGTERM` to a graceful shutdown request, `SIGQUIT` to an
/// immediate one.
fn spawn_signal_handlers(shutdown: Arc<Shutdown>) -> Result<(), ForwarderError> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| ForwarderError::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| ForwarderError::Fatal(e.to_string()))?;
    let mut sigquit = signal(SignalKind::quit()).map_err(|e| ForwarderError::Fatal(e.to_string()))?;

    let graceful = shutdown.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        graceful.request_graceful();
    });
    let graceful = shutdown.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        graceful.request_graceful();
    });
    tokio::spawn(async move {
        sigquit.recv().await;
        shutdown.request_immediate();
    });
    Ok(())
}

/// Periodic status composer (C10's scheduling half): every `stat_interval`,
/// snapshot both counter groups and publish into the upstream mailbox.
async fn run_stat_reporter(state: Arc<GatewayState>) -> Result<(), ForwarderError> {
    let interval = Duration::from_secs(state.config.gateway.stat_interval.max(1));
    while !state.shutdown.should_stop() {
        tokio::time::sleep(interval).await;
        let temperature_c = state.concentrator.temperature().await.unwrap_or(0.0);
        let now_utc = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
        let report = compose_report(&state.upstream_stats, &state.downstream_stats, state.position.get(), temperature_c, &now_utc);
        state.mailbox.publish(report);
    }
    Ok(())
}

/// Construct and run every task (C4–C10) until shutdown, propagating the
/// first task error encountered.
pub async fn run(config_path: &std::path::Path, concentrator: Arc<dyn ConcentratorHal>) -> Result<(), ForwarderError> {
    let config = config::load(config_path)?;
    let state = Arc::new(GatewayState::new(config, concentrator)?);

    let (up_socket, down_socket) = bind_sockets(&state.config.gateway).await?;
    spawn_signal_handlers(state.shutdown.clone())?;

    let upstream = UpstreamForwarder::new(
        up_socket,
        state.gateway_id,
        state.concentrator.clone(),
        state.time_ref.clone(),
        state.upstream_stats.clone(),
        state.mailbox.clone(),
        state.crc_policy(),
        Duration::from_millis(state.config.gateway.push_timeout_ms),
        state.config.debug.ref_payload.clone(),
    );

    let downstream = DownstreamReceiver::new(
        down_socket,
        state.gateway_id,
        state.chains.clone(),
        state.concentrator.clone(),
        state.time_ref.clone(),
        state.xtal.clone(),
        BeaconScheduler::new(state.beacon_params()),
        state.downstream_stats.clone(),
        Duration::from_secs(state.config.gateway.keepalive_interval),
        state.config.gateway.autoquit_threshold,
    );

    let dispatcher = JitDispatcher::new(state.chains.clone(), state.concentrator.clone(), state.xtal.clone(), state.downstream_stats.clone());

    let scan_conf = state.config.sx130x.sx1261_conf.as_ref().filter(|s| s.spectral_scan.enable).map(|s| &s.spectral_scan);
    let scan_task = scan_conf.map(|sc| {
        SpectralScanTask::new(
            SpectralScanConf {
                freq_hz_start: sc.freq_hz_start,
                nb_chan: sc.nb_chan,
                nb_scan: sc.nb_scan,
                pace: Duration::from_secs(sc.pace_s.max(1) as u64),
            },
            state.concentrator.clone(),
            state.chains.len(),
        )
    });

    let upstream_shutdown = state.shutdown.clone();
    let downstream_shutdown = state.shutdown.clone();
    let dispatcher_shutdown = state.shutdown.clone();
    let validator_shutdown = state.shutdown.clone();

    let upstream_handle = tokio::spawn(async move { upstream.run(&upstream_shutdown).await });
    let downstream_handle = tokio::spawn(async move { downstream.run(&downstream_shutdown).await });
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(&dispatcher_shutdown).await });
    let reporter_handle = tokio::spawn(run_stat_reporter(state.clone()));
    let validator_handle = {
        let time_ref = state.time_ref.clone();
        let xtal = state.xtal.clone();
        tokio::spawn(async move { run_validator(time_ref, xtal, &validator_shutdown).await })
    };
    let scan_handle = scan_task.map(|task| {
        let scan_shutdown = state.shutdown.clone();
        tokio::spawn(async move { task.run(&scan_shutdown).await })
    });

    let gps_handle = if let Some(tty_path) = &state.config.gateway.gps_tty_path {
        log::warn!("gps_tty_path {tty_path:?} configured but no GpsParser backend is linked in; GPS reader not started");
        None
    } else if state.config.gateway.fake_gps {
        let concentrator = state.concentrator.clone();
        let time_ref = state.time_ref.clone();
        let xtal = state.xtal.clone();
        let gps_shutdown = state.shutdown.clone();
        Some(tokio::spawn(async move { run_fake_gps(concentrator, time_ref, xtal, &gps_shutdown).await }))
    } else {
        None
    };

    let results = tokio::join!(upstream_handle, downstream_handle, dispatcher_handle, reporter_handle, validator_handle);
    results.0.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    results.1.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    results.2.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    results.3.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    results.4.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    if let Some(h) = scan_handle {
        h.await.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    }
    if let Some(h) = gps_handle {
        h.await.map_err(|e| ForwarderError::Fatal(e.to_string()))??;
    }
    Ok(())
}
