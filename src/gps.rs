//! C8 — GPS Reader.
//!
//! Reads the GPS TTY into a single rolling buffer, frames UBX and NMEA
//! messages by sync byte, and feeds fixes into the time reference, XTAL
//! tracker, and OS-clock discipline (`spec.md` §4.6). Decoding the frames
//! themselves is out of scope (§1) — [`GpsParser`] is the trait boundary an
//! external UBX/NMEA crate would implement.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncReadExt;
use tokio_serial::SerialPortBuilderExt;

use crate::concentrator::ConcentratorHal;
use crate::constants::{FAKE_GPS_TICK, GPS_READ_POLL, MAX_GPS_RESIDUAL, MIN_GPS_MSG_SIZE};
use crate::counter::CounterUs;
use crate::error::ForwarderError;
use crate::instrumentation::Position;
use crate::signal::Shutdown;
use crate::time_ref::{TimeReference, TimeSpec};
use crate::xtal::{OsClockDiscipline, XtalTracker};

/// A fix decoded from one framed GPS message.
#[derive(Debug, Clone, Copy)]
pub enum GpsFix {
    /// `UBX_NAV_TIMEGPS`: GPS time-of-week plus fix validity.
    TimeGps { gps: TimeSpec, fix_ok: bool },
    /// `RMC`: position.
    Rmc { lat: f64, lon: f64 },
}

/// The out-of-scope UBX/NMEA decoder boundary: given a buffer starting at a
/// recognized sync byte, either return the parsed fix (if any) and the
/// number of bytes the frame consumed, or `None` if more bytes are needed.
pub trait GpsParser: Send + Sync {
    fn parse_ubx(&self, buf: &[u8]) -> Option<(Option<GpsFix>, usize)>;
    fn parse_nmea(&self, buf: &[u8]) -> Option<(Option<GpsFix>, usize)>;
}

/// Last-fix-wins store for the gateway's current coordinates, read by C10's
/// status composer.
pub struct PositionStore {
    inner: RwLock<Position>,
}

impl PositionStore {
    pub fn new(initial: Position) -> Self {
        PositionStore { inner: RwLock::new(initial) }
    }

    pub fn get(&self) -> Position {
        *self.inner.read().expect("position store lock poisoned")
    }

    fn set_lat_lon(&self, lat: f64, lon: f64) {
        let mut guard = self.inner.write().expect("position store lock poisoned");
        guard.lat = lat;
        guard.lon = lon;
    }
}

struct PpsSample {
    counter: CounterUs,
    gps: TimeSpec,
}

/// Frame-and-dispatch logic, split out from the TTY plumbing so it can be
/// exercised without a real serial port.
struct GpsFixHandler {
    parser: Arc<dyn GpsParser>,
    concentrator: Arc<dyn ConcentratorHal>,
    time_ref: Arc<TimeReference>,
    xtal: Arc<XtalTracker>,
    os_clock: OsClockDiscipline,
    position: Arc<PositionStore>,
    last_pps: Option<PpsSample>,
}

impl GpsFixHandler {
    /// Drain every complete frame from the front of `buf`, resyncing past
    /// unrecognized bytes one at a time, and discarding an over-long
    /// unresyncable residual.
    async fn process_buffer(&mut self, buf: &mut Vec<u8>) {
        loop {
            if buf.len() < MIN_GPS_MSG_SIZE {
                break;
            }
            let Some(&sync) = buf.first() else { break };
            let outcome = match sync {
                0xB5 => self.parser.parse_ubx(buf),
                b'$' => self.parser.parse_nmea(buf),
                _ => {
                    buf.remove(0);
                    continue;
                }
            };
            match outcome {
                Some((fix, consumed)) => {
                    if let Some(fix) = fix {
                        self.handle_fix(fix).await;
                    }
                    buf.drain(0..consumed.max(1));
                }
                None => break,
            }
        }
        if buf.len() > MAX_GPS_RESIDUAL {
            buf.clear();
        }
    }

    async fn handle_fix(&mut self, fix: GpsFix) {
        match fix {
            GpsFix::TimeGps { gps, fix_ok } if fix_ok => self.handle_time_fix(gps).await,
            GpsFix::TimeGps { .. } => {}
            GpsFix::Rmc { lat, lon } => self.position.set_lat_lon(lat, lon),
        }
    }

    async fn handle_time_fix(&mut self, gps: TimeSpec) {
        let Ok(counter_now) = self.concentrator.trigger_count().await else { return };

        if let Some(prev) = &self.last_pps {
            let gps_delta_s = (gps.sec - prev.gps.sec) as f64 + (gps.nsec as f64 - prev.gps.nsec as f64) * 1e-9;
            if gps_delta_s > 0.0 {
                let counter_delta_us = counter_now.distance(prev.counter) as f64;
                self.xtal.tick(Some(counter_delta_us / (gps_delta_s * 1e6)));
            }
        }
        self.last_pps = Some(PpsSample { counter: counter_now, gps });

        let utc = TimeSpec::gps_to_utc(gps);
        self.time_ref.update(counter_now, utc, gps, self.xtal.correction());

        let system_now = TimeSpec::from_secs_f64(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
        self.os_clock.maybe_discipline(utc, system_now.sec, |stepped_to| {
            log::warn!("GPS time discipline would step system clock to {}", stepped_to.sec);
        });
    }
}

pub struct GpsReader {
    port: tokio_serial::SerialStream,
    handler: GpsFixHandler,
}

impl GpsReader {
    pub fn open(
        tty_path: &str,
        baud_rate: u32,
        parser: Arc<dyn GpsParser>,
        concentrator: Arc<dyn ConcentratorHal>,
        time_ref: Arc<TimeReference>,
        xtal: Arc<XtalTracker>,
        position: Arc<PositionStore>,
    ) -> Result<Self, ForwarderError> {
        let port = tokio_serial::new(tty_path, baud_rate)
            .open_native_async()
            .map_err(|e| ForwarderError::SerialPort(e.to_string()))?;
        Ok(GpsReader {
            port,
            handler: GpsFixHandler {
                parser,
                concentrator,
                time_ref,
                xtal,
                os_clock: OsClockDiscipline::new(),
                position,
                last_pps: None,
            },
        })
    }

    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<(), ForwarderError> {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 256];
        while !shutdown.should_stop() {
            let read = tokio::time::timeout(GPS_READ_POLL, self.port.read(&mut chunk)).await;
            match read {
                Ok(Ok(0)) => continue,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(ForwarderError::SerialPort(e.to_string())),
                Err(_) => continue,
            }
            self.handler.process_buffer(&mut buf).await;
        }
        Ok(())
    }
}

/// `gateway_conf.fake_gps`: when no GPS TTY is available, synthesize a PPS
/// tick once per [`FAKE_GPS_TICK`] from the system clock instead, so C1/C2
/// still populate and C7 keeps emitting beacons under the mock HAL
/// (`spec.md` §4.9). Reference position is seeded from config at startup
/// and left untouched here.
pub async fn run_fake_gps(
    concentrator: Arc<dyn ConcentratorHal>,
    time_ref: Arc<TimeReference>,
    xtal: Arc<XtalTracker>,
    shutdown: &Shutdown,
) -> Result<(), ForwarderError> {
    let mut last_pps: Option<PpsSample> = None;
    while !shutdown.should_stop() {
        tokio::time::sleep(FAKE_GPS_TICK).await;
        fake_gps_tick(&*concentrator, &time_ref, &xtal, &mut last_pps).await;
    }
    Ok(())
}

/// One synthetic PPS tick, split out from [`run_fake_gps`] so it's testable
/// without waiting on real `FAKE_GPS_TICK` sleeps.
async fn fake_gps_tick(concentrator: &dyn ConcentratorHal, time_ref: &TimeReference, xtal: &XtalTracker, last_pps: &mut Option<PpsSample>) {
    let Ok(counter_now) = concentrator.trigger_count().await else { return };

    let utc = TimeSpec::from_secs_f64(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
    );
    let gps = TimeSpec::utc_to_gps(utc);

    if let Some(prev) = &*last_pps {
        let gps_delta_s = (gps.sec - prev.gps.sec) as f64 + (gps.nsec as f64 - prev.gps.nsec as f64) * 1e-9;
        if gps_delta_s > 0.0 {
            let counter_delta_us = counter_now.distance(prev.counter) as f64;
            xtal.tick(Some(counter_delta_us / (gps_delta_s * 1e6)));
        }
    }
    *last_pps = Some(PpsSample { counter: counter_now, gps });

    time_ref.update(counter_now, utc, gps, xtal.correction());
}
