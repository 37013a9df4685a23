//! Packet forwarder constants.
//!
//! Numeric values are carried over from the reference gateway implementation
//! this crate's wire protocol and scheduling rules are modeled on.

use std::time::Duration;

/// Default config file names, read in order (global, then local overlay).
pub const JSON_CONF_DEFAULT: &str = "global_conf.json";
pub const JSON_CONF_LOCAL: &str = "local_conf.json";

/// Semtech UDP gateway protocol version byte.
pub const PROTOCOL_VERSION: u8 = 2;

/// Max number of radio packets drained from the concentrator per upstream cycle.
pub const NB_PKT_MAX: usize = 255;

/// Sleep duration when a fetch cycle returns no packets and no report is pending.
pub const FETCH_SLEEP: Duration = Duration::from_millis(10);

/// Default PUSH_DATA ACK timeout.
pub const PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Default PULL_DATA ACK / keepalive timeout.
pub const PULL_TIMEOUT: Duration = Duration::from_millis(200);

/// Read granularity inside the downstream keepalive window: bounds how
/// often the loop re-checks the keepalive deadline and shutdown signal.
pub const DOWNSTREAM_POLL: Duration = Duration::from_millis(200);

/// Default downstream keepalive interval (seconds).
pub const DEFAULT_KEEPALIVE_S: u64 = 5;

/// Default status reporting interval (seconds).
pub const DEFAULT_STAT_S: u64 = 30;

/// Maximum admitted age of the GPS time reference before it is considered stale.
pub const GPS_REF_MAX_AGE: Duration = Duration::from_secs(30);

/// Number of per-PPS samples the XTAL correction is averaged over initially.
pub const XERR_INIT_AVG: u32 = 16;

/// Low-pass filter coefficient for ongoing XTAL error tracking.
pub const XERR_FILT_COEF: f64 = 256.0;

/// Minimum LoRa preamble length accepted from the server for a downlink.
pub const MIN_LORA_PREAMBLE: u16 = 6;
pub const STD_LORA_PREAMBLE: u16 = 8;
pub const MIN_FSK_PREAMBLE: u16 = 3;
pub const STD_FSK_PREAMBLE: u16 = 5;

/// Beacon preamble length, fixed by the LoRaWAN beacon specification.
pub const BEACON_PREAMBLE: u16 = 10;

/// Seconds between 1970-01-01 (Unix epoch) and 1980-01-06 (GPS epoch).
pub const UNIX_GPS_EPOCH_OFFSET: i64 = 315_964_800;

/// Maximum number of downlink/beacon entries held in one JIT queue.
pub const JIT_QUEUE_MAX: usize = 8;

/// Maximum number of beacons allowed to coexist in the beacon chain's queue.
pub const JIT_NUM_BEACON_IN_QUEUE: usize = 8;

/// Radio arming lead time: a descriptor may not be enqueued closer than this
/// to the live counter.
pub const TX_START_DELAY: Duration = Duration::from_micros(1500);
pub const MIN_TX_LEAD_US: i64 = 1500;

/// Interval at which the JIT dispatcher polls the concentrator clock.
pub const JIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Interval at which the XTAL/validator loop runs.
pub const VALIDATOR_INTERVAL: Duration = Duration::from_secs(1);

/// Spectral scan completion poll interval and deadline.
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spectral scan step size.
pub const SCAN_STEP_HZ: u32 = 200_000;

/// GPS TTY read granularity: bounds how often the reader loop rechecks the
/// shutdown signal when no bytes arrive.
pub const GPS_READ_POLL: Duration = Duration::from_millis(200);

/// Period of the fake-GPS task's synthetic PPS tick when no real GPS TTY is
/// configured (`gateway_conf.fake_gps`).
pub const FAKE_GPS_TICK: Duration = Duration::from_secs(1);

/// Shortest possible framed GPS message (a bare NMEA checksum-free sentence
/// or a UBX ACK); a residual shorter than this can never complete alone.
pub const MIN_GPS_MSG_SIZE: usize = 6;

/// Rolling buffer ceiling before an unresyncable residual is discarded.
pub const MAX_GPS_RESIDUAL: usize = 4096;

/// Default beacon parameters (overridable via gateway_conf).
pub const DEFAULT_BEACON_FREQ_HZ: u32 = 869_525_000;
pub const DEFAULT_BEACON_FREQ_NB: u8 = 1;
pub const DEFAULT_BEACON_FREQ_STEP: u32 = 0;
pub const DEFAULT_BEACON_DATARATE: u8 = 9;
pub const DEFAULT_BEACON_BW_HZ: u32 = 125_000;
pub const DEFAULT_BEACON_POWER: i8 = 14;
pub const DEFAULT_BEACON_INFODESC: u8 = 0;

/// Earliest GPS date the OS-clock discipline routine is willing to trust
/// (2020-03-05T18:00:00Z), guarding against spurious pre-fix timestamps.
pub const OS_CLOCK_DISCIPLINE_EPOCH_UNIX: i64 = 1_583_431_200;

/// Minimum offset between GPS and system time that triggers a one-time
/// clock step.
pub const OS_CLOCK_DISCIPLINE_THRESHOLD_S: i64 = 10;

// `serde(default = "...")` needs a function path, not a const; these just
// surface the defaults above for config.rs's field-level fallbacks.
pub fn default_beacon_freq_hz() -> u32 {
    DEFAULT_BEACON_FREQ_HZ
}
pub fn default_beacon_freq_nb() -> u8 {
    DEFAULT_BEACON_FREQ_NB
}
pub fn default_beacon_datarate() -> u8 {
    DEFAULT_BEACON_DATARATE
}
pub fn default_beacon_bw_hz() -> u32 {
    DEFAULT_BEACON_BW_HZ
}
pub fn default_beacon_power() -> i8 {
    DEFAULT_BEACON_POWER
}
