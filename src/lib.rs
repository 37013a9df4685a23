//! # lora-pkt-fwd — a LoRaWAN packet forwarder
//!
//! Bridges a LoRa radio concentrator to a LoRaWAN network server over the
//! Semtech UDP gateway protocol: it streams received packets upward with
//! timing metadata, accepts downlink transmit requests, schedules them
//! against the concentrator's free-running counter via a just-in-time
//! queue, and emits periodic beacons disciplined by GPS time.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! lora-pkt-fwd = "0.1.0"
//! ```

pub mod beacon;
pub mod concentrator;
pub mod config;
pub mod constants;
pub mod counter;
pub mod dispatcher;
pub mod downstream;
pub mod error;
pub mod gateway;
pub mod gps;
pub mod instrumentation;
pub mod jit;
pub mod logging;
pub mod protocol;
pub mod signal;
pub mod spectral_scan;
pub mod time_ref;
pub mod upstream;
pub mod util;
pub mod xtal;

pub use crate::error::ForwarderError;
pub use crate::logging::init_logger;
