//! # Packet Forwarder Error Handling
//!
//! This module defines the `ForwarderError` enum used across the gateway daemon:
//! configuration, wire-protocol, network, and concentrator faults.

use thiserror::Error;

/// Represents the different error types that can occur in the packet forwarder.
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// A malformed or missing field in a configuration file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure to read the configuration file from disk.
    #[error("configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Failure decoding a configuration JSON document.
    #[error("configuration JSON error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    /// Socket setup or I/O failure on the upstream or downstream link.
    #[error("network error: {0}")]
    Network(String),

    /// A malformed gateway wire-protocol datagram.
    #[error("wire protocol error: {0}")]
    Protocol(String),

    /// A base64-encoded payload failed to decode.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// GPS serial port failure.
    #[error("GPS serial port error: {0}")]
    SerialPort(String),

    /// The concentrator HAL reported a fault.
    #[error("concentrator error: {0}")]
    Concentrator(String),

    /// A catastrophic startup failure; the process should exit non-zero.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}
