//! Thin wrapper over the `base64` crate's `Engine` API (standard alphabet,
//! with padding) so callers don't each re-pick an engine.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ForwarderError;

pub fn encode(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

pub fn decode(data: &str) -> Result<Vec<u8>, ForwarderError> {
    Ok(STANDARD.decode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let raw = vec![1, 2, 3, 255, 0];
        let enc = encode(&raw);
        assert_eq!(decode(&enc).unwrap(), raw);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode("not base64!!").is_err());
    }
}
