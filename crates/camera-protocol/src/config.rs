//! Session configuration

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::wire::{CapabilitiesResponse, WireFormat};

/// Limits and naming for one camera protocol session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest response payload the bus transport can carry (bytes)
    pub max_payload_size: usize,

    /// Capability buffer offered to the driver (bytes)
    pub max_capabilities_size: usize,

    /// Name of the capture worker, used as its tracing span
    pub worker_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 2048,
            max_capabilities_size: 256,
            worker_name: "camera-capture".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_capabilities_size == 0 || self.max_capabilities_size > u16::MAX as usize {
            return Err(SessionError::InvalidConfig(format!(
                "max_capabilities_size {} must be within 1..=65535",
                self.max_capabilities_size
            )));
        }
        let capabilities_len = CapabilitiesResponse::HEADER_SIZE + self.max_capabilities_size;
        if capabilities_len > self.max_payload_size {
            return Err(SessionError::InvalidConfig(format!(
                "capabilities response of {} bytes exceeds max_payload_size {}",
                capabilities_len, self.max_payload_size
            )));
        }
        if self.worker_name.is_empty() {
            return Err(SessionError::InvalidConfig(
                "worker_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_capabilities_must_fit_payload() {
        let config = SessionConfig {
            max_payload_size: 64,
            max_capabilities_size: 63,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
    }
}
