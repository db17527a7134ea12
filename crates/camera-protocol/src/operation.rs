//! Camera Protocol Operation and Result Codes

use camera_device::DeviceError;
use serde::{Deserialize, Serialize};

/// Protocol major version reported by the version operation
pub const VERSION_MAJOR: u8 = 0;
/// Protocol minor version reported by the version operation
pub const VERSION_MINOR: u8 = 1;

/// Operation types carried in the bus message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationType {
    ProtocolVersion = 0x01,
    Capabilities = 0x02,
    ConfigureStreams = 0x03,
    Capture = 0x04,
    Flush = 0x05,
    MetaData = 0x06,
}

impl OperationType {
    pub fn name(&self) -> &'static str {
        match self {
            OperationType::ProtocolVersion => "PROTOCOL_VERSION",
            OperationType::Capabilities => "CAPABILITIES",
            OperationType::ConfigureStreams => "CONFIGURE_STREAMS",
            OperationType::Capture => "CAPTURE",
            OperationType::Flush => "FLUSH",
            OperationType::MetaData => "META_DATA",
        }
    }
}

impl TryFrom<u8> for OperationType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(OperationType::ProtocolVersion),
            0x02 => Ok(OperationType::Capabilities),
            0x03 => Ok(OperationType::ConfigureStreams),
            0x04 => Ok(OperationType::Capture),
            0x05 => Ok(OperationType::Flush),
            0x06 => Ok(OperationType::MetaData),
            other => Err(other),
        }
    }
}

/// Operation result codes returned to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0x00,
    Interrupted = 0x01,
    Timeout = 0x02,
    NoMemory = 0x03,
    ProtocolBad = 0x04,
    Overflow = 0x05,
    Invalid = 0x06,
    Retry = 0x07,
    Nonexistent = 0x08,
    UnknownError = 0xFE,
    Malfunction = 0xFF,
}

impl ResultCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_success(&self) -> bool {
        *self == ResultCode::Success
    }
}

impl From<&DeviceError> for ResultCode {
    fn from(err: &DeviceError) -> Self {
        match err {
            DeviceError::NotOpen => ResultCode::Nonexistent,
            DeviceError::NotSupported => ResultCode::ProtocolBad,
            DeviceError::InvalidArgument(_) => ResultCode::Invalid,
            DeviceError::OutOfMemory => ResultCode::NoMemory,
            DeviceError::Timeout => ResultCode::Timeout,
            DeviceError::Busy => ResultCode::Retry,
            DeviceError::NoData(_) | DeviceError::Io(_) => ResultCode::Malfunction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_codes() {
        for code in 0x01..=0x06u8 {
            let op = OperationType::try_from(code).unwrap();
            assert_eq!(op as u8, code);
        }
        assert_eq!(OperationType::try_from(0x07), Err(0x07));
        assert_eq!(OperationType::try_from(0x00), Err(0x00));
    }

    #[test]
    fn test_device_error_mapping() {
        assert_eq!(ResultCode::from(&DeviceError::Timeout), ResultCode::Timeout);
        assert_eq!(ResultCode::from(&DeviceError::Busy), ResultCode::Retry);
        assert_eq!(
            ResultCode::from(&DeviceError::NoData("frame".into())),
            ResultCode::Malfunction
        );
    }
}
