//! Camera Protocol Error Types

use camera_device::{DeviceError, SizeQuery};
use thiserror::Error;

use crate::operation::ResultCode;
use crate::state::{Operation, SessionState};
use crate::wire::WireError;

/// Errors produced by protocol operation handlers and session lifecycle
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not legal in the current lifecycle state
    #[error("{op} is not allowed in state {state:?}")]
    InvalidState { op: Operation, state: SessionState },

    /// Payload too short for the operation's layout
    #[error("Malformed request: {0}")]
    Malformed(#[from] WireError),

    /// Well-formed request with unacceptable field values
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Capture id at or below the last accepted one
    #[error("Stale capture request {request_id} (last accepted {last_accepted})")]
    StaleRequest { request_id: u32, last_accepted: u32 },

    /// Response or marshaling buffer could not be allocated
    #[error("Cannot allocate {requested} bytes for response")]
    ResourceExhausted { requested: usize },

    /// Camera driver reported a failure
    #[error("Camera device error: {0}")]
    Device(#[from] DeviceError),

    /// Driver answer does not match what its size query announced
    #[error("Size query {query:?} announced {announced} bytes, driver returned {actual}")]
    SizeMismatch {
        query: SizeQuery,
        announced: usize,
        actual: usize,
    },

    /// Operation type not implemented by this protocol
    #[error("Unknown operation type {0:#04x}")]
    UnknownOperation(u8),

    /// Session configuration rejected before attach
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    /// Attach could not complete; nothing was left behind
    #[error("Session attach failed: {0}")]
    Attach(String),
}

impl SessionError {
    /// Result code reported to the host for this error
    pub fn result_code(&self) -> ResultCode {
        match self {
            SessionError::InvalidState { .. }
            | SessionError::InvalidArgument(_)
            | SessionError::StaleRequest { .. }
            | SessionError::InvalidConfig(_) => ResultCode::Invalid,
            SessionError::Malformed(_) | SessionError::UnknownOperation(_) => {
                ResultCode::ProtocolBad
            }
            SessionError::ResourceExhausted { .. } => ResultCode::NoMemory,
            SessionError::Device(err) => ResultCode::from(err),
            SessionError::SizeMismatch { .. } => ResultCode::Malfunction,
            SessionError::Attach(_) => ResultCode::UnknownError,
        }
    }
}
