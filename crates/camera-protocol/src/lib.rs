//! Camera Protocol Responder
//!
//! Module-side endpoint of the bus camera protocol. Decodes host operations,
//! enforces the session lifecycle, queues capture requests for a background
//! worker and talks to the camera through [`camera_device::CameraDevice`].

mod config;
mod error;
mod operation;
mod queue;
mod session;
mod state;
pub mod wire;
mod worker;

pub use config::SessionConfig;
pub use error::SessionError;
pub use operation::{OperationType, ResultCode, VERSION_MAJOR, VERSION_MINOR};
pub use queue::{CaptureQueue, FlushOutcome, InFlight, NextCapture};
pub use session::{OperationResponse, Session};
pub use state::{Operation, SessionState, StateMachine};
pub use wire::{WireError, WireFormat};
