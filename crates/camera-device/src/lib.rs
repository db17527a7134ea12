//! Camera Hardware Capture Interface
//!
//! Defines the driver-facing contract the camera protocol session talks to:
//! - Power sequencing (power up/down)
//! - Capability and size queries
//! - Stream configuration negotiation
//! - Blocking capture start, asynchronous stop
//! - Per-frame metadata fetch
//!
//! A [`SimulatedCamera`] is provided for tests and bring-up without a sensor.

pub mod capture;
pub mod simulated;
pub mod stream;

pub use capture::{CaptureCompletion, CaptureRequest, MetadataQuery, MetadataRecord};
pub use simulated::{DeviceCall, FaultPoint, SimulatedCamera};
pub use stream::{
    Capabilities, ConfigFlags, ImageSize, PixelFormat, SizeQuery, StreamConfigAnswer,
    StreamConfigRequest,
};

use thiserror::Error;

/// Errors reported by a camera driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Camera device is not open")]
    NotOpen,

    #[error("Operation not supported by camera driver")]
    NotSupported,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Driver out of memory")]
    OutOfMemory,

    #[error("Driver operation timed out")]
    Timeout,

    #[error("Camera busy")]
    Busy,

    #[error("No data available: {0}")]
    NoData(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Hardware capture interface implemented by camera drivers.
///
/// Every call is synchronous. All methods take `&self` because
/// [`CameraDevice::stop_capture`] is issued from the protocol side while
/// [`CameraDevice::start_capture`] is still blocked on the capture worker.
pub trait CameraDevice: Send + Sync {
    /// Open the sensor. Called once when the session attaches.
    fn open(&self) -> Result<(), DeviceError>;

    /// Release the sensor. Called once when the session detaches.
    fn close(&self);

    /// Power up the camera module
    fn power_up(&self) -> Result<(), DeviceError>;

    /// Power down the camera module
    fn power_down(&self) -> Result<(), DeviceError>;

    /// Capability bytes, at most `max_size` long
    fn capabilities(&self, max_size: usize) -> Result<Vec<u8>, DeviceError>;

    /// Number of bytes the given query will return
    fn required_size(&self, query: SizeQuery) -> Result<usize, DeviceError>;

    /// First `num_streams` supported stream configurations
    fn supported_configs(&self, num_streams: usize)
        -> Result<Vec<StreamConfigAnswer>, DeviceError>;

    /// Apply stream configurations.
    ///
    /// Returns the accepted configuration for each requested stream and a
    /// flags word; non-zero flags mean at least one parameter was adjusted
    /// and the configuration was not applied.
    fn set_streams_config(
        &self,
        configs: &[StreamConfigRequest],
    ) -> Result<(ConfigFlags, Vec<StreamConfigAnswer>), DeviceError>;

    /// Currently applied configuration.
    ///
    /// Part of the driver contract for diagnostics and host tooling. The
    /// protocol session never issues it: CONFIGURE_STREAMS answers come from
    /// `set_streams_config` itself, sized by [`SizeQuery::CurrentConfig`].
    fn current_config(&self) -> Result<(ConfigFlags, StreamConfigAnswer), DeviceError>;

    /// Start a capture and block until the driver hands control back.
    ///
    /// The driver fires `completion` once the capture has ended, either from
    /// inside this call or later from its own context.
    fn start_capture(
        &self,
        request: &CaptureRequest,
        completion: CaptureCompletion,
    ) -> Result<(), DeviceError>;

    /// Stop the running capture, returning the id of the request it belonged to
    fn stop_capture(&self) -> Result<u32, DeviceError>;

    /// Fill `data` with the metadata block for one frame.
    ///
    /// `data` is sized by [`SizeQuery::Metadata`]; the driver returns it
    /// inside the record without changing its length.
    fn metadata(&self, query: &MetadataQuery, data: Vec<u8>)
        -> Result<MetadataRecord, DeviceError>;
}
