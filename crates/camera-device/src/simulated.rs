//! Simulated camera module
//!
//! Behaves like the reference sensor board: a fixed list of YCbCr422 modes,
//! a single capture in flight at a time, metadata only for frames that were
//! actually produced. Every call is recorded so tests can assert on the
//! exact sequence the protocol layer issued.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::{
    CameraDevice, Capabilities, CaptureCompletion, CaptureRequest, ConfigFlags, DeviceError,
    ImageSize, MetadataQuery, MetadataRecord, PixelFormat, SizeQuery, StreamConfigAnswer,
    StreamConfigRequest,
};

/// Streams the simulated sensor can run at once
pub const MAX_STREAMS: usize = 4;

/// Size of one metadata block in bytes
pub const METADATA_SIZE: usize = 16;

/// CSI-2 data type for YUV422 8-bit
const CSI2_DT_YUV422_8BIT: u8 = 0x1E;

/// Modes supported by the simulated sensor, in reporting order
pub const SUPPORTED_MODES: [ImageSize; 7] = [
    ImageSize::VGA,
    ImageSize::QVGA,
    ImageSize::HD_720P,
    ImageSize::HD_1080P,
    ImageSize::QSXGA,
    ImageSize::SXGA,
    ImageSize::XGA,
];

/// A call received by the simulated camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Open,
    Close,
    PowerUp,
    PowerDown,
    Capabilities,
    RequiredSize(SizeQuery),
    SupportedConfigs(usize),
    SetStreams(usize),
    CurrentConfig,
    StartCapture(u32),
    StopCapture,
    Metadata(u32, u16),
}

/// Operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Open,
    PowerUp,
    PowerDown,
    Capabilities,
    RequiredSize,
    SupportedConfigs,
    SetStreams,
    CurrentConfig,
    StartCapture,
    StopCapture,
    Metadata,
}

struct ActiveCapture {
    request_id: u32,
    frame_count: u16,
    completion: CaptureCompletion,
}

#[derive(Default)]
struct SimState {
    open: bool,
    powered: bool,
    current: Option<StreamConfigAnswer>,
    active: Option<ActiveCapture>,
    last_request_id: u32,
    /// Frames produced per request id
    captured: HashMap<u32, u16>,
    calls: Vec<DeviceCall>,
    faults: HashMap<FaultPoint, DeviceError>,
    size_overrides: HashMap<SizeQuery, usize>,
}

impl SimState {
    fn check(&self, point: FaultPoint) -> Result<(), DeviceError> {
        if let Some(err) = self.faults.get(&point) {
            return Err(err.clone());
        }
        if point != FaultPoint::Open && !self.open {
            return Err(DeviceError::NotOpen);
        }
        Ok(())
    }
}

/// In-memory camera implementing [`CameraDevice`]
pub struct SimulatedCamera {
    state: Mutex<SimState>,
    stopped: Condvar,
    /// Block in `start_capture` until stopped, like a streaming sensor
    blocking: bool,
    capabilities: Capabilities,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCamera {
    /// Streaming sensor: `start_capture` blocks until `stop_capture`
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Sensor that produces all requested frames inside `start_capture`
    pub fn one_shot() -> Self {
        Self::build(false)
    }

    fn build(blocking: bool) -> Self {
        info!("Creating simulated camera (blocking={})", blocking);
        Self {
            state: Mutex::new(SimState::default()),
            stopped: Condvar::new(),
            blocking,
            capabilities: Capabilities::METADATA_GREYBUS | Capabilities::METADATA_MIPI,
        }
    }

    /// Replace the reported capability bits
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call at `point` fail with `err`
    pub fn fail_on(&self, point: FaultPoint, err: DeviceError) {
        self.lock().faults.insert(point, err);
    }

    pub fn clear_fault(&self, point: FaultPoint) {
        self.lock().faults.remove(&point);
    }

    /// Report `size` for `query` instead of the natural size
    pub fn override_required_size(&self, query: SizeQuery, size: usize) {
        self.lock().size_overrides.insert(query, size);
    }

    /// Every call received so far, oldest first
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    /// Request ids passed to `start_capture`, in call order
    pub fn started_requests(&self) -> Vec<u32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::StartCapture(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| **call == DeviceCall::StopCapture)
            .count()
    }

    /// Request currently blocked in `start_capture`
    pub fn active_request(&self) -> Option<u32> {
        self.lock().active.as_ref().map(|a| a.request_id)
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    /// End the running capture as if the sensor finished its frames
    pub fn finish_capture(&self) -> Option<u32> {
        let mut state = self.lock();
        let active = state.active.take()?;
        state.captured.insert(active.request_id, active.frame_count);
        drop(state);

        debug!("Simulated capture {} finished", active.request_id);
        active.completion.complete();
        self.stopped.notify_all();
        Some(active.request_id)
    }

    fn answer_for(size: ImageSize) -> StreamConfigAnswer {
        let format = PixelFormat::YCbCr422;
        StreamConfigAnswer {
            width: size.width,
            height: size.height,
            format,
            virtual_channel: 0,
            data_type: CSI2_DT_YUV422_8BIT,
            max_size: u32::from(size.width) * u32::from(size.height) * format.bytes_per_pixel(),
        }
    }

    fn is_supported(config: &StreamConfigRequest) -> bool {
        config.format == PixelFormat::YCbCr422 && SUPPORTED_MODES.contains(&config.size())
    }
}

impl CameraDevice for SimulatedCamera {
    fn open(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Open);
        state.check(FaultPoint::Open)?;
        state.open = true;
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Close);
        state.open = false;
        state.powered = false;
    }

    fn power_up(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::PowerUp);
        state.check(FaultPoint::PowerUp)?;
        state.powered = true;
        Ok(())
    }

    fn power_down(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::PowerDown);
        state.check(FaultPoint::PowerDown)?;
        state.powered = false;
        Ok(())
    }

    fn capabilities(&self, max_size: usize) -> Result<Vec<u8>, DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Capabilities);
        state.check(FaultPoint::Capabilities)?;

        let bytes = vec![self.capabilities.bits()];
        if bytes.len() > max_size {
            return Err(DeviceError::InvalidArgument(format!(
                "capability buffer of {} bytes is too small",
                max_size
            )));
        }
        Ok(bytes)
    }

    fn required_size(&self, query: SizeQuery) -> Result<usize, DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::RequiredSize(query));
        state.check(FaultPoint::RequiredSize)?;

        if let Some(size) = state.size_overrides.get(&query) {
            return Ok(*size);
        }
        Ok(match query {
            SizeQuery::SupportedConfigs => SUPPORTED_MODES.len() * StreamConfigAnswer::WIRE_SIZE,
            SizeQuery::CurrentConfig => MAX_STREAMS * StreamConfigAnswer::WIRE_SIZE,
            SizeQuery::Metadata => METADATA_SIZE,
        })
    }

    fn supported_configs(
        &self,
        num_streams: usize,
    ) -> Result<Vec<StreamConfigAnswer>, DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::SupportedConfigs(num_streams));
        state.check(FaultPoint::SupportedConfigs)?;

        if num_streams > SUPPORTED_MODES.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "only {} configurations supported",
                SUPPORTED_MODES.len()
            )));
        }
        Ok(SUPPORTED_MODES[..num_streams]
            .iter()
            .map(|size| Self::answer_for(*size))
            .collect())
    }

    fn set_streams_config(
        &self,
        configs: &[StreamConfigRequest],
    ) -> Result<(ConfigFlags, Vec<StreamConfigAnswer>), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::SetStreams(configs.len()));
        state.check(FaultPoint::SetStreams)?;

        if configs.is_empty() || configs.len() > MAX_STREAMS {
            return Err(DeviceError::InvalidArgument(format!(
                "{} streams requested, sensor supports 1..={}",
                configs.len(),
                MAX_STREAMS
            )));
        }

        let mut flags = ConfigFlags::empty();
        let answers: Vec<_> = configs
            .iter()
            .map(|config| {
                if Self::is_supported(config) {
                    Self::answer_for(config.size())
                } else {
                    warn!(
                        "Unsupported mode {}x{} format {:#x}, proposing VGA",
                        config.width,
                        config.height,
                        config.format.code()
                    );
                    flags = ConfigFlags::ADJUSTED;
                    Self::answer_for(ImageSize::VGA)
                }
            })
            .collect();

        if flags.is_empty() {
            state.current = answers.first().copied();
        }
        Ok((flags, answers))
    }

    fn current_config(&self) -> Result<(ConfigFlags, StreamConfigAnswer), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::CurrentConfig);
        state.check(FaultPoint::CurrentConfig)?;

        state
            .current
            .map(|answer| (ConfigFlags::empty(), answer))
            .ok_or_else(|| DeviceError::NoData("no stream configuration applied".to_string()))
    }

    fn start_capture(
        &self,
        request: &CaptureRequest,
        completion: CaptureCompletion,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::StartCapture(request.request_id));
        state.check(FaultPoint::StartCapture)?;

        if !state.powered {
            return Err(DeviceError::Io("sensor is powered down".to_string()));
        }
        if state.active.is_some() {
            return Err(DeviceError::Busy);
        }

        debug!(
            "Simulated capture {} started: streams={:#04x}, frames={}",
            request.request_id, request.stream_mask, request.frame_count
        );
        state.last_request_id = request.request_id;

        if !self.blocking {
            state
                .captured
                .insert(request.request_id, request.frame_count);
            drop(state);
            completion.complete();
            return Ok(());
        }

        state.active = Some(ActiveCapture {
            request_id: request.request_id,
            frame_count: request.frame_count,
            completion,
        });
        while state
            .active
            .as_ref()
            .is_some_and(|active| active.request_id == request.request_id)
        {
            state = self
                .stopped
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    fn stop_capture(&self) -> Result<u32, DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::StopCapture);
        state.check(FaultPoint::StopCapture)?;

        let Some(active) = state.active.take() else {
            return Ok(state.last_request_id);
        };
        state.captured.insert(active.request_id, active.frame_count);
        drop(state);

        debug!("Simulated capture {} stopped", active.request_id);
        active.completion.complete();
        self.stopped.notify_all();
        Ok(active.request_id)
    }

    fn metadata(
        &self,
        query: &MetadataQuery,
        mut data: Vec<u8>,
    ) -> Result<MetadataRecord, DeviceError> {
        let mut state = self.lock();
        state
            .calls
            .push(DeviceCall::Metadata(query.request_id, query.frame_number));
        state.check(FaultPoint::Metadata)?;

        let frames = state.captured.get(&query.request_id).copied().ok_or_else(|| {
            DeviceError::NoData(format!("request {} was never captured", query.request_id))
        })?;
        if query.frame_number >= frames {
            return Err(DeviceError::NoData(format!(
                "request {} produced {} frames, frame {} requested",
                query.request_id, frames, query.frame_number
            )));
        }

        let mut block = [0u8; METADATA_SIZE];
        block[0..4].copy_from_slice(&query.request_id.to_le_bytes());
        block[4..6].copy_from_slice(&query.frame_number.to_le_bytes());
        block[6] = query.stream_index;
        // exposure in microseconds, fixed for the simulated sensor
        block[8..12].copy_from_slice(&33_000u32.to_le_bytes());
        let len = data.len().min(METADATA_SIZE);
        data[..len].copy_from_slice(&block[..len]);

        Ok(MetadataRecord {
            request_id: query.request_id,
            frame_number: query.frame_number,
            stream_index: query.stream_index,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn opened(camera: SimulatedCamera) -> SimulatedCamera {
        camera.open().unwrap();
        camera.power_up().unwrap();
        camera
    }

    fn request(id: u32) -> CaptureRequest {
        CaptureRequest {
            request_id: id,
            stream_mask: 0x01,
            frame_count: 4,
            settings: vec![],
        }
    }

    #[test]
    fn test_calls_fail_when_closed() {
        let camera = SimulatedCamera::new();
        assert_eq!(camera.power_up(), Err(DeviceError::NotOpen));
    }

    #[test]
    fn test_unsupported_mode_is_adjusted() {
        let camera = opened(SimulatedCamera::new());
        let (flags, answers) = camera
            .set_streams_config(&[
                StreamConfigRequest::new(ImageSize::HD_720P, PixelFormat::YCbCr422),
                StreamConfigRequest::new(ImageSize::new(100, 100), PixelFormat::YCbCr422),
            ])
            .unwrap();

        assert_eq!(flags, ConfigFlags::ADJUSTED);
        assert_eq!(answers[0].width, 1280);
        assert_eq!(answers[1].width, 640);
        assert!(camera.current_config().is_err());
    }

    #[test]
    fn test_current_config_follows_applied_set() {
        let camera = opened(SimulatedCamera::new());
        assert!(matches!(camera.current_config(), Err(DeviceError::NoData(_))));

        camera
            .set_streams_config(&[StreamConfigRequest::new(
                ImageSize::HD_720P,
                PixelFormat::YCbCr422,
            )])
            .unwrap();
        let (flags, answer) = camera.current_config().unwrap();
        assert!(flags.is_empty());
        assert_eq!((answer.width, answer.height), (1280, 720));
        assert_eq!(answer.max_size, 1280 * 720 * 2);
    }

    #[test]
    fn test_metadata_requires_captured_frame() {
        let camera = opened(SimulatedCamera::one_shot());
        let query = MetadataQuery {
            request_id: 7,
            frame_number: 1,
            stream_index: 0,
        };
        assert!(matches!(
            camera.metadata(&query, vec![0; METADATA_SIZE]),
            Err(DeviceError::NoData(_))
        ));

        camera
            .start_capture(&request(7), CaptureCompletion::new())
            .unwrap();
        let record = camera.metadata(&query, vec![0; METADATA_SIZE]).unwrap();
        assert_eq!(record.data.len(), METADATA_SIZE);
        assert_eq!(&record.data[0..4], &7u32.to_le_bytes());
    }

    #[test]
    fn test_blocking_capture_ends_on_stop() {
        let camera = Arc::new(opened(SimulatedCamera::new()));
        let completion = CaptureCompletion::new();

        let worker = {
            let camera = Arc::clone(&camera);
            let completion = completion.clone();
            std::thread::spawn(move || camera.start_capture(&request(3), completion))
        };

        while camera.active_request().is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(camera.stop_capture().unwrap(), 3);
        worker.join().unwrap().unwrap();
        assert!(completion.is_complete());
        assert_eq!(camera.active_request(), None);
    }
}
