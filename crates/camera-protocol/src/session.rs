//! Camera Protocol Session
//!
//! One session per attached camera. Owns the driver handle, the lifecycle
//! state machine, the capture queue and the capture worker task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camera_device::{
    CameraDevice, CaptureRequest, ConfigFlags, MetadataQuery, MetadataRecord, SizeQuery,
    StreamConfigAnswer, StreamConfigRequest,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::operation::{OperationType, ResultCode, VERSION_MAJOR, VERSION_MINOR};
use crate::queue::CaptureQueue;
use crate::state::{Operation, SessionState, StateMachine};
use crate::wire::{
    self, CapabilitiesResponse, ConfigureStreamsRequest, ConfigureStreamsResponse, FlushResponse,
    VersionResponse, WireFormat,
};
use crate::worker::CaptureWorker;

/// Result code and payload produced for one bus operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResponse {
    pub result: ResultCode,
    /// Response payload; empty unless `result` is success
    pub payload: Vec<u8>,
}

impl OperationResponse {
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            result: ResultCode::Success,
            payload,
        }
    }

    pub fn error(result: ResultCode) -> Self {
        Self {
            result,
            payload: Vec::new(),
        }
    }
}

/// State shared between protocol handlers and the capture worker
pub(crate) struct SessionShared {
    pub(crate) device: Arc<dyn CameraDevice>,
    pub(crate) queue: CaptureQueue,
    machine: Mutex<StateMachine>,
    config: SessionConfig,
}

impl SessionShared {
    /// Lock order is state machine first, then queue
    pub(crate) fn lock_machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Secure a response buffer before any hardware-visible change
    fn reserve(&self, len: usize) -> Result<Vec<u8>, SessionError> {
        if len > self.config.max_payload_size {
            return Err(SessionError::ResourceExhausted { requested: len });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| SessionError::ResourceExhausted { requested: len })?;
        Ok(buf)
    }
}

/// Number of stream answers a size query announced
fn answers_in(query: SizeQuery, size: usize) -> Result<usize, SessionError> {
    let count = size / StreamConfigAnswer::WIRE_SIZE;
    if size % StreamConfigAnswer::WIRE_SIZE != 0 || count > u16::MAX as usize {
        return Err(SessionError::SizeMismatch {
            query,
            announced: size,
            actual: count * StreamConfigAnswer::WIRE_SIZE,
        });
    }
    Ok(count)
}

/// Camera protocol session bound to one bus endpoint
pub struct Session {
    cport: u16,
    shared: Arc<SessionShared>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Attach the protocol to `cport`: open the camera and start the capture
    /// worker on the current tokio runtime.
    ///
    /// On failure the camera is closed again and no session exists.
    pub fn attach(
        cport: u16,
        device: Arc<dyn CameraDevice>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        info!("Attaching camera protocol on cport {}", cport);

        device.open()?;

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("No tokio runtime for capture worker: {}", err);
                device.close();
                return Err(SessionError::Attach(err.to_string()));
            }
        };

        let mut machine = StateMachine::new();
        machine.transition(SessionState::Connected);

        let span = info_span!("capture_worker", cport, name = %config.worker_name);
        let shared = Arc::new(SessionShared {
            device,
            queue: CaptureQueue::new(),
            machine: Mutex::new(machine),
            config,
        });

        let worker = CaptureWorker::new(Arc::clone(&shared));
        let handle = runtime.spawn(worker.run().instrument(span));

        info!("Camera protocol attached on cport {}", cport);
        Ok(Self {
            cport,
            shared,
            worker: Some(handle),
        })
    }

    /// Detach from the bus: stop and join the worker, drop queued requests,
    /// then close the camera.
    pub async fn detach(mut self) {
        info!("Detaching camera protocol from cport {}", self.cport);
        self.stop_worker();

        if let Some(handle) = self.worker.take() {
            if let Err(err) = handle.await {
                error!("Capture worker ended abnormally: {}", err);
            }
        }

        self.shared.device.close();
        self.shared
            .lock_machine()
            .transition(SessionState::Removed);
        info!("Camera protocol detached from cport {}", self.cport);
    }

    /// Signal shutdown, wake the worker and end any running capture
    fn stop_worker(&self) {
        let machine = self.shared.lock_machine();
        let discarded = self.shared.queue.request_stop();
        if !discarded.is_empty() {
            debug!("Dropping {} queued captures on shutdown", discarded.len());
        }
        if machine.state() == SessionState::Streaming {
            if let Err(err) = self.shared.device.stop_capture() {
                warn!("Stopping capture on shutdown failed: {}", err);
            }
        }
    }

    pub fn cport(&self) -> u16 {
        self.cport
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_machine().state()
    }

    pub fn last_accepted_id(&self) -> u32 {
        self.shared.lock_machine().last_accepted_id()
    }

    /// Pending captures not yet handed to the worker
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Handle one inbound bus operation
    pub fn dispatch(&self, op_type: u8, payload: &[u8]) -> OperationResponse {
        let result = match OperationType::try_from(op_type) {
            Ok(op) => {
                debug!("{} request, {} bytes", op.name(), payload.len());
                match op {
                    OperationType::ProtocolVersion => self.protocol_version(),
                    OperationType::Capabilities => self.capabilities(),
                    OperationType::ConfigureStreams => self.configure_streams(payload),
                    OperationType::Capture => self.capture(payload),
                    OperationType::Flush => self.flush(),
                    OperationType::MetaData => self.metadata(payload),
                }
            }
            Err(code) => Err(SessionError::UnknownOperation(code)),
        };

        match result {
            Ok(payload) => OperationResponse::success(payload),
            Err(err) => {
                warn!("Operation {:#04x} rejected: {}", op_type, err);
                OperationResponse::error(err.result_code())
            }
        }
    }

    /// PROTOCOL_VERSION
    pub fn protocol_version(&self) -> Result<Vec<u8>, SessionError> {
        let response = VersionResponse {
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
        };
        let mut out = self.shared.reserve(response.encoded_len())?;
        response.encode(&mut out);
        Ok(out)
    }

    /// CAPABILITIES
    pub fn capabilities(&self) -> Result<Vec<u8>, SessionError> {
        let machine = self.shared.lock_machine();
        machine.check(Operation::Capabilities)?;

        let max_size = self.shared.config.max_capabilities_size;
        let mut out = self
            .shared
            .reserve(CapabilitiesResponse::HEADER_SIZE + max_size)?;

        let capabilities = self.shared.device.capabilities(max_size)?;
        if capabilities.len() > max_size {
            return Err(SessionError::InvalidArgument(format!(
                "driver returned {} capability bytes, limit is {}",
                capabilities.len(),
                max_size
            )));
        }

        CapabilitiesResponse { capabilities }.encode(&mut out);
        drop(machine);
        Ok(out)
    }

    /// CONFIGURE_STREAMS. A non-empty stream list applies a configuration,
    /// an empty one queries supported configurations and unconfigures.
    pub fn configure_streams(&self, payload: &[u8]) -> Result<Vec<u8>, SessionError> {
        let request: ConfigureStreamsRequest = wire::from_slice(payload)?;

        let mut machine = self.shared.lock_machine();
        if request.streams.is_empty() {
            self.query_streams(&mut machine)
        } else {
            self.set_streams(&mut machine, &request.streams)
        }
    }

    fn set_streams(
        &self,
        machine: &mut StateMachine,
        streams: &[StreamConfigRequest],
    ) -> Result<Vec<u8>, SessionError> {
        machine.check(Operation::ConfigureStreams)?;

        if let Some(stream) = streams.iter().find(|s| s.reserved != 0) {
            return Err(SessionError::InvalidArgument(format!(
                "reserved field of stream {}x{} is {:#06x}",
                stream.width, stream.height, stream.reserved
            )));
        }

        let size = self.shared.device.required_size(SizeQuery::CurrentConfig)?;
        let capacity = answers_in(SizeQuery::CurrentConfig, size)?;
        if streams.len() > capacity {
            return Err(SessionError::InvalidArgument(format!(
                "{} streams requested, camera answers at most {}",
                streams.len(),
                capacity
            )));
        }
        let mut out = self
            .shared
            .reserve(ConfigureStreamsResponse::len_for(streams.len()))?;

        let (flags, answers) = self.shared.device.set_streams_config(streams)?;
        if answers.len() != streams.len() {
            return Err(SessionError::SizeMismatch {
                query: SizeQuery::CurrentConfig,
                announced: streams.len() * StreamConfigAnswer::WIRE_SIZE,
                actual: answers.len() * StreamConfigAnswer::WIRE_SIZE,
            });
        }

        if flags.is_empty() {
            self.shared.device.power_up()?;
            machine.transition(SessionState::Configured);
            info!("Configured {} streams", streams.len());
        } else {
            // adjusted answer: host must retry with the proposed values
            machine.transition(SessionState::Unconfigured);
            info!(
                "Stream configuration adjusted by camera (flags={:#06x})",
                flags.bits()
            );
        }

        ConfigureStreamsResponse {
            flags,
            streams: answers,
        }
        .encode(&mut out);
        Ok(out)
    }

    fn query_streams(&self, machine: &mut StateMachine) -> Result<Vec<u8>, SessionError> {
        machine.check(Operation::QueryStreams)?;

        let size = self
            .shared
            .device
            .required_size(SizeQuery::SupportedConfigs)?;
        let num_streams = answers_in(SizeQuery::SupportedConfigs, size)?;
        let mut out = self
            .shared
            .reserve(ConfigureStreamsResponse::len_for(num_streams))?;

        let answers = self.shared.device.supported_configs(num_streams)?;
        if answers.len() != num_streams {
            return Err(SessionError::SizeMismatch {
                query: SizeQuery::SupportedConfigs,
                announced: size,
                actual: answers.len() * StreamConfigAnswer::WIRE_SIZE,
            });
        }

        if machine.state() == SessionState::Configured {
            self.shared.device.power_down()?;
        }
        // the worker dequeues only in Configured, under this same lock
        let discarded = self.shared.queue.discard_pending();
        if !discarded.is_empty() {
            info!("Unconfigure dropped {} queued captures", discarded.len());
            metrics::counter!("camera.capture.discarded").increment(discarded.len() as u64);
        }
        machine.transition(SessionState::Unconfigured);
        debug!("Reported {} supported configurations", num_streams);

        ConfigureStreamsResponse {
            flags: ConfigFlags::empty(),
            streams: answers,
        }
        .encode(&mut out);
        Ok(out)
    }

    /// CAPTURE. Queues the request and returns without waiting for it.
    pub fn capture(&self, payload: &[u8]) -> Result<Vec<u8>, SessionError> {
        let request: CaptureRequest = wire::from_slice(payload)?;

        let mut machine = self.shared.lock_machine();
        machine.check(Operation::Capture)?;

        if request.frame_count == 0 {
            return Err(SessionError::InvalidArgument(format!(
                "capture {} requests zero frames",
                request.request_id
            )));
        }
        machine.check_request_id(request.request_id)?;

        let request_id = request.request_id;
        self.shared
            .queue
            .enqueue(request)
            .map_err(|_| SessionError::ResourceExhausted {
                requested: std::mem::size_of::<CaptureRequest>(),
            })?;
        machine.record_accepted(request_id);

        metrics::counter!("camera.capture.accepted").increment(1);
        debug!("Capture {} queued", request_id);
        Ok(Vec::new())
    }

    /// FLUSH. Empties the queue and stops the running capture.
    pub fn flush(&self) -> Result<Vec<u8>, SessionError> {
        let machine = self.shared.lock_machine();
        machine.check(Operation::Flush)?;

        let mut out = self.shared.reserve(FlushResponse::HEADER_SIZE)?;

        let outcome = self.shared.queue.flush();
        if !outcome.discarded.is_empty() {
            debug!("Flush discarded {} queued captures", outcome.discarded.len());
            metrics::counter!("camera.capture.discarded")
                .increment(outcome.discarded.len() as u64);
        }

        let request_id = self.shared.device.stop_capture()?;

        if machine.state() == SessionState::Streaming {
            if let Some(in_flight) = outcome.in_flight {
                in_flight.completion.complete();
            }
        }
        drop(machine);

        metrics::counter!("camera.flush").increment(1);
        info!("Flushed, camera stopped request {}", request_id);

        FlushResponse { request_id }.encode(&mut out);
        Ok(out)
    }

    /// META_DATA
    pub fn metadata(&self, payload: &[u8]) -> Result<Vec<u8>, SessionError> {
        let query: MetadataQuery = wire::from_slice(payload)?;
        self.shared.lock_machine().check(Operation::MetaData)?;

        let size = self.shared.device.required_size(SizeQuery::Metadata)?;
        let mut out = self.shared.reserve(MetadataRecord::HEADER_SIZE + size)?;
        let mut data = self.shared.reserve(size)?;
        data.resize(size, 0);

        let record = self.shared.device.metadata(&query, data)?;
        if record.data.len() != size {
            return Err(SessionError::SizeMismatch {
                query: SizeQuery::Metadata,
                announced: size,
                actual: record.data.len(),
            });
        }

        record.encode(&mut out);
        Ok(out)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!(
                "Session on cport {} dropped without detach, stopping worker",
                self.cport
            );
            self.stop_worker();
        }
    }
}
