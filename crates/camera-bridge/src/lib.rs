//! Camera Protocol Bridge
//!
//! Service wiring around the protocol responder: layered configuration,
//! logging setup and a self-test that walks a session through a full
//! configure/capture/flush cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use camera_device::{CaptureRequest, ImageSize, MetadataQuery, PixelFormat, StreamConfigRequest};
use camera_protocol::wire::{self, ConfigureStreamsRequest, FlushResponse};
use camera_protocol::{
    OperationResponse, OperationType, ResultCode, Session, SessionConfig, SessionState,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "camera-bridge.toml";

/// Environment prefix, e.g. `CAMERA_BRIDGE__SESSION__MAX_PAYLOAD_SIZE`
pub const ENV_PREFIX: &str = "CAMERA_BRIDGE";

/// How long the self-test waits for the worker to change state
const STATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Session error: {0}")]
    Session(#[from] camera_protocol::SessionError),

    #[error("Self-test step {step} failed: {reason}")]
    SelfTest { step: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bus endpoint the protocol is attached to
    pub cport: u16,

    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_level: String,

    /// Emit JSON log lines instead of human readable ones
    pub json_logs: bool,

    pub session: SessionConfig,

    /// Run the self-test after attach
    pub self_test: bool,

    /// Streams configured by the self-test
    pub self_test_streams: Vec<ImageSize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cport: 1,
            log_level: "info".to_string(),
            json_logs: false,
            session: SessionConfig::default(),
            self_test: true,
            self_test_streams: vec![ImageSize::VGA],
        }
    }
}

/// Load configuration: defaults, then the config file, then environment.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, BridgeError> {
    let file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let settings = Config::builder()
        .add_source(Config::try_from(&BridgeConfig::default())?)
        .add_source(File::from(file).required(path.is_some()))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Initialize logging
pub fn init_logging(level: &str, json: bool) -> Result<(), BridgeError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| BridgeError::Logging(e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| BridgeError::Logging(e.to_string()))
}

/// One self-test step
#[derive(Debug, Clone, Serialize)]
pub struct SelfTestStep {
    pub name: &'static str,
    pub result: ResultCode,
    pub payload_len: usize,
}

/// Outcome of [`run_self_test`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelfTestReport {
    pub steps: Vec<SelfTestStep>,
    /// Request id the camera reported as stopped by the flush
    pub flushed_request: Option<u32>,
}

impl SelfTestReport {
    fn record(
        &mut self,
        name: &'static str,
        response: OperationResponse,
    ) -> Result<Vec<u8>, BridgeError> {
        debug!(
            "Self-test {}: {:?}, {} bytes",
            name,
            response.result,
            response.payload.len()
        );
        self.steps.push(SelfTestStep {
            name,
            result: response.result,
            payload_len: response.payload.len(),
        });

        if !response.result.is_success() {
            return Err(BridgeError::SelfTest {
                step: name,
                reason: format!("result {:?}", response.result),
            });
        }
        Ok(response.payload)
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }
}

async fn wait_for_state(
    session: &Session,
    step: &'static str,
    want: SessionState,
) -> Result<(), BridgeError> {
    tokio::time::timeout(STATE_TIMEOUT, async {
        while session.state() != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| BridgeError::SelfTest {
        step,
        reason: format!("session stuck in {:?}, expected {:?}", session.state(), want),
    })
}

/// Drive a freshly attached session through every protocol operation.
///
/// Leaves the session unconfigured. The camera must block in capture until
/// stopped so the flush finds a running capture.
pub async fn run_self_test(
    session: &Session,
    streams: &[ImageSize],
) -> Result<SelfTestReport, BridgeError> {
    info!("Running camera self-test on cport {}", session.cport());
    let mut report = SelfTestReport::default();

    report.record(
        "version",
        session.dispatch(OperationType::ProtocolVersion as u8, &[]),
    )?;
    report.record(
        "capabilities",
        session.dispatch(OperationType::Capabilities as u8, &[]),
    )?;

    let configure = ConfigureStreamsRequest {
        streams: streams
            .iter()
            .map(|size| StreamConfigRequest::new(*size, PixelFormat::YCbCr422))
            .collect(),
    };
    report.record(
        "configure",
        session.dispatch(OperationType::ConfigureStreams as u8, &wire::to_vec(&configure)),
    )?;
    if session.state() != SessionState::Configured {
        return Err(BridgeError::SelfTest {
            step: "configure",
            reason: "camera adjusted the requested streams".to_string(),
        });
    }

    let first_id = session.last_accepted_id() + 1;
    for (step, request_id) in [("capture", first_id), ("capture", first_id + 1)] {
        let request = CaptureRequest {
            request_id,
            stream_mask: 0x01,
            frame_count: 2,
            settings: Vec::new(),
        };
        report.record(
            step,
            session.dispatch(OperationType::Capture as u8, &wire::to_vec(&request)),
        )?;
    }
    wait_for_state(session, "capture", SessionState::Streaming).await?;

    let payload = report.record("flush", session.dispatch(OperationType::Flush as u8, &[]))?;
    let flushed: FlushResponse = wire::from_slice(&payload).map_err(|e| BridgeError::SelfTest {
        step: "flush",
        reason: e.to_string(),
    })?;
    report.flushed_request = Some(flushed.request_id);
    if flushed.request_id != first_id {
        warn!(
            "Flush stopped request {}, expected {}",
            flushed.request_id, first_id
        );
    }
    wait_for_state(session, "flush", SessionState::Configured).await?;

    let query = MetadataQuery {
        request_id: first_id,
        frame_number: 0,
        stream_index: 0,
    };
    report.record(
        "metadata",
        session.dispatch(OperationType::MetaData as u8, &wire::to_vec(&query)),
    )?;

    let unconfigure = ConfigureStreamsRequest { streams: Vec::new() };
    report.record(
        "unconfigure",
        session.dispatch(OperationType::ConfigureStreams as u8, &wire::to_vec(&unconfigure)),
    )?;

    info!("Camera self-test passed ({} steps)", report.steps.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_device::{DeviceError, FaultPoint, SimulatedCamera};
    use std::sync::Arc;

    #[test]
    fn test_config_layering() {
        let defaults = load_config(None).unwrap();
        assert_eq!(defaults, BridgeConfig::default());

        let path = std::env::temp_dir().join(format!("camera-bridge-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "cport = 7\njson_logs = true\n\n[session]\nmax_payload_size = 4096\n",
        )
        .unwrap();

        let from_file = load_config(Some(&path)).unwrap();
        assert_eq!(from_file.cport, 7);
        assert!(from_file.json_logs);
        assert_eq!(from_file.session.max_payload_size, 4096);
        assert_eq!(from_file.session.max_capabilities_size, 256);

        std::env::set_var("CAMERA_BRIDGE__CPORT", "9");
        let from_env = load_config(Some(&path));
        std::env::remove_var("CAMERA_BRIDGE__CPORT");
        std::fs::remove_file(&path).unwrap();

        let from_env = from_env.unwrap();
        assert_eq!(from_env.cport, 9);
        assert_eq!(from_env.session.max_payload_size, 4096);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = load_config(Some(Path::new("/nonexistent/camera-bridge.toml")));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_self_test_on_simulated_camera() {
        let camera = Arc::new(SimulatedCamera::new());
        let session = Session::attach(4, camera.clone(), SessionConfig::default()).unwrap();

        let report = run_self_test(&session, &[ImageSize::VGA]).await.unwrap();
        let names: Vec<_> = report.steps.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "version",
                "capabilities",
                "configure",
                "capture",
                "capture",
                "flush",
                "metadata",
                "unconfigure"
            ]
        );
        assert_eq!(report.flushed_request, Some(1));
        assert_eq!(camera.started_requests(), vec![1]);
        assert_eq!(session.state(), SessionState::Unconfigured);
        assert!(report.to_json().unwrap().contains("\"flushed_request\":1"));

        session.detach().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_self_test_reports_failing_step() {
        let camera = Arc::new(SimulatedCamera::new());
        camera.fail_on(FaultPoint::Capabilities, DeviceError::NotSupported);
        let session = Session::attach(4, camera, SessionConfig::default()).unwrap();

        let err = run_self_test(&session, &[ImageSize::VGA]).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SelfTest {
                step: "capabilities",
                ..
            }
        ));
        session.detach().await;
    }
}
