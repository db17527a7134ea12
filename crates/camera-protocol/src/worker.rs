//! Capture worker
//!
//! Single consumer of the capture queue. Drains requests in FIFO order,
//! runs the driver's blocking start call off the async runtime and waits for
//! the per-request "capture complete" signal before taking the next one.

use std::sync::Arc;

use camera_device::{CaptureCompletion, CaptureRequest};
use tracing::{debug, error, info};

use crate::queue::NextCapture;
use crate::session::SessionShared;
use crate::state::SessionState;

pub(crate) struct CaptureWorker {
    shared: Arc<SessionShared>,
}

impl CaptureWorker {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Run until the session requests shutdown
    pub(crate) async fn run(self) {
        info!("Capture worker started");

        loop {
            // dequeue and Streaming are published together so a flush that
            // observes Streaming always finds the in-flight capture.
            // Streaming is only ever entered from Configured.
            let next = {
                let mut machine = self.shared.lock_machine();
                let ready = machine.state() == SessionState::Configured;
                let next = self.shared.queue.take_next(ready);
                if matches!(next, NextCapture::Capture(..)) {
                    machine.transition(SessionState::Streaming);
                }
                next
            };

            match next {
                NextCapture::Shutdown => break,
                NextCapture::Idle => self.shared.queue.wait_for_work().await,
                NextCapture::Capture(request, completion) => {
                    self.service(request, completion).await
                }
            }
        }

        info!("Capture worker stopped");
    }

    async fn service(&self, request: CaptureRequest, completion: CaptureCompletion) {
        let request_id = request.request_id;

        if completion.is_complete() {
            debug!("Capture {} flushed before reaching the camera", request_id);
            metrics::counter!("camera.capture.discarded").increment(1);
        } else {
            debug!(
                "Starting capture {}: streams={:#04x}, frames={}",
                request_id, request.stream_mask, request.frame_count
            );

            let device = Arc::clone(&self.shared.device);
            let driver_completion = completion.clone();
            let result = tokio::task::spawn_blocking(move || {
                device.start_capture(&request, driver_completion)
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    metrics::counter!("camera.capture.serviced").increment(1);
                }
                Ok(Err(err)) => {
                    error!("Capture {} failed: {}", request_id, err);
                    completion.complete();
                }
                Err(err) => {
                    error!("Capture {} task failed: {}", request_id, err);
                    completion.complete();
                }
            }

            completion.wait().await;
            debug!("Capture {} complete", request_id);
        }

        let flushed = {
            let mut machine = self.shared.lock_machine();
            if machine.state() == SessionState::Streaming {
                machine.transition(SessionState::Configured);
            }
            self.shared.queue.finish_in_flight()
        };

        if flushed {
            debug!("Capture {} ended by flush", request_id);
        }
    }
}
