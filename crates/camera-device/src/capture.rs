//! Capture and metadata request types

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One host capture request, owned by the capture queue until serviced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Strictly increasing request identifier
    pub request_id: u32,
    /// Bitmask of the streams included in the capture
    pub stream_mask: u8,
    /// Number of frames to capture (never zero)
    pub frame_count: u16,
    /// Opaque per-stream capture settings
    pub settings: Vec<u8>,
}

/// "Capture complete" signal for one in-flight capture.
///
/// Fired by the driver when it finishes on its own, and by the session on
/// flush or teardown. Firing more than once is harmless.
#[derive(Debug, Clone, Default)]
pub struct CaptureCompletion {
    inner: Arc<CompletionInner>,
}

#[derive(Debug, Default)]
struct CompletionInner {
    fired: AtomicBool,
    notify: Notify,
}

impl CaptureCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the capture as ended and wake the waiter
    pub fn complete(&self) {
        if !self.inner.fired.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until [`CaptureCompletion::complete`] has been called.
    ///
    /// Single waiter only: the stored `notify_one` permit covers a completion
    /// that lands between the flag check and the wait.
    pub async fn wait(&self) {
        while !self.is_complete() {
            self.inner.notify.notified().await;
        }
    }
}

/// Host query for one frame's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataQuery {
    /// Capture request the frame belongs to
    pub request_id: u32,
    /// CSI-2 frame number
    pub frame_number: u16,
    /// Stream index within the request
    pub stream_index: u8,
}

/// Metadata block for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub request_id: u32,
    pub frame_number: u16,
    pub stream_index: u8,
    /// Metadata block, sized by the metadata size query
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completion_before_wait() {
        let completion = CaptureCompletion::new();
        completion.complete();
        assert!(completion.is_complete());
        tokio::time::timeout(Duration::from_secs(1), completion.wait())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completion_from_other_thread() {
        let completion = CaptureCompletion::new();
        let remote = completion.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.complete();
            remote.complete();
        });
        tokio::time::timeout(Duration::from_secs(2), completion.wait())
            .await
            .unwrap();
    }
}
