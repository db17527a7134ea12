//! Capture request queue shared by protocol handlers and the capture worker

use std::collections::{TryReserveError, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camera_device::{CaptureCompletion, CaptureRequest};
use tokio::sync::Notify;

/// Capture currently handed to the driver
#[derive(Debug, Clone)]
pub struct InFlight {
    pub request_id: u32,
    pub completion: CaptureCompletion,
}

/// What the worker should do next
#[derive(Debug)]
pub enum NextCapture {
    /// Service this request; it is now in flight
    Capture(CaptureRequest, CaptureCompletion),
    /// Nothing queued
    Idle,
    /// Session is detaching
    Shutdown,
}

/// Result of a flush on the queue side
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// Pending requests removed without reaching the driver
    pub discarded: Vec<CaptureRequest>,
    /// Capture in flight at the time of the flush
    pub in_flight: Option<InFlight>,
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<CaptureRequest>,
    in_flight: Option<InFlight>,
    flush_requested: bool,
    stop_requested: bool,
}

/// FIFO of pending captures plus the "work available" signal.
///
/// Empty-check and link/unlink always happen under the same lock.
#[derive(Debug, Default)]
pub struct CaptureQueue {
    inner: Mutex<QueueInner>,
    work: Notify,
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a request, waking the worker on the empty to non-empty edge.
    ///
    /// A request arriving after a flush returned belongs to the host's next
    /// sequence and clears the flush marker.
    pub fn enqueue(&self, request: CaptureRequest) -> Result<(), TryReserveError> {
        let mut inner = self.lock();
        inner.pending.try_reserve(1)?;
        let was_empty = inner.pending.is_empty();
        inner.pending.push_back(request);
        inner.flush_requested = false;
        drop(inner);

        if was_empty {
            self.work.notify_one();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush_requested(&self) -> bool {
        self.lock().flush_requested
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.lock().in_flight.clone()
    }

    /// Dequeue the oldest request and publish it as in flight.
    ///
    /// `ready` is false while the session cannot start a capture; pending
    /// requests then stay queued.
    pub fn take_next(&self, ready: bool) -> NextCapture {
        let mut inner = self.lock();
        if inner.stop_requested {
            return NextCapture::Shutdown;
        }
        if !ready {
            return NextCapture::Idle;
        }
        match inner.pending.pop_front() {
            Some(request) => {
                let completion = CaptureCompletion::new();
                inner.in_flight = Some(InFlight {
                    request_id: request.request_id,
                    completion: completion.clone(),
                });
                NextCapture::Capture(request, completion)
            }
            None => NextCapture::Idle,
        }
    }

    /// Wait for the "work available" signal
    pub async fn wait_for_work(&self) {
        self.work.notified().await;
    }

    /// Clear the in-flight slot. Returns whether a flush cut the queue
    /// behind it, consuming the marker.
    pub fn finish_in_flight(&self) -> bool {
        let mut inner = self.lock();
        inner.in_flight = None;
        std::mem::take(&mut inner.flush_requested)
    }

    /// Remove every pending request without touching the in-flight one
    pub fn discard_pending(&self) -> Vec<CaptureRequest> {
        self.lock().pending.drain(..).collect()
    }

    /// Discard every pending request.
    ///
    /// Raises `flush_requested` when something was pending. The drain is
    /// complete when this returns, so the marker never discards requests
    /// queued afterwards.
    pub fn flush(&self) -> FlushOutcome {
        let mut inner = self.lock();
        if !inner.pending.is_empty() {
            inner.flush_requested = true;
        }
        FlushOutcome {
            discarded: inner.pending.drain(..).collect(),
            in_flight: inner.in_flight.clone(),
        }
    }

    /// Ask the worker to exit and wake it wherever it waits
    pub fn request_stop(&self) -> Vec<CaptureRequest> {
        let mut inner = self.lock();
        inner.stop_requested = true;
        let discarded = inner.pending.drain(..).collect();
        if let Some(in_flight) = &inner.in_flight {
            in_flight.completion.complete();
        }
        drop(inner);

        self.work.notify_one();
        discarded
    }
}
