//! Single-slot, most-recent-wins frame buffer
//!
//! One writer (the capture loop), any number of readers. The slot holds the
//! frame together with the instant it was published, so staleness checks use
//! monotonic time. The critical section is a swap or a cheap clone (frame
//! payloads are `Arc`-backed); no I/O ever happens under the lock.

use super::source::Frame;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared latest-frame slot
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<(Frame, Instant)>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame, overwriting whatever was there. A frame with no
    /// payload is dropped; consumers must never see zero-byte JPEGs.
    pub fn publish(&self, frame: Frame) {
        if frame.is_empty() {
            tracing::warn!("Dropping empty frame");
            return;
        }
        let mut slot = self.lock();
        *slot = Some((frame, Instant::now()));
    }

    /// Most recent publication, if any, with its publish instant.
    /// Non-consuming: every reader sees the same frame until the next publish.
    pub fn latest(&self) -> Option<(Frame, Instant)> {
        self.lock().clone()
    }

    /// Time since the last publish, or `None` if nothing was ever published
    pub fn age(&self) -> Option<Duration> {
        self.lock().as_ref().map(|(_, at)| at.elapsed())
    }

    /// Drop the current frame (used by the refresher)
    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Frame, Instant)>> {
        // A poisoned lock only means a reader panicked mid-clone; the slot
        // itself is still coherent.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
