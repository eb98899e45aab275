//! Single-slot latest-image cell between the capture side and the
//! processing loop.
//!
//! The producer overwrites, the consumer takes the latest or waits.
//! There is no queue: a frame that arrives while the previous one is
//! still being processed simply replaces it, so the loop always works
//! on the freshest image and stale frames are dropped silently.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use image::RgbImage;
use parking_lot::{Condvar, Mutex};

/// One captured frame with its arrival metadata.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: RgbImage,
    /// Monotonically increasing capture counter.
    pub sequence: u64,
    pub timestamp: SystemTime,
}

/// The shared latest-image cell.
pub struct ImageSlot {
    slot: Mutex<Option<CameraFrame>>,
    available: Condvar,
}

impl ImageSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            available: Condvar::new(),
        })
    }

    /// Publish a frame, replacing whatever was there.
    pub fn publish(&self, frame: CameraFrame) {
        *self.slot.lock() = Some(frame);
        self.available.notify_one();
    }

    /// Take the latest frame, waiting up to `timeout` for one to
    /// arrive. Returns `None` on timeout.
    pub fn take(&self, timeout: Duration) -> Option<CameraFrame> {
        let mut guard = self.slot.lock();
        if guard.is_none() {
            self.available.wait_for(&mut guard, timeout);
        }
        guard.take()
    }

    /// Non-blocking variant of [`take`].
    pub fn try_take(&self) -> Option<CameraFrame> {
        self.slot.lock().take()
    }
}
