//! Cross-thread entry points into the frame loop: a closure queue drained at
//! the top of each frame, and an edge-triggered frame request flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type DispatchFn = Box<dyn FnOnce() + Send>;

/// Closures enqueued from any thread, drained on the frame thread before
/// build work starts. Pending closures are discarded on drop; a queue that
/// outlives its tree must not touch it.
#[derive(Default)]
pub struct DispatchQueue {
    pending: Mutex<Vec<DispatchFn>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, f: impl FnOnce() + Send + 'static) {
        self.pending.lock().unwrap().push(Box::new(f));
    }

    /// Takes everything queued so far, in enqueue order. Closures enqueued
    /// while the batch runs land in the next drain.
    pub fn drain(&self) -> Vec<DispatchFn> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}

/// Coalesces frame scheduling. The wake callback fires only on the first
/// request after a take; redundant requests between frames are a single
/// flag swap.
#[derive(Default)]
pub struct FrameRequest {
    requested: AtomicBool,
    wake: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl FrameRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the callback that wakes the event loop.
    pub fn set_wake(&self, wake: Arc<dyn Fn() + Send + Sync>) {
        *self.wake.lock().unwrap() = Some(wake);
    }

    pub fn request(&self) {
        let was_requested = self.requested.swap(true, Ordering::Relaxed);
        if !was_requested {
            let wake = self.wake.lock().unwrap().clone();
            if let Some(wake) = wake {
                wake();
            }
        }
    }

    /// Clears the flag, reporting whether a frame was requested since the
    /// last take.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::Relaxed)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}
