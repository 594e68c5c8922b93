//! Single-slot frame hand-off between the receive worker and the renderer
//!
//! The receive worker pushes every decoded frame; the presentation loop
//! samples whatever is newest. The slot never queues, so a slow renderer
//! skips frames instead of falling behind:
//!
//! ```text
//! worker:   push(f1) push(f2) push(f3)            push(f4)
//! slot:     [f1]     [f2]     [f3]                [f4]
//! renderer:                         pull() -> f3            pull() -> f4
//! ```
//!
//! The lock guards only the `Arc` swap. Rendering happens on the caller's
//! clone, and the new-frame listener runs after the lock is released.

use crate::error::{MirrorError, Result};
use crate::frame::Frame;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Callback fired after each push, on the pushing thread
pub type FrameListener = Box<dyn Fn(&Arc<Frame>) + Send + Sync>;

/// Lifecycle of a [`StreamState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Created, not started yet
    Idle = 0,
    /// Started and not stopped
    Running = 1,
    /// Stopped; terminal
    Stopped = 2,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Arc<Frame>>,
    fresh: bool,
}

/// Latest decoded frame plus the stream's running flag
pub struct StreamState {
    slot: Mutex<Slot>,
    lifecycle: AtomicU8,
    frames_pushed: AtomicU64,
    listener: Option<FrameListener>,
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("lifecycle", &self.lifecycle())
            .field("frames_pushed", &self.frames_pushed())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    /// Create an idle state with an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            lifecycle: AtomicU8::new(Lifecycle::Idle as u8),
            frames_pushed: AtomicU64::new(0),
            listener: None,
        }
    }

    /// Register a callback invoked after every push
    ///
    /// The callback runs on the receive worker thread, outside the slot lock,
    /// so it may call [`pull`](Self::pull) without deadlocking.
    #[must_use]
    pub fn with_listener(mut self, listener: impl Fn(&Arc<Frame>) + Send + Sync + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        // Poison is harmless here: every mutation is a plain field assignment.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the retained frame
    pub fn push(&self, frame: Frame) {
        let frame = Arc::new(frame);
        {
            let mut slot = self.lock_slot();
            slot.frame = Some(Arc::clone(&frame));
            slot.fresh = true;
        }
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);

        if let Some(listener) = &self.listener {
            listener(&frame);
        }
    }

    /// Newest frame, if any; never waits
    #[must_use]
    pub fn pull(&self) -> Option<Arc<Frame>> {
        self.lock_slot().frame.clone()
    }

    /// Newest frame only if it was pushed since the last call
    #[must_use]
    pub fn pull_if_new(&self) -> Option<Arc<Frame>> {
        let mut slot = self.lock_slot();
        if slot.fresh {
            slot.fresh = false;
            slot.frame.clone()
        } else {
            None
        }
    }

    /// Mark the stream running
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::StreamAlreadyStarted`] if running, or
    /// [`MirrorError::StreamStopped`] once stopped: a state is started at most
    /// once.
    pub fn start(&self) -> Result<()> {
        match self.lifecycle.compare_exchange(
            Lifecycle::Idle as u8,
            Lifecycle::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                debug!("Stream state running");
                Ok(())
            }
            Err(current) => match Lifecycle::from_u8(current) {
                Lifecycle::Running => Err(MirrorError::StreamAlreadyStarted),
                _ => Err(MirrorError::StreamStopped),
            },
        }
    }

    /// Mark the stream stopped
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// transition.
    pub fn stop(&self) -> bool {
        let previous = Lifecycle::from_u8(
            self.lifecycle
                .swap(Lifecycle::Stopped as u8, Ordering::SeqCst),
        );
        if previous == Lifecycle::Stopped {
            false
        } else {
            info!(
                "Stream state stopped after {} frames",
                self.frames_pushed()
            );
            true
        }
    }

    /// Whether the stream is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Current lifecycle stage
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    /// Total number of pushes so far
    #[must_use]
    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn frame(sequence: u64) -> Frame {
        Frame::new(2, 1, vec![0; 8], sequence)
    }

    #[test]
    fn test_latest_frame_wins() {
        let state = StreamState::new();
        assert!(state.pull().is_none());

        state.push(frame(1));
        state.push(frame(2));
        state.push(frame(3));

        assert_eq!(state.pull().unwrap().sequence, 3);
        // pull() does not consume
        assert_eq!(state.pull().unwrap().sequence, 3);
        assert_eq!(state.frames_pushed(), 3);
    }

    #[test]
    fn test_pull_if_new_returns_each_push_once() {
        let state = StreamState::new();
        assert!(state.pull_if_new().is_none());

        state.push(frame(1));
        state.push(frame(2));
        assert_eq!(state.pull_if_new().unwrap().sequence, 2);
        assert!(state.pull_if_new().is_none());

        // Still visible to the non-consuming pull
        assert_eq!(state.pull().unwrap().sequence, 2);

        state.push(frame(3));
        assert_eq!(state.pull_if_new().unwrap().sequence, 3);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let state = StreamState::new();
        assert_eq!(state.lifecycle(), Lifecycle::Idle);
        assert!(!state.is_running());

        state.start().unwrap();
        assert!(state.is_running());
        assert!(matches!(state.start(), Err(MirrorError::StreamAlreadyStarted)));

        assert!(state.stop());
        assert!(!state.stop());
        assert!(!state.is_running());
        assert_eq!(state.lifecycle(), Lifecycle::Stopped);

        // No restart
        assert!(matches!(state.start(), Err(MirrorError::StreamStopped)));
    }

    #[test]
    fn test_stop_before_start_is_terminal() {
        let state = StreamState::new();
        assert!(state.stop());
        assert!(state.start().is_err());
    }

    #[test]
    fn test_listener_runs_outside_lock() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let state = Arc::new_cyclic(|weak: &std::sync::Weak<StreamState>| {
            let weak = weak.clone();
            StreamState::new().with_listener(move |pushed| {
                // Re-entering the state from the listener must not deadlock
                if let Some(state) = weak.upgrade() {
                    assert_eq!(state.pull().unwrap().sequence, pushed.sequence);
                }
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
        });

        state.push(frame(7));
        state.push(frame(8));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
