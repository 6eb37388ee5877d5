//! Timestamp retirement events.
//!
//! The export pipeline registers a completion callback keyed by a
//! timestamp; the device reports retirement through
//! [`RetiredEventQueue::retire`], which fires every dominated callback
//! exactly once. Callback state lives in the closure's captures and is
//! dropped when it fires, or synchronously if registration fails.

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::timestamp::timestamp_cmp;

/// Completion callback invoked once with the retired timestamp.
pub type FenceEventCallback = Box<dyn FnOnce(u32) + Send + 'static>;

/// Registration interface for timestamp retirement callbacks.
///
/// Implementations guarantee at most one invocation per registration,
/// and none after the owner shuts down.
pub trait EventQueue {
    /// Registers `callback` to fire when `timestamp` retires.
    ///
    /// On failure the callback (and everything it captured) is dropped
    /// before this returns.
    fn register_event(&self, timestamp: u32, callback: FenceEventCallback) -> SyncResult<()>;
}

struct PendingEvent {
    timestamp: u32,
    callback: FenceEventCallback,
}

struct QueueState {
    pending: Vec<PendingEvent>,
    last_retired: u32,
    shut_down: bool,
}

/// Ordered queue of pending retirement callbacks.
///
/// Callbacks run outside the queue lock, in timestamp order, so a
/// callback may re-enter the queue or drop the last reference to a
/// fence without deadlocking.
pub struct RetiredEventQueue {
    state: Mutex<QueueState>,
}

impl RetiredEventQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                last_retired: 0,
                shut_down: false,
            }),
        }
    }

    /// Number of callbacks waiting to fire.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Reports that `timestamp` has retired, firing every callback whose
    /// key it dominates, oldest first, each with its own key. A no-op
    /// after [`RetiredEventQueue::shutdown`].
    pub fn retire(&self, timestamp: u32) {
        let mut fired = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            if timestamp_cmp(timestamp, state.last_retired) == std::cmp::Ordering::Greater {
                state.last_retired = timestamp;
            }
            let retained = std::mem::take(&mut state.pending);
            let (fired, pending): (Vec<_>, Vec<_>) = retained.into_iter().partition(|ev| {
                timestamp_cmp(timestamp, ev.timestamp) != std::cmp::Ordering::Less
            });
            state.pending = pending;
            fired
        };
        fired.sort_by(|a, b| timestamp_cmp(a.timestamp, b.timestamp));
        for event in fired {
            (event.callback)(event.timestamp);
        }
    }

    /// Drops all pending callbacks without firing them and refuses new
    /// registrations. Used when the owning device tears down before the
    /// timestamps retire.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.shut_down = true;
            std::mem::take(&mut state.pending)
        };
        if !dropped.is_empty() {
            log::debug!("event queue shutdown dropped {} pending event(s)", dropped.len());
        }
    }
}

impl Default for RetiredEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for RetiredEventQueue {
    fn register_event(&self, timestamp: u32, callback: FenceEventCallback) -> SyncResult<()> {
        let fire_now = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(SyncError::InvalidArgument(
                    "event queue shut down".to_string(),
                ));
            }
            if timestamp_cmp(state.last_retired, timestamp) != std::cmp::Ordering::Less {
                // Already retired; fire outside the lock.
                true
            } else {
                state.pending.push(PendingEvent {
                    timestamp,
                    callback,
                });
                return Ok(());
            }
        };
        debug_assert!(fire_now);
        callback(timestamp);
        Ok(())
    }
}

impl std::fmt::Debug for RetiredEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RetiredEventQueue")
            .field("pending", &state.pending.len())
            .field("last_retired", &state.last_retired)
            .field("shut_down", &state.shut_down)
            .finish()
    }
}
