//! Timelines and wait points.
//!
//! A [`Timeline`] tracks the last retired timestamp for one execution
//! context. A [`WaitPoint`] represents "timestamp T has retired on this
//! timeline"; its signaled state is always derived from the timeline's
//! current value, never cached, so re-querying it only observes.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};
use crate::timestamp::timestamp_cmp;

/// Owner of a monotonically advancing retirement counter.
///
/// The counter only moves forward under the wraparound comparator: an
/// attempt to advance to an older timestamp is ignored. Advancing wakes
/// every observer blocked on a wait point bound to this timeline.
pub struct Timeline {
    label: String,
    last_retired: Mutex<u32>,
    retired: Condvar,
    live_wait_points: AtomicUsize,
    wait_point_limit: Option<usize>,
}

impl Timeline {
    /// Creates a timeline with `last_retired = 0` and no wait-point limit.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            last_retired: Mutex::new(0),
            retired: Condvar::new(),
            live_wait_points: AtomicUsize::new(0),
            wait_point_limit: None,
        })
    }

    /// Creates a timeline that refuses to create more than `limit` live
    /// wait points at a time.
    pub fn with_wait_point_limit(label: impl Into<String>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            last_retired: Mutex::new(0),
            retired: Condvar::new(),
            live_wait_points: AtomicUsize::new(0),
            wait_point_limit: Some(limit),
        })
    }

    /// Diagnostic name of this timeline.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The most recently retired timestamp.
    pub fn last_retired(&self) -> u32 {
        *self.last_retired.lock()
    }

    /// Number of wait points currently bound to this timeline.
    pub fn live_wait_points(&self) -> usize {
        self.live_wait_points.load(AtomicOrdering::Acquire)
    }

    /// Creates a wait point for `target` on this timeline.
    ///
    /// Fails with [`SyncError::OutOfMemory`] when the timeline's
    /// wait-point budget is exhausted.
    pub fn wait_point(self: &Arc<Self>, target: u32) -> SyncResult<WaitPoint> {
        self.acquire_slot()?;
        Ok(WaitPoint {
            timeline: Arc::clone(self),
            target,
        })
    }

    /// Records that `timestamp` has retired and wakes blocked observers.
    ///
    /// A timestamp that is not strictly newer than the current value
    /// under the wraparound comparator leaves the timeline unchanged:
    /// re-advancing to the same value is a no-op, and a regression is
    /// ignored and logged, since it would transiently un-signal wait
    /// points that already reported completion.
    pub fn advance(&self, timestamp: u32) {
        let mut last = self.last_retired.lock();
        match timestamp_cmp(timestamp, *last) {
            Ordering::Greater => {
                *last = timestamp;
                drop(last);
                log::debug!(
                    "timeline {}: retired {}, {} wait point(s) live",
                    self.label,
                    timestamp,
                    self.live_wait_points()
                );
                self.retired.notify_all();
            }
            Ordering::Equal => {}
            Ordering::Less => {
                log::warn!(
                    "timeline {}: ignoring out-of-order advance to {} (last retired {})",
                    self.label,
                    timestamp,
                    *last
                );
            }
        }
    }

    fn acquire_slot(&self) -> SyncResult<()> {
        match self.wait_point_limit {
            None => {
                self.live_wait_points.fetch_add(1, AtomicOrdering::AcqRel);
                Ok(())
            }
            Some(limit) => {
                let mut live = self.live_wait_points.load(AtomicOrdering::Acquire);
                loop {
                    if live >= limit {
                        log::error!(
                            "timeline {}: wait point budget exhausted ({} live)",
                            self.label,
                            live
                        );
                        return Err(SyncError::OutOfMemory);
                    }
                    match self.live_wait_points.compare_exchange_weak(
                        live,
                        live + 1,
                        AtomicOrdering::AcqRel,
                        AtomicOrdering::Acquire,
                    ) {
                        Ok(_) => return Ok(()),
                        Err(current) => live = current,
                    }
                }
            }
        }
    }

    fn release_slot(&self) {
        self.live_wait_points.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("label", &self.label)
            .field("last_retired", &self.last_retired())
            .field("live_wait_points", &self.live_wait_points())
            .finish()
    }
}

/// A single-use synchronization point bound to a timeline.
///
/// Signals once the timeline's retirement counter reaches or passes the
/// target timestamp, and stays signaled from then on. Dropping a wait
/// point releases its slot on the timeline; wrapping it into an
/// exported fence consumes it, so a wrapped point can never also be
/// dropped by its creator.
pub struct WaitPoint {
    timeline: Arc<Timeline>,
    target: u32,
}

impl WaitPoint {
    /// The timestamp this wait point is waiting for.
    pub fn target(&self) -> u32 {
        self.target
    }

    /// The timeline this wait point observes.
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Whether the target timestamp has retired.
    pub fn has_signaled(&self) -> bool {
        timestamp_cmp(self.timeline.last_retired(), self.target) != Ordering::Less
    }

    /// Creates an independent wait point for the same timeline and
    /// target. Subject to the same budget as creation.
    pub fn duplicate(&self) -> SyncResult<WaitPoint> {
        self.timeline.wait_point(self.target)
    }

    /// Orders this wait point against a peer on the same timeline by
    /// target timestamp, under the wraparound comparator.
    pub fn compare(&self, other: &WaitPoint) -> Ordering {
        timestamp_cmp(self.target, other.target)
    }

    /// Blocks until the target timestamp retires or `timeout` elapses.
    ///
    /// Returns whether the wait point signaled before the deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut last = self.timeline.last_retired.lock();
        loop {
            if timestamp_cmp(*last, self.target) != Ordering::Less {
                return true;
            }
            if self
                .timeline
                .retired
                .wait_until(&mut last, deadline)
                .timed_out()
            {
                return timestamp_cmp(*last, self.target) != Ordering::Less;
            }
        }
    }
}

impl Drop for WaitPoint {
    fn drop(&mut self) {
        self.timeline.release_slot();
    }
}

impl std::fmt::Debug for WaitPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitPoint")
            .field("timeline", &self.timeline.label)
            .field("target", &self.target)
            .field("signaled", &self.has_signaled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unsignaled() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();
        assert_eq!(timeline.last_retired(), 0);
        assert!(!wp.has_signaled());
    }

    #[test]
    fn signals_when_target_retires() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();

        timeline.advance(4);
        assert!(!wp.has_signaled());

        timeline.advance(5);
        assert!(wp.has_signaled());

        // Stays signaled as the timeline moves on.
        timeline.advance(9);
        assert!(wp.has_signaled());
    }

    #[test]
    fn signals_past_target() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();
        timeline.advance(8);
        assert!(wp.has_signaled());
    }

    #[test]
    fn advance_is_idempotent() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();
        timeline.advance(5);
        timeline.advance(5);
        assert_eq!(timeline.last_retired(), 5);
        assert!(wp.has_signaled());
    }

    #[test]
    fn advance_ignores_regression() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();
        timeline.advance(7);
        timeline.advance(3);
        assert_eq!(timeline.last_retired(), 7);
        assert!(wp.has_signaled());
    }

    #[test]
    fn signals_across_wraparound() {
        let timeline = Timeline::new("test");
        // Reach the top of the counter in half-range steps.
        timeline.advance(0x7FFF_FFFF);
        timeline.advance(u32::MAX - 1);
        assert_eq!(timeline.last_retired(), u32::MAX - 1);

        let wp = timeline.wait_point(2).unwrap();
        assert!(!wp.has_signaled());

        // Wrapping from MAX-1 to 2 is still a forward advance.
        timeline.advance(2);
        assert_eq!(timeline.last_retired(), 2);
        assert!(wp.has_signaled());
    }

    #[test]
    fn duplicate_tracks_the_same_target() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();
        let dup = wp.duplicate().unwrap();
        assert_eq!(timeline.live_wait_points(), 2);

        timeline.advance(4);
        assert!(!wp.has_signaled());
        assert!(!dup.has_signaled());

        timeline.advance(5);
        assert!(wp.has_signaled());
        assert!(dup.has_signaled());

        // Independently destroyable.
        drop(wp);
        assert_eq!(timeline.live_wait_points(), 1);
        assert!(dup.has_signaled());
    }

    #[test]
    fn peer_comparison_uses_wraparound_order() {
        let timeline = Timeline::new("test");
        let early = timeline.wait_point(u32::MAX - 1).unwrap();
        let late = timeline.wait_point(2).unwrap();
        assert_eq!(early.compare(&late), Ordering::Less);
        assert_eq!(late.compare(&early), Ordering::Greater);
        assert_eq!(early.compare(&early), Ordering::Equal);
    }

    #[test]
    fn wait_point_budget() {
        let timeline = Timeline::with_wait_point_limit("bounded", 2);
        let a = timeline.wait_point(1).unwrap();
        let _b = timeline.wait_point(2).unwrap();
        assert_eq!(timeline.wait_point(3).unwrap_err(), SyncError::OutOfMemory);
        assert_eq!(a.duplicate().unwrap_err(), SyncError::OutOfMemory);

        // Releasing a slot makes room again.
        drop(a);
        assert!(timeline.wait_point(3).is_ok());
    }

    #[test]
    fn live_count_balances() {
        let timeline = Timeline::new("test");
        {
            let _a = timeline.wait_point(1).unwrap();
            let _b = timeline.wait_point(2).unwrap();
            assert_eq!(timeline.live_wait_points(), 2);
        }
        assert_eq!(timeline.live_wait_points(), 0);
    }

    #[test]
    fn wait_timeout_returns_immediately_when_signaled() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(3).unwrap();
        timeline.advance(3);
        assert!(wp.wait_timeout(Duration::from_millis(0)));
    }

    #[test]
    fn wait_timeout_expires_when_unsignaled() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(3).unwrap();
        assert!(!wp.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn advance_wakes_blocked_waiter() {
        let timeline = Timeline::new("test");
        let wp = timeline.wait_point(5).unwrap();
        let signaler = Arc::clone(&timeline);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaler.advance(5);
        });

        assert!(wp.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
