//! Single-slot-per-tag frame mailbox.
//!
//! The transport's callback thread calls `put`, the application thread calls
//! `take`. Each tag holds at most one unread frame; a newer frame replaces the
//! older one instead of queueing behind it. `put` never blocks beyond the
//! slot lock and never fails.
//!
//! Every delivery carries the number of the software trigger that produced
//! it. `take_since` skips frames from earlier triggers, so a frame that lands
//! late after a failed grab is never handed out as the answer to a newer one.
//!
//! The sink is instance-scoped: every `AcquisitionSession` owns its own, so
//! two sessions grabbing at once never see each other's frames.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::frame::{DeviceTag, Frame};

/// Delivery counters, for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: u64,
    pub replaced: u64,
    pub dropped_after_close: u64,
    /// Frames dropped because a newer trigger's frame was already known.
    pub stale: u64,
}

struct Slot {
    trigger: u64,
    frame: Frame,
}

#[derive(Default)]
struct SinkState {
    slots: HashMap<DeviceTag, Slot>,
    closed: bool,
    stats: SinkStats,
}

#[derive(Default)]
pub struct FrameSink {
    state: Mutex<SinkState>,
    ready: Condvar,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere must not stop the callback thread from delivering.
    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the latest frame for `tag`, replacing any unread one.
    ///
    /// `trigger` is the number of the trigger that produced the frame. A frame
    /// older than the unread one already stored is dropped, as are frames
    /// arriving after `close`.
    pub fn put(&self, tag: DeviceTag, trigger: u64, frame: Frame) {
        let mut state = self.lock();
        if state.closed {
            state.stats.dropped_after_close += 1;
            log::trace!("FrameSink: dropped frame for {} after close", tag);
            return;
        }
        if state.slots.get(&tag).is_some_and(|slot| slot.trigger > trigger) {
            state.stats.stale += 1;
            log::trace!("FrameSink: dropped out-of-order frame {} for {}", trigger, tag);
            return;
        }
        if state.slots.insert(tag, Slot { trigger, frame }).is_some() {
            state.stats.replaced += 1;
            log::trace!("FrameSink: replaced unread frame for {}", tag);
        }
        state.stats.delivered += 1;
        drop(state);
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for a frame tagged `tag` and remove it.
    ///
    /// Returns `None` on timeout or when the sink is closed while waiting.
    pub fn take(&self, tag: DeviceTag, timeout: Duration) -> Option<Frame> {
        self.take_since(tag, 0, timeout)
    }

    /// Like `take`, but only accepts a frame produced by trigger `trigger` or
    /// a later one. Older unread frames for `tag` are discarded.
    pub fn take_since(&self, tag: DeviceTag, trigger: u64, timeout: Duration) -> Option<Frame> {
        // An unrepresentable deadline waits for the full timeout each round.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            match state.slots.remove(&tag) {
                Some(slot) if slot.trigger >= trigger => return Some(slot.frame),
                Some(slot) => {
                    state.stats.stale += 1;
                    log::trace!(
                        "FrameSink: skipped frame {} for {}, waiting for {}",
                        slot.trigger,
                        tag,
                        trigger
                    );
                }
                None => {}
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return None;
            }
            let (guard, _timeout) = self
                .ready
                .wait_timeout_while(state, remaining, |s| !s.closed && !s.slots.contains_key(&tag))
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// True when an unread frame is waiting for `tag`.
    pub fn has_pending(&self, tag: DeviceTag) -> bool {
        self.lock().slots.contains_key(&tag)
    }

    /// Drop any unread frame for `tag`.
    pub fn discard(&self, tag: DeviceTag) -> bool {
        self.lock().slots.remove(&tag).is_some()
    }

    /// Tear down: release unread frames and wake any waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.slots.clear();
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> SinkStats {
        self.lock().stats
    }

    /// Handle the transport calls from its frame-ready callback.
    pub fn publisher(self: &Arc<Self>, tag: DeviceTag) -> FramePublisher {
        FramePublisher {
            sink: Arc::downgrade(self),
            tag,
        }
    }
}

/// Callback-side handle bound to one device tag.
///
/// Holds only a weak reference, so a frame delivered after the owning
/// session is gone is discarded instead of keeping the sink alive.
#[derive(Clone)]
pub struct FramePublisher {
    sink: Weak<FrameSink>,
    tag: DeviceTag,
}

impl FramePublisher {
    pub fn tag(&self) -> DeviceTag {
        self.tag
    }

    /// Deliver the frame produced by trigger number `trigger`.
    pub fn publish(&self, trigger: u64, frame: Frame) {
        match self.sink.upgrade() {
            Some(sink) => sink.put(self.tag, trigger, frame),
            None => log::trace!("FramePublisher: sink for {} is gone", self.tag),
        }
    }
}
