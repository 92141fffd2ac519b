//! Shared work queue for the scheduler's workers.

use crate::core::ArcSensor;

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<ArcSensor>,
    /// Sensors parked in a deferred re-check task.
    pending_rechecks: usize,
    /// Sensors popped by a worker and not yet settled.
    in_flight: usize,
}

/// An unbounded FIFO of sensors plus the bookkeeping needed to tell a
/// momentarily empty queue from a finished run.
///
/// Every counter change and every check-then-act decision happens under
/// one short-lived lock that is never held across an `.await`.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a sensor. Never blocks.
    pub(crate) fn put(&self, sensor: ArcSensor) {
        self.state.lock().items.push_back(sensor);
        self.notify.notify_waiters();
    }

    /// Pops a sensor if one is available. The sensor counts as in flight
    /// until it is settled with `finish`, `defer` or `requeue`.
    pub(crate) fn try_get(&self) -> Option<ArcSensor> {
        let mut state = self.state.lock();
        let sensor = state.items.pop_front()?;
        state.in_flight += 1;
        Some(sensor)
    }

    /// Settles an in-flight sensor that needs no further work.
    pub(crate) fn finish(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_drained()
        };
        if drained {
            self.notify.notify_waiters();
        }
    }

    /// Moves an in-flight sensor to the pending re-check set.
    pub(crate) fn defer(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.pending_rechecks += 1;
    }

    /// Lands a deferred re-check back in the queue.
    pub(crate) fn land(&self, sensor: ArcSensor) {
        {
            let mut state = self.state.lock();
            state.items.push_back(sensor);
            state.pending_rechecks = state.pending_rechecks.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Drops a deferred re-check without touching the queue.
    pub(crate) fn cancel_deferred(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.pending_rechecks = state.pending_rechecks.saturating_sub(1);
            state.is_drained()
        };
        if drained {
            self.notify.notify_waiters();
        }
    }

    /// Puts an in-flight sensor back in the queue.
    pub(crate) fn requeue(&self, sensor: ArcSensor) {
        {
            let mut state = self.state.lock();
            state.items.push_back(sensor);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Returns `true` when nothing is queued, parked or in flight.
    pub(crate) fn is_drained(&self) -> bool {
        self.state.lock().is_drained()
    }

    /// Returns a future resolved by the next state change.
    ///
    /// Create it before inspecting the queue so no wake-up is missed.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn pending_rechecks(&self) -> usize {
        self.state.lock().pending_rechecks
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.items.is_empty() && self.pending_rechecks == 0 && self.in_flight == 0
    }
}
