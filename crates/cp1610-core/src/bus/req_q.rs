//! Timed interrupt and bus-grant requests toward the CPU.
//!
//! Requesters (typically the display controller) queue requests ahead of
//! the CPU's clock whenever they get to run. The horizon tells the CPU how
//! far it may run before it could outrun what has been queued.

use std::collections::VecDeque;

use crate::fault::RequestError;

/// Number of entries the queue can hold.
pub const REQ_Q_DEPTH: usize = 32;

/// Number of settled requests kept for inspection. Older ones are only
/// counted.
pub const REQ_Q_HISTORY: usize = REQ_Q_DEPTH;

/// What a request asks of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RequestKind {
    /// Interrupt request (INTRM).
    Interrupt,
    /// Bus request (BUSRQ): the CPU idles for the whole span.
    BusGrant,
}

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RequestState {
    /// Slot never filled.
    #[default]
    Inactive,
    /// Waiting for the CPU.
    Pending,
    /// Acknowledged on an instruction boundary.
    Acked,
    /// Expired before the CPU could take it.
    Dropped,
}

/// One request with its active span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusRequest {
    /// Request kind.
    pub kind: RequestKind,
    /// First cycle of the request.
    pub start: u64,
    /// First cycle after the request.
    pub end: u64,
    /// Cycle at which the CPU acknowledged or dropped it.
    pub ack_cycle: u64,
    /// Current state.
    pub state: RequestState,
}

impl BusRequest {
    /// Builds a pending request.
    #[must_use]
    pub const fn new(kind: RequestKind, start: u64, end: u64) -> Self {
        Self {
            kind,
            start,
            end,
            ack_cycle: 0,
            state: RequestState::Pending,
        }
    }

    /// Whether `now` lies inside the request span.
    #[must_use]
    pub const fn covers(&self, now: u64) -> bool {
        self.start <= now && now < self.end
    }
}

/// Fixed-depth FIFO of requests, monotonic in start time.
#[derive(Debug, Clone)]
pub struct ReqQueue {
    entries: Vec<Option<BusRequest>>,
    rd: usize,
    len: usize,
    horizon: u64,
    history: VecDeque<BusRequest>,
    acked: u64,
    dropped: u64,
}

impl Default for ReqQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqQueue {
    /// Creates an empty queue with an unbounded horizon.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![None; REQ_Q_DEPTH],
            rd: 0,
            len: 0,
            horizon: u64::MAX,
            history: VecDeque::with_capacity(REQ_Q_HISTORY),
            acked: 0,
            dropped: 0,
        }
    }

    /// Number of queued requests.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no requests are queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Furthest cycle the CPU may safely run to.
    #[must_use]
    pub const fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Sets the horizon. Requesters call this after queueing.
    pub const fn set_horizon(&mut self, horizon: u64) {
        self.horizon = horizon;
    }

    /// Appends a request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::QueueFull`] when all slots are taken,
    /// [`RequestError::OutOfOrder`] when `start` precedes the newest queued
    /// request, and [`RequestError::EmptySpan`] when `end <= start`.
    pub fn push(&mut self, kind: RequestKind, start: u64, end: u64) -> Result<(), RequestError> {
        if end <= start {
            return Err(RequestError::EmptySpan { start, end });
        }
        if self.len == REQ_Q_DEPTH {
            return Err(RequestError::QueueFull);
        }
        if let Some(last) = self.back() {
            if start < last.start {
                return Err(RequestError::OutOfOrder {
                    start,
                    last: last.start,
                });
            }
        }
        let wr = (self.rd + self.len) % REQ_Q_DEPTH;
        self.entries[wr] = Some(BusRequest::new(kind, start, end));
        self.len += 1;
        Ok(())
    }

    /// The current request, if any.
    #[must_use]
    pub fn front(&self) -> Option<&BusRequest> {
        if self.is_empty() {
            return None;
        }
        self.entries[self.rd].as_ref()
    }

    fn back(&self) -> Option<&BusRequest> {
        if self.is_empty() {
            return None;
        }
        self.entries[(self.rd + self.len - 1) % REQ_Q_DEPTH].as_ref()
    }

    /// Marks the front request acknowledged at `cycle`.
    pub fn ack(&mut self, cycle: u64) {
        self.settle_front(cycle, RequestState::Acked);
    }

    /// Marks the front request dropped at `cycle`.
    pub fn drop_front(&mut self, cycle: u64) {
        self.settle_front(cycle, RequestState::Dropped);
    }

    fn settle_front(&mut self, cycle: u64, state: RequestState) {
        if self.is_empty() {
            return;
        }
        if let Some(req) = self.entries[self.rd].as_mut() {
            req.ack_cycle = cycle;
            req.state = state;
        }
    }

    /// Removes the front request, counting it and keeping it in the
    /// settled history.
    pub fn pop(&mut self) -> Option<BusRequest> {
        if self.is_empty() {
            return None;
        }
        let req = self.entries[self.rd].take();
        self.rd = (self.rd + 1) % REQ_Q_DEPTH;
        self.len -= 1;
        if let Some(req) = req {
            self.settle(req);
        }
        req
    }

    /// Empties the queue and restores the unbounded horizon.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|slot| *slot = None);
        self.rd = 0;
        self.len = 0;
        self.horizon = u64::MAX;
    }

    fn settle(&mut self, req: BusRequest) {
        match req.state {
            RequestState::Acked => self.acked += 1,
            RequestState::Dropped => self.dropped += 1,
            RequestState::Inactive | RequestState::Pending => {}
        }
        if self.history.len() == REQ_Q_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(req);
    }

    /// The last [`REQ_Q_HISTORY`] popped requests, oldest first.
    #[must_use]
    pub const fn history(&self) -> &VecDeque<BusRequest> {
        &self.history
    }

    /// Drains the retained history.
    pub fn take_history(&mut self) -> Vec<BusRequest> {
        self.history.drain(..).collect()
    }

    /// Number of popped requests that were acknowledged.
    #[must_use]
    pub const fn acked_count(&self) -> u64 {
        self.acked
    }

    /// Number of popped requests that were dropped.
    #[must_use]
    pub const fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
