//! Per-subscriber bounded queue.
//!
//! Pushing never waits. When the queue is full its contents are replaced by a
//! single full snapshot of the version being published. Versions leave the
//! queue strictly increasing: anything not newer than the last enqueued
//! version is dropped.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;

use crate::message::LiveMessage;

pub(crate) struct Outbox {
    state: Mutex<OutboxState>,
    notify: Notify,
    depth: usize,
}

#[derive(Default)]
struct OutboxState {
    queue: VecDeque<LiveMessage>,
    evicted: bool,
    /// `None` until something has been enqueued; version 0 is a real view.
    last_enqueued: Option<u64>,
    last_delivered: u64,
    acked: Option<u64>,
    /// Set while something enqueued is still unacknowledged.
    awaiting_ack_since: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    Collapsed,
    /// Already covered by something enqueued earlier.
    Superseded,
    Closed,
}

enum Take {
    Message(LiveMessage),
    Evicted,
    Empty,
}

impl Outbox {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            state: Mutex::new(OutboxState::default()),
            notify: Notify::new(),
            depth: depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `message`, or collapse the queue into `catch_up()` when full.
    pub(crate) fn push(
        &self,
        message: LiveMessage,
        catch_up: impl FnOnce() -> LiveMessage,
        now: Instant,
    ) -> Push {
        let outcome = {
            let mut state = self.lock();
            if state.evicted {
                return Push::Closed;
            }
            if state.last_enqueued.is_some_and(|last| message.version() <= last) {
                return Push::Superseded;
            }

            let outcome = if state.queue.len() >= self.depth {
                state.queue.clear();
                let full = catch_up();
                state.last_enqueued = Some(full.version());
                state.queue.push_back(full);
                Push::Collapsed
            } else {
                state.last_enqueued = Some(message.version());
                state.queue.push_back(message);
                Push::Queued
            };
            if state.awaiting_ack_since.is_none() {
                state.awaiting_ack_since = Some(now);
            }
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    pub(crate) fn ack(&self, version: u64, now: Instant) {
        let mut state = self.lock();
        if state.acked.is_some_and(|acked| version <= acked) {
            return;
        }
        state.acked = Some(version);
        state.awaiting_ack_since = if state.last_enqueued.map_or(true, |last| version >= last) {
            None
        } else {
            Some(now)
        };
    }

    pub(crate) fn awaiting_ack_since(&self) -> Option<Instant> {
        self.lock().awaiting_ack_since
    }

    pub(crate) fn last_delivered(&self) -> u64 {
        self.lock().last_delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Drop everything queued; the receiver observes eviction next.
    pub(crate) fn evict(&self) {
        {
            let mut state = self.lock();
            state.evicted = true;
            state.queue.clear();
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Take {
        let mut state = self.lock();
        if state.evicted {
            return Take::Evicted;
        }
        match state.queue.pop_front() {
            Some(message) => {
                state.last_delivered = message.version();
                Take::Message(message)
            }
            None => Take::Empty,
        }
    }

    /// Next message, waiting if the queue is empty. `None` once evicted.
    pub(crate) async fn recv(&self) -> Option<LiveMessage> {
        loop {
            match self.take() {
                Take::Message(message) => return Some(message),
                Take::Evicted => return None,
                Take::Empty => self.notify.notified().await,
            }
        }
    }

    /// Next message without waiting.
    pub(crate) fn try_recv(&self) -> Option<LiveMessage> {
        match self.take() {
            Take::Message(message) => Some(message),
            Take::Evicted | Take::Empty => None,
        }
    }
}
