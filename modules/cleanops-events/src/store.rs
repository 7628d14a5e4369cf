//! Append-only run event log.
//!
//! Append is the single serialization point: validation, sequence assignment,
//! and the journal write all happen under one async gate, so journal order
//! equals sequence order. The in-memory index changes only after the journal
//! row is committed. Readers take the index lock only long enough to copy a
//! batch of `Arc`s out.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cleanops_common::lifecycle::{self, RunLifecycle};
use cleanops_common::RunEvent;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::journal::SqlJournal;
use crate::types::{StoreError, StoredEvent};

/// Events handed out per lock acquisition by [`EventCursor`].
const CURSOR_BATCH: usize = 256;

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Append-only run event log. The durable source of truth when a journal is
/// attached; everything downstream can be rebuilt by replaying it.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<LogState>,
    journal: Option<SqlJournal>,
    /// Held across validation, the journal write, and the index insert.
    append_gate: Mutex<()>,
    latest: watch::Sender<u64>,
}

#[derive(Default)]
struct LogState {
    /// `events[i].seq == i + 1`.
    events: Vec<Arc<StoredEvent>>,
    by_pipeline: HashMap<String, Vec<u64>>,
    runs: HashMap<String, RunEntry>,
}

struct RunEntry {
    lifecycle: RunLifecycle,
    seqs: Vec<u64>,
}

impl LogState {
    fn check(&self, event: &RunEvent) -> Result<RunLifecycle, StoreError> {
        let prior = self.runs.get(&event.run_id).map(|r| &r.lifecycle);
        let next = lifecycle::transition(prior, event)?;
        Ok(RunLifecycle::after(event, next))
    }

    fn next_seq(&self) -> u64 {
        self.events.len() as u64 + 1
    }

    fn insert(&mut self, event: RunEvent, lifecycle: RunLifecycle) -> Arc<StoredEvent> {
        let seq = self.next_seq();
        self.by_pipeline
            .entry(event.pipeline_id.clone())
            .or_default()
            .push(seq);
        let entry = self
            .runs
            .entry(event.run_id.clone())
            .or_insert_with(|| RunEntry {
                lifecycle: lifecycle.clone(),
                seqs: Vec::new(),
            });
        entry.lifecycle = lifecycle;
        entry.seqs.push(seq);

        let stored = Arc::new(StoredEvent { seq, event });
        self.events.push(stored.clone());
        stored
    }

    fn get(&self, seq: u64) -> Option<&Arc<StoredEvent>> {
        let idx = usize::try_from(seq.checked_sub(1)?).ok()?;
        self.events.get(idx)
    }

    fn batch_after(&self, pipeline_id: Option<&str>, after: u64, limit: usize) -> Vec<Arc<StoredEvent>> {
        match pipeline_id {
            None => {
                let start = usize::try_from(after).unwrap_or(usize::MAX).min(self.events.len());
                self.events[start..].iter().take(limit).cloned().collect()
            }
            Some(pid) => {
                let Some(seqs) = self.by_pipeline.get(pid) else {
                    return Vec::new();
                };
                let start = seqs.partition_point(|s| *s <= after);
                seqs[start..]
                    .iter()
                    .take(limit)
                    .filter_map(|s| self.get(*s).cloned())
                    .collect()
            }
        }
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl EventStore {
    /// A store with no journal. Contents are lost with the process.
    pub fn in_memory() -> Self {
        Self::from_parts(LogState::default(), None)
    }

    /// Open a journal-backed store, replaying every journaled row through
    /// the same validation `append` applies.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let journal = SqlJournal::connect(path).await?;
        let mut state = LogState::default();

        for (seq, payload) in journal.read_all().await? {
            let expected = state.next_seq() as i64;
            if seq != expected {
                return Err(StoreError::Corrupt {
                    seq,
                    reason: format!("expected seq {expected}"),
                });
            }
            let event: RunEvent = serde_json::from_str(&payload).map_err(|e| StoreError::Corrupt {
                seq,
                reason: e.to_string(),
            })?;
            let lifecycle = state.check(&event).map_err(|e| StoreError::Corrupt {
                seq,
                reason: e.to_string(),
            })?;
            state.insert(event, lifecycle);
        }

        info!(
            path = %journal.path().display(),
            events = state.events.len(),
            runs = state.runs.len(),
            "Event journal replayed"
        );
        Ok(Self::from_parts(state, Some(journal)))
    }

    fn from_parts(state: LogState, journal: Option<SqlJournal>) -> Self {
        let latest = state.events.len() as u64;
        let (tx, _rx) = watch::channel(latest);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                journal,
                append_gate: Mutex::new(()),
                latest: tx,
            }),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LogState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LogState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and append one event. Returns its sequence number. A rejected
    /// event, or one the journal fails to commit, leaves the store unchanged.
    ///
    /// Not cancel-safe once the journal write has started: a caller that may
    /// be dropped mid-request should run this on its own task.
    pub async fn append(&self, event: RunEvent) -> Result<u64, StoreError> {
        let _gate = self.inner.append_gate.lock().await;

        let (seq, lifecycle) = {
            let state = self.read_state();
            (state.next_seq(), state.check(&event)?)
        };

        if let Some(journal) = &self.inner.journal {
            if let Err(e) = journal.insert(seq, &event).await {
                warn!(seq, run_id = %event.run_id, error = %e, "Journal write failed, event dropped");
                return Err(e);
            }
        }

        let stored = self.write_state().insert(event, lifecycle);
        debug_assert_eq!(stored.seq, seq);

        // A nudge for the fold loop, not a delivery guarantee.
        self.inner.latest.send_replace(seq);
        debug!(seq, "Event appended");
        Ok(seq)
    }

    /// Lazily read events strictly after `since_seq`, optionally restricted to
    /// one pipeline, in sequence order.
    pub fn read_range(&self, pipeline_id: Option<&str>, since_seq: u64) -> EventCursor {
        EventCursor {
            store: self.clone(),
            pipeline_id: pipeline_id.map(str::to_string),
            after: since_seq,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Read up to `limit` events starting at `seq_start` (inclusive).
    pub fn read_from(&self, seq_start: u64, limit: usize) -> Vec<Arc<StoredEvent>> {
        self.read_state()
            .batch_after(None, seq_start.saturating_sub(1), limit)
    }

    /// Read a single event by sequence number.
    pub fn read_event(&self, seq: u64) -> Option<Arc<StoredEvent>> {
        self.read_state().get(seq).cloned()
    }

    /// Read all events for a given run, in sequence order.
    pub fn read_by_run(&self, run_id: &str) -> Vec<Arc<StoredEvent>> {
        let state = self.read_state();
        state
            .runs
            .get(run_id)
            .map(|entry| {
                entry
                    .seqs
                    .iter()
                    .filter_map(|s| state.get(*s).cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    /// The pipeline a run belongs to, if the run is known.
    pub fn pipeline_of(&self, run_id: &str) -> Option<String> {
        self.read_state()
            .runs
            .get(run_id)
            .map(|entry| entry.lifecycle.pipeline_id.clone())
    }

    pub fn is_journaled(&self) -> bool {
        self.inner.journal.is_some()
    }

    /// The latest committed sequence number, or 0 if the log is empty.
    pub fn latest_seq(&self) -> u64 {
        self.read_state().events.len() as u64
    }

    /// Watch the latest committed sequence number. Consumers catch up by
    /// reading from their own watermark; intermediate values may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.latest.subscribe()
    }
}

// ---------------------------------------------------------------------------
// EventCursor: lazy range reads
// ---------------------------------------------------------------------------

/// Iterator returned by [`EventStore::read_range`]. Pulls events in batches
/// and never holds the store lock between items. Events appended while the
/// cursor is live are yielded if they arrive before it runs dry.
pub struct EventCursor {
    store: EventStore,
    pipeline_id: Option<String>,
    after: u64,
    buffer: VecDeque<Arc<StoredEvent>>,
    exhausted: bool,
}

impl Iterator for EventCursor {
    type Item = Arc<StoredEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            let batch = self.store.read_state().batch_after(
                self.pipeline_id.as_deref(),
                self.after,
                CURSOR_BATCH,
            );
            if batch.is_empty() {
                self.exhausted = true;
            }
            self.buffer.extend(batch);
        }

        let next = self.buffer.pop_front()?;
        self.after = next.seq;
        Some(next)
    }
}
