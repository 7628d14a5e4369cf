//! Fans published snapshot versions out to subscribers.
//!
//! Publishing goes through the hub so that the cache version, the retained
//! delta log, and every subscriber queue advance together. Each subscriber
//! has its own bounded [`Outbox`]; the publisher never waits on one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cleanops_common::{Config, DashboardSnapshot, SnapshotDelta};
use futures::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{SnapshotCache, VersionedSnapshot};
use crate::error::LiveError;
use crate::message::LiveMessage;
use crate::outbox::{Outbox, Push};

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub queue_depth: usize,
    pub delta_retention: usize,
    pub ack_timeout: Duration,
}

impl HubSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_depth: config.subscriber_queue_depth,
            delta_retention: config.delta_retention,
            ack_timeout: Duration::from_secs(config.ack_timeout_secs),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    cache: Arc<SnapshotCache>,
    settings: HubSettings,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    /// Contiguous, oldest first, ending at the cache's current version.
    retained: VecDeque<(u64, Arc<SnapshotDelta>)>,
    subscribers: HashMap<String, Arc<Outbox>>,
}

impl HubState {
    /// True when every delta after `version` is still retained.
    fn can_resume_from(&self, version: u64) -> bool {
        self.retained
            .front()
            .is_some_and(|(oldest, _)| *oldest <= version + 1)
    }
}

impl SubscriptionHub {
    pub fn new(cache: Arc<SnapshotCache>, settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                cache,
                settings,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.inner.cache
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a delta as the next snapshot version and queue it for every
    /// subscriber.
    pub fn publish(&self, delta: SnapshotDelta) -> Arc<VersionedSnapshot> {
        let mut state = self.lock();
        let view = self.inner.cache.publish(&delta);
        let version = view.version;

        let delta = Arc::new(delta);
        state.retained.push_back((version, delta.clone()));
        while state.retained.len() > self.inner.settings.delta_retention {
            state.retained.pop_front();
        }

        let message = LiveMessage::Delta { version, delta };
        let now = Instant::now();
        for (id, outbox) in &state.subscribers {
            let pushed = outbox.push(message.clone(), || LiveMessage::full(view.clone()), now);
            if pushed == Push::Collapsed {
                debug!(subscriber = %id, version, "Subscriber queue full, collapsed into snapshot");
            }
        }

        view
    }

    /// Publish a complete view. Retained deltas no longer lead to it, so
    /// every subscriber gets a full snapshot.
    pub fn seed(&self, snapshot: DashboardSnapshot) -> Arc<VersionedSnapshot> {
        let mut state = self.lock();
        let view = self.inner.cache.seed(snapshot);
        state.retained.clear();

        let now = Instant::now();
        for outbox in state.subscribers.values() {
            outbox.push(
                LiveMessage::full(view.clone()),
                || LiveMessage::full(view.clone()),
                now,
            );
        }
        info!(version = view.version, "Snapshot seeded");
        view
    }

    /// Register a subscriber.
    ///
    /// With no `from_version` the first message is a full snapshot. A client
    /// resuming from a version still covered by retained deltas gets those
    /// deltas instead, provided they fit its queue; anything else (too old,
    /// too far behind, or newer than the current version) gets a full
    /// snapshot.
    pub fn subscribe(&self, from_version: Option<u64>) -> Subscription {
        let mut state = self.lock();
        let current = self.inner.cache.current();
        let outbox = Arc::new(Outbox::new(self.inner.settings.queue_depth));
        let now = Instant::now();
        let full = || LiveMessage::full(current.clone());

        let depth = self.inner.settings.queue_depth as u64;
        match from_version {
            Some(v) if v == current.version => {}
            Some(v)
                if v < current.version
                    && current.version - v <= depth
                    && state.can_resume_from(v) =>
            {
                for (version, delta) in state.retained.iter().filter(|(ver, _)| *ver > v) {
                    let message = LiveMessage::Delta {
                        version: *version,
                        delta: delta.clone(),
                    };
                    outbox.push(message, full, now);
                }
            }
            _ => {
                outbox.push(full(), full, now);
            }
        }

        let id = Uuid::new_v4().to_string();
        state.subscribers.insert(id.clone(), outbox.clone());
        debug!(
            subscriber = %id,
            from_version = ?from_version,
            version = current.version,
            subscribers = state.subscribers.len(),
            "Subscriber connected"
        );

        Subscription {
            id,
            outbox,
            hub: self.clone(),
        }
    }

    /// Record that `subscriber_id` has applied everything up to `version`.
    pub fn ack(&self, subscriber_id: &str, version: u64) {
        let outbox = self.lock().subscribers.get(subscriber_id).cloned();
        if let Some(outbox) = outbox {
            outbox.ack(version, Instant::now());
        }
    }

    /// Evict subscribers that have left a message unacknowledged for longer
    /// than the ack timeout. Returns their ids.
    pub fn evict_unresponsive(&self, now: Instant) -> Vec<String> {
        let timeout = self.inner.settings.ack_timeout;
        let mut state = self.lock();

        let stale: Vec<String> = state
            .subscribers
            .iter()
            .filter(|(_, outbox)| {
                outbox
                    .awaiting_ack_since()
                    .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if let Some(outbox) = state.subscribers.remove(id) {
                outbox.evict();
                warn!(subscriber = %id, timeout_secs = timeout.as_secs(), "Subscriber evicted, no ack");
            }
        }
        stale
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Subscribers holding at least one unacknowledged message.
    pub fn awaiting_ack_count(&self) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|outbox| outbox.awaiting_ack_since().is_some())
            .count()
    }

    fn remove(&self, subscriber_id: &str) {
        if self.lock().subscribers.remove(subscriber_id).is_some() {
            debug!(subscriber = %subscriber_id, "Subscriber disconnected");
        }
    }

    /// Spawn a background loop that evicts unresponsive subscribers.
    pub fn spawn_eviction_loop(&self) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        let period = (self.inner.settings.ack_timeout / 2).max(Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                hub.evict_unresponsive(Instant::now());
            }
        });
        info!(period_secs = period.as_secs(), "Subscriber eviction loop started");
        handle
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live subscriber's receiving end. Dropping it unsubscribes.
pub struct Subscription {
    id: String,
    outbox: Arc<Outbox>,
    hub: SubscriptionHub,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next message in version order.
    pub async fn recv(&self) -> Result<LiveMessage, LiveError> {
        self.outbox
            .recv()
            .await
            .ok_or_else(|| LiveError::SubscriberEvicted {
                subscriber_id: self.id.clone(),
            })
    }

    /// Next queued message, if any, without waiting.
    pub fn try_recv(&self) -> Option<LiveMessage> {
        self.outbox.try_recv()
    }

    pub fn ack(&self, version: u64) {
        self.outbox.ack(version, Instant::now());
    }

    pub fn last_delivered_version(&self) -> u64 {
        self.outbox.last_delivered()
    }

    /// The subscription as a stream. Ends after yielding the eviction error.
    pub fn into_stream(self) -> impl Stream<Item = Result<LiveMessage, LiveError>> + Send + 'static {
        async_stream::stream! {
            loop {
                match self.recv().await {
                    Ok(message) => yield Ok(message),
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(&self.id);
    }
}
