//! The fold loop: the only task that touches the aggregator.
//!
//! Wakes on store nudges, telemetry commands, and a periodic tick. On every
//! wake-up it catches up from its own watermark, so skipped nudges lose
//! nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cleanops_common::{CleanOpsError, Config, ResourceUsage};
use cleanops_events::EventStore;
use cleanops_live::{SubscriptionHub, VersionedSnapshot};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;

const COMMAND_BUFFER: usize = 256;

#[derive(Debug)]
pub enum EngineCommand {
    Telemetry(ResourceUsage),
}

/// Sends commands to a running fold loop and reports how far it has got.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    watermark: watch::Receiver<u64>,
}

impl EngineHandle {
    /// Highest sequence number the fold loop has folded.
    pub fn watermark(&self) -> u64 {
        *self.watermark.borrow()
    }

    /// Whether the fold loop still exists to receive commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn ingest_telemetry(&self, sample: ResourceUsage) -> Result<(), CleanOpsError> {
        self.commands
            .send(EngineCommand::Telemetry(sample))
            .await
            .map_err(|_| CleanOpsError::Anyhow(anyhow::anyhow!("fold loop is not running")))
    }
}

pub struct FoldRuntime {
    store: EventStore,
    aggregator: Aggregator,
    hub: SubscriptionHub,
    batch_size: usize,
    tick: Duration,
    commands: mpsc::Receiver<EngineCommand>,
    watermark: watch::Sender<u64>,
}

impl FoldRuntime {
    pub fn new(
        store: EventStore,
        aggregator: Aggregator,
        hub: SubscriptionHub,
        config: &Config,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (watermark_tx, watermark_rx) = watch::channel(aggregator.watermark());
        let runtime = Self {
            store,
            aggregator,
            hub,
            batch_size: config.fold_batch_size.max(1),
            tick: Duration::from_secs(config.tick_secs.max(1)),
            commands: rx,
            watermark: watermark_tx,
        };
        let handle = EngineHandle {
            commands: tx,
            watermark: watermark_rx,
        };
        (runtime, handle)
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Fold everything already committed without publishing the intermediate
    /// deltas, then seed the cache with the resulting view.
    pub fn catch_up_and_seed(&mut self) -> Arc<VersionedSnapshot> {
        let folded = self.drain(false);
        self.aggregator.advance_clock(Utc::now());
        let view = self.hub.seed(self.aggregator.view());
        info!(
            events = folded,
            watermark = self.aggregator.watermark(),
            version = view.version,
            "Aggregator caught up from event store"
        );
        view
    }

    /// Fold every event after the watermark. Returns how many were read.
    pub fn drain(&mut self, publish: bool) -> usize {
        let mut read = 0;
        loop {
            let batch = self
                .store
                .read_from(self.aggregator.watermark() + 1, self.batch_size);
            if batch.is_empty() {
                self.watermark.send_replace(self.aggregator.watermark());
                return read;
            }
            read += batch.len();
            for stored in &batch {
                if let Some(delta) = self.aggregator.fold(stored) {
                    if publish {
                        self.hub.publish(delta);
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Telemetry(sample) => {
                if let Some(delta) = self.aggregator.ingest_telemetry(sample, Utc::now()) {
                    self.hub.publish(delta);
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut nudges = self.store.subscribe();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_secs = self.tick.as_secs(), "Fold loop started");

        loop {
            tokio::select! {
                changed = nudges.changed() => {
                    if changed.is_err() {
                        warn!("Event store closed, fold loop stopping");
                        return;
                    }
                    let folded = self.drain(true);
                    debug!(folded, watermark = self.aggregator.watermark(), "Folded new events");
                }
                Some(command) = self.commands.recv() => self.handle(command),
                _ = ticker.tick() => {
                    self.drain(true);
                    if let Some(delta) = self.aggregator.advance_clock(Utc::now()) {
                        self.hub.publish(delta);
                    }
                }
            }
        }
    }
}
