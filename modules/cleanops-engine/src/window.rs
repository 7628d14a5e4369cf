//! Time-bucketed rolling window of finished runs.
//!
//! A ring of `window / bucket_width` buckets, each tagged with its absolute
//! bucket index. Running totals are kept alongside so reading them is O(1);
//! moving the head clears only the buckets it steps over.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowTotals {
    pub completed: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

impl WindowTotals {
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    /// `completed / finished * 100`, or 0 with nothing finished.
    pub fn success_rate(&self) -> f64 {
        match self.finished() {
            0 => 0.0,
            n => self.completed as f64 / n as f64 * 100.0,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        match self.finished() {
            0 => 0.0,
            n => self.failed as f64 / n as f64 * 100.0,
        }
    }

    pub fn avg_minutes(&self) -> f64 {
        match self.finished() {
            0 => 0.0,
            n => self.duration_ms as f64 / n as f64 / 60_000.0,
        }
    }

    fn add(&mut self, other: &WindowTotals) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.duration_ms += other.duration_ms;
    }

    fn sub(&mut self, other: &WindowTotals) {
        self.completed = self.completed.saturating_sub(other.completed);
        self.failed = self.failed.saturating_sub(other.failed);
        self.duration_ms = self.duration_ms.saturating_sub(other.duration_ms);
    }
}

/// One bucket of [`RollingWindow::series`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPoint {
    pub bucket_start: DateTime<Utc>,
    pub totals: WindowTotals,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    index: i64,
    totals: WindowTotals,
}

#[derive(Debug, Clone)]
pub struct RollingWindow {
    bucket_width_ms: i64,
    buckets: Vec<Bucket>,
    /// Newest bucket index the window has advanced to.
    head: Option<i64>,
    totals: WindowTotals,
}

impl RollingWindow {
    pub fn new(bucket_width: Duration, window: Duration) -> Self {
        let bucket_width_ms = (bucket_width.as_millis() as i64).max(1);
        let window_ms = window.as_millis() as i64;
        let slots = ((window_ms + bucket_width_ms - 1) / bucket_width_ms).max(1) as usize;
        Self {
            bucket_width_ms,
            buckets: vec![Bucket::default(); slots],
            head: None,
            totals: WindowTotals::default(),
        }
    }

    fn slots(&self) -> i64 {
        self.buckets.len() as i64
    }

    fn bucket_index(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp_millis().div_euclid(self.bucket_width_ms)
    }

    fn slot(&self, index: i64) -> usize {
        index.rem_euclid(self.slots()) as usize
    }

    fn clear_slot(&mut self, slot: usize, index: i64) {
        let old = std::mem::take(&mut self.buckets[slot]);
        self.totals.sub(&old.totals);
        self.buckets[slot].index = index;
    }

    /// Move the head forward to `now`, dropping buckets that fall out.
    /// Returns whether the totals changed.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> bool {
        let target = self.bucket_index(now);
        let Some(head) = self.head else {
            self.head = Some(target);
            return false;
        };
        if target <= head {
            return false;
        }

        let before = self.totals;
        let first = (head + 1).max(target - self.slots() + 1);
        for index in first..=target {
            let slot = self.slot(index);
            self.clear_slot(slot, index);
        }
        self.head = Some(target);
        self.totals != before
    }

    /// Count a finished run in the bucket of `at`. Returns false when `at` is
    /// already outside the window.
    pub fn record(&mut self, at: DateTime<Utc>, outcome: Outcome, duration_ms: u64) -> bool {
        self.advance_to(at);
        let index = self.bucket_index(at);
        let head = self.head.unwrap_or(index);
        if index <= head - self.slots() {
            return false;
        }

        let slot = self.slot(index);
        if self.buckets[slot].index != index {
            self.clear_slot(slot, index);
        }

        let added = WindowTotals {
            completed: u64::from(outcome == Outcome::Completed),
            failed: u64::from(outcome == Outcome::Failed),
            duration_ms,
        };
        self.buckets[slot].totals.add(&added);
        self.totals.add(&added);
        true
    }

    pub fn totals(&self) -> WindowTotals {
        self.totals
    }

    /// Every bucket still covered by the window, oldest first, empty ones
    /// included. Empty until the window has a head.
    pub fn series(&self) -> Vec<WindowPoint> {
        let Some(head) = self.head else {
            return Vec::new();
        };
        (head - self.slots() + 1..=head)
            .filter_map(|index| {
                let bucket = &self.buckets[self.slot(index)];
                let totals = if bucket.index == index {
                    bucket.totals
                } else {
                    WindowTotals::default()
                };
                DateTime::from_timestamp_millis(index * self.bucket_width_ms)
                    .map(|bucket_start| WindowPoint { bucket_start, totals })
            })
            .collect()
    }
}
