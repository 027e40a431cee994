//! Multi-horizon flush trigger
//!
//! Edits are counted into fixed-size time buckets held in a ring. Each
//! [`FlushWindow`] pairs a horizon with an edit count; once the edits inside
//! any horizon reach its count, a flush is due. Short windows with high counts
//! catch bursts, long windows with low counts catch a slow trickle.
//!
//! The ring is ordered oldest to newest: slot `0` is the oldest retained
//! bucket and slot `len - 1` is the bucket "now" falls into.

use crate::clock::Clock;
use crate::error::{CacheError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A (horizon, edit count) rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushWindow {
    /// How far back edits are summed
    pub window: Duration,

    /// Edits inside `window` needed to trigger a flush
    pub threshold: u64,
}

impl FlushWindow {
    pub fn new(window_secs: u64, threshold: u64) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            threshold,
        }
    }
}

/// Windows plus bucket granularity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushPolicy {
    /// Ordered shortest window first
    pub windows: Vec<FlushWindow>,

    /// Width of one ring bucket, whole seconds
    pub bucket: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            windows: vec![
                // Heavy bursts flush within a minute
                FlushWindow::new(60, 10_000),
                FlushWindow::new(300, 10),
                // Anything at all flushes within 15 minutes
                FlushWindow::new(900, 1),
            ],
            bucket: Duration::from_secs(15),
        }
    }
}

impl FlushPolicy {
    pub fn new(windows: Vec<FlushWindow>, bucket: Duration) -> Self {
        Self { windows, bucket }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.bucket.as_secs() == 0 || self.bucket.subsec_nanos() != 0 {
            return Err(CacheError::ConfigError(
                "flush bucket must be a whole number of seconds greater than 0".to_string(),
            ));
        }

        if self.windows.is_empty() {
            return Err(CacheError::ConfigError(
                "flush policy needs at least one window".to_string(),
            ));
        }

        for window in &self.windows {
            if window.window.is_zero() {
                return Err(CacheError::ConfigError(
                    "flush windows must be longer than 0".to_string(),
                ));
            }
            if window.threshold == 0 {
                return Err(CacheError::ConfigError(
                    "flush thresholds must be greater than 0".to_string(),
                ));
            }
        }

        if self
            .windows
            .windows(2)
            .any(|pair| pair[0].window >= pair[1].window)
        {
            return Err(CacheError::ConfigError(
                "flush windows must be sorted shortest first without duplicates".to_string(),
            ));
        }

        Ok(())
    }

    pub fn longest_window(&self) -> Duration {
        self.windows
            .last()
            .map(|w| w.window)
            .unwrap_or(Duration::ZERO)
    }

    /// Number of ring buckets needed to cover the longest window
    pub fn bucket_count(&self) -> usize {
        self.buckets_for(self.longest_window())
    }

    fn bucket_secs(&self) -> i64 {
        self.bucket.as_secs().max(1) as i64
    }

    fn buckets_for(&self, window: Duration) -> usize {
        let bucket = self.bucket.as_secs().max(1);
        (window.as_secs().div_ceil(bucket) as usize).max(1)
    }
}

/// Bucketed edit counter deciding when accumulated edits justify a flush
#[derive(Debug, Clone)]
pub struct FlushTrigger {
    policy: FlushPolicy,
    counts: VecDeque<u64>,

    /// Absolute bucket number (seconds since epoch / bucket) held by the newest slot
    last_shift: i64,

    clock: Arc<dyn Clock>,
}

impl FlushTrigger {
    pub fn new(policy: FlushPolicy, clock: Arc<dyn Clock>) -> Result<Self> {
        policy.validate()?;

        let counts = VecDeque::from(vec![0; policy.bucket_count()]);
        let last_shift = clock.now().timestamp().div_euclid(policy.bucket_secs());

        Ok(Self {
            policy,
            counts,
            last_shift,
            clock,
        })
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    pub fn bucket_count(&self) -> usize {
        self.counts.len()
    }

    /// Snapshot of the ring, oldest bucket first
    pub fn counts(&self) -> Vec<u64> {
        self.counts.iter().copied().collect()
    }

    fn bucket_number(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.policy.bucket_secs())
    }

    /// Rotate the ring so the newest slot covers "now"
    ///
    /// Buckets that rotate in are zeroed; a jump of a full ring or more
    /// clears everything. Returns "now" snapped down to its bucket boundary.
    pub fn realign(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        let current = self.bucket_number(now);
        let elapsed = current - self.last_shift;
        let len = self.counts.len();

        if elapsed > 0 {
            if elapsed >= len as i64 {
                self.counts.iter_mut().for_each(|slot| *slot = 0);
            } else {
                let shift = elapsed as usize;
                self.counts.rotate_left(shift);
                self.counts
                    .iter_mut()
                    .skip(len - shift)
                    .for_each(|slot| *slot = 0);
            }
            self.last_shift = current;
        } else if elapsed < 0 {
            // Counts are anchored to a future bucket; start over at the current one
            trace!("Clock moved backwards by {} buckets, resetting ring", -elapsed);
            self.reset();
            self.last_shift = current;
        }

        Utc.timestamp_opt(current * self.policy.bucket_secs(), 0)
            .single()
            .unwrap_or(now)
    }

    /// Ring slot an edit made at `edit_time` belongs to, if it is still retained
    pub fn slot_for(&self, edit_time: DateTime<Utc>) -> Option<usize> {
        let len = self.counts.len() as i64;
        let age = self.last_shift - self.bucket_number(edit_time);
        if (0..len).contains(&age) {
            Some((len - 1 - age) as usize)
        } else {
            None
        }
    }

    /// Record an edit happening now; returns true when a flush is due
    pub fn record_edit(&mut self) -> bool {
        let now = self.clock.now();
        self.record_edit_at(now)
    }

    /// Record an edit made at `edit_time`
    ///
    /// Edits outside the retained horizon (too old, or in the future) are not
    /// counted.
    pub fn record_edit_at(&mut self, edit_time: DateTime<Utc>) -> bool {
        self.realign();

        match self.slot_for(edit_time) {
            Some(slot) => {
                self.counts[slot] += 1;
                self.due_window().is_some()
            }
            None => {
                debug!("Edit at {} falls outside flush windows, not counted", edit_time);
                false
            }
        }
    }

    /// Realign, then report the first window whose threshold has been reached
    pub fn check(&mut self) -> Option<FlushWindow> {
        self.realign();
        self.due_window()
    }

    /// Edits currently counted across the whole ring
    pub fn pending_edits(&mut self) -> u64 {
        self.realign();
        self.counts.iter().sum()
    }

    /// Clear every bucket
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|slot| *slot = 0);
    }

    fn due_window(&self) -> Option<FlushWindow> {
        let len = self.counts.len();
        let mut running = 0u64;
        let mut covered = 0usize;

        for window in &self.policy.windows {
            let span = self.policy.buckets_for(window.window).min(len);
            while covered < span {
                running += self.counts[len - 1 - covered];
                covered += 1;
            }
            if running >= window.threshold {
                return Some(*window);
            }
        }

        None
    }
}
