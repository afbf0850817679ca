//! Throttle for incremental typing and deduping during a sync.
//!
//! Each stream runs type and dedupe immediately the first time it becomes
//! eligible, then waits progressively longer between runs. The last interval
//! repeats forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::core::StreamDescriptor;

/// Back-off intervals, in milliseconds: run right away, then every six hours.
pub const DEFAULT_INTERVALS_MS: [i64; 2] = [-1, 6 * 60 * 60 * 1000];

/// Injected time source.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct StreamTiming {
    last_run: DateTime<Utc>,
    interval_index: usize,
}

/// Decides when a stream is due for another incremental type and dedupe.
pub struct TypeAndDedupeOperationValve {
    enabled: bool,
    intervals: Vec<Duration>,
    clock: Clock,
    streams: HashMap<StreamDescriptor, StreamTiming>,
}

impl fmt::Debug for TypeAndDedupeOperationValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeAndDedupeOperationValve")
            .field("enabled", &self.enabled)
            .field("intervals", &self.intervals)
            .field("streams", &self.streams)
            .finish()
    }
}

impl TypeAndDedupeOperationValve {
    /// Valve using the wall clock and the default intervals.
    pub fn new(enabled: bool) -> Self {
        Self::with_clock(enabled, &DEFAULT_INTERVALS_MS, Arc::new(Utc::now))
    }

    /// Valve with explicit intervals and time source.
    ///
    /// An empty interval list falls back to the defaults.
    pub fn with_clock(enabled: bool, intervals_ms: &[i64], clock: Clock) -> Self {
        let intervals_ms = if intervals_ms.is_empty() {
            &DEFAULT_INTERVALS_MS[..]
        } else {
            intervals_ms
        };
        Self {
            enabled,
            intervals: intervals_ms.iter().map(|ms| Duration::milliseconds(*ms)).collect(),
            clock,
            streams: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start tracking `stream` from now, resetting any previous timing.
    pub fn add_stream(&mut self, stream: StreamDescriptor) {
        let now = (self.clock)();
        self.streams.insert(
            stream,
            StreamTiming {
                last_run: now,
                interval_index: 0,
            },
        );
    }

    /// Start tracking `stream` unless it is already tracked.
    pub fn add_stream_if_absent(&mut self, stream: StreamDescriptor) {
        if !self.streams.contains_key(&stream) {
            self.add_stream(stream);
        }
    }

    /// Whether enough time has passed since the stream's last run.
    ///
    /// Always false when incremental typing and deduping is disabled or the
    /// stream is not tracked.
    pub fn ready_to_type_and_dedupe(&self, stream: &StreamDescriptor) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(timing) = self.streams.get(stream) else {
            return false;
        };
        let elapsed = (self.clock)() - timing.last_run;
        elapsed > self.intervals[timing.interval_index]
    }

    /// Move the stream to its next interval, capped at the last one.
    pub fn increment_interval(&mut self, stream: &StreamDescriptor) {
        let last = self.intervals.len() - 1;
        if let Some(timing) = self.streams.get_mut(stream) {
            timing.interval_index = (timing.interval_index + 1).min(last);
        }
    }

    /// Record a run now and lengthen the wait before the next one.
    pub fn update_time_and_increase_interval(&mut self, stream: &StreamDescriptor) {
        let now = (self.clock)();
        if let Some(timing) = self.streams.get_mut(stream) {
            timing.last_run = now;
        }
        self.increment_interval(stream);
        if let Some(interval) = self.get_increment_interval(stream) {
            info!(
                "Next incremental typing and deduping for {}.{} in {} seconds",
                stream.namespace.as_deref().unwrap_or(""),
                stream.name,
                interval.num_seconds().max(0)
            );
        }
    }

    /// The interval the stream is currently waiting out.
    pub fn get_increment_interval(&self, stream: &StreamDescriptor) -> Option<Duration> {
        self.streams
            .get(stream)
            .map(|t| self.intervals[t.interval_index])
    }
}
