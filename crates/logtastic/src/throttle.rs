// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide "do not send until" gate.
//!
//! The deadline is a single atomic: written by the dispatch worker after a failed delivery,
//! read by every producer before enqueueing. A stale read costs at most one extra or one
//! skipped send around the deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Marks the gate as open.
const NOT_THROTTLED: u64 = 0;

#[derive(Debug)]
pub struct ThrottleGate {
    /// Reference point for the stored deadline.
    epoch: Instant,
    /// Deadline in microseconds since `epoch`, `NOT_THROTTLED` when open.
    throttled_until_us: AtomicU64,
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleGate {
    pub fn new() -> Self {
        ThrottleGate {
            epoch: Instant::now(),
            throttled_until_us: AtomicU64::new(NOT_THROTTLED),
        }
    }

    fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Suppresses enqueueing for `duration` from now.
    pub fn throttle_for(&self, duration: Duration) {
        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        // +1 keeps the deadline strictly after now and distinct from NOT_THROTTLED
        let until = self
            .now_us()
            .saturating_add(duration_us)
            .saturating_add(1);
        self.throttled_until_us.store(until, Ordering::Release);
    }

    /// Time left in the current throttle window, `None` once it has expired. Expiry is only
    /// ever noticed here, there is no timer.
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.throttled_until_us.load(Ordering::Acquire);
        if until == NOT_THROTTLED {
            return None;
        }
        let now = self.now_us();
        if now >= until {
            return None;
        }
        Some(Duration::from_micros(until - now))
    }

    pub fn is_throttled(&self) -> bool {
        self.remaining().is_some()
    }
}
