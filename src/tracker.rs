// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide budget of live kernel-handle proxies per originator.
//!
//! Each enabled originator carries a packed `u32`: bit 31 flags that the
//! high watermark was reached, the remaining bits count live proxies. The flag
//! clears with hysteresis once the count falls back to the low watermark,
//! and the limit callback re-fires only after the count grows a further
//! high-watermark's worth past the last report.
//!
//! The tracker lock is leaf-level: it is never taken while a per-proxy lock
//! is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

const LIMIT_REACHED_MASK: u32 = 0x8000_0000;
const COUNT_MASK: u32 = 0x7fff_ffff;

const DEFAULT_HIGH_WATERMARK: u32 = 2500;
const DEFAULT_LOW_WATERMARK: u32 = 2000;

/// Callback fired when an originator reaches the high watermark, and again
/// per the excess-delta rule while it stays above it.
pub type LimitCallback = Box<dyn Fn(u32) + Send + Sync>;

struct TrackerState {
    counts: HashMap<u32, u32>,
    last_callback: HashMap<u32, u32>,
    high_watermark: u32,
    low_watermark: u32,
    throttle_creates: bool,
    limit_callback: Option<LimitCallback>,
}

/// Per-originator accounting of live kernel-handle proxies.
pub struct ProxyTracker {
    enabled: AtomicBool,
    state: Mutex<TrackerState>,
}

impl Default for ProxyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyTracker {
    /// Creates a disabled tracker with default watermarks.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            state: Mutex::new(TrackerState {
                counts: HashMap::new(),
                last_callback: HashMap::new(),
                high_watermark: DEFAULT_HIGH_WATERMARK,
                low_watermark: DEFAULT_LOW_WATERMARK,
                throttle_creates: false,
                limit_callback: None,
            }),
        }
    }

    /// The process-wide tracker consulted by [`crate::Proxy::create`].
    pub fn global() -> &'static Arc<ProxyTracker> {
        static GLOBAL: Lazy<Arc<ProxyTracker>> = Lazy::new(|| Arc::new(ProxyTracker::new()));
        &GLOBAL
    }

    /// Returns true when per-originator counting is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turns per-originator counting on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// When on, originators at the limit are refused new proxies instead of
    /// merely reported.
    pub fn set_throttling(&self, throttle: bool) {
        self.state.lock().throttle_creates = throttle;
    }

    /// Replaces the high/low watermark pair.
    pub fn set_watermarks(&self, high: u32, low: u32) {
        let mut state = self.state.lock();
        state.high_watermark = high;
        state.low_watermark = low;
    }

    /// Installs or clears the limit callback.
    pub fn set_limit_callback(&self, callback: Option<LimitCallback>) {
        self.state.lock().limit_callback = callback;
    }

    /// Live proxy count for `originator`, flag bit masked off.
    pub fn count(&self, originator: u32) -> u32 {
        self.state.lock().counts.get(&originator).map_or(0, |packed| packed & COUNT_MASK)
    }

    /// All originators with live proxies and their counts, taken atomically
    /// under the tracker lock.
    pub fn snapshot(&self) -> Vec<(u32, u32)> {
        self.state
            .lock()
            .counts
            .iter()
            .map(|(originator, packed)| (*originator, packed & COUNT_MASK))
            .collect()
    }

    /// Admission check run before a tracked proxy is constructed. Returns
    /// false when creation must be refused.
    pub(crate) fn admit(&self, originator: u32) -> bool {
        let mut state = self.state.lock();
        let mut packed = state.counts.get(&originator).copied().unwrap_or(0);

        if packed & LIMIT_REACHED_MASK != 0 {
            if state.throttle_creates {
                return false;
            }
            let count = packed & COUNT_MASK;
            let last = state.last_callback.get(&originator).copied().unwrap_or(0);
            if count > last && count - last > state.high_watermark {
                error!("originator {originator} still holds too many proxies ({count} live)");
                state.last_callback.insert(originator, count);
                if let Some(callback) = &state.limit_callback {
                    callback(originator);
                }
            }
        } else if packed & COUNT_MASK >= state.high_watermark {
            error!(
                "too many proxies created for originator {originator} ({} live)",
                packed & COUNT_MASK
            );
            packed |= LIMIT_REACHED_MASK;
            state.last_callback.insert(originator, packed & COUNT_MASK);
            if let Some(callback) = &state.limit_callback {
                callback(originator);
            }
            if state.throttle_creates {
                info!(
                    "throttling proxy creation for originator {originator} until the count drops \
                     to {}",
                    state.low_watermark
                );
                state.counts.insert(originator, packed);
                return false;
            }
        }

        state.counts.insert(originator, packed + 1);
        true
    }

    /// Releases one live proxy for `originator`, clearing the limit flag
    /// once the remaining count is at or below the low watermark.
    pub(crate) fn release(&self, originator: u32) {
        let mut state = self.state.lock();
        let Some(packed) = state.counts.get(&originator).copied() else {
            error!("proxy released for untracked originator {originator}");
            return;
        };
        if packed & COUNT_MASK == 0 {
            error!("unexpected proxy count underflow for originator {originator}");
            return;
        }

        let mut flag = packed & LIMIT_REACHED_MASK;
        let count = (packed & COUNT_MASK) - 1;
        if flag != 0 && count <= state.low_watermark {
            info!("limit flag cleared for originator {originator} ({count} proxies left)");
            flag = 0;
            state.last_callback.remove(&originator);
        }
        if count == 0 {
            state.counts.remove(&originator);
        } else {
            state.counts.insert(originator, flag | count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_tracker(high: u32, low: u32) -> (Arc<ProxyTracker>, Arc<AtomicU32>) {
        let tracker = Arc::new(ProxyTracker::new());
        tracker.set_enabled(true);
        tracker.set_watermarks(high, low);
        let fired = Arc::new(AtomicU32::new(0));
        let observed = fired.clone();
        tracker.set_limit_callback(Some(Box::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        })));
        (tracker, fired)
    }

    #[test]
    fn throttling_refuses_past_high_watermark() {
        let (tracker, fired) = counting_tracker(3, 1);
        tracker.set_throttling(true);

        assert!(tracker.admit(1000));
        assert!(tracker.admit(1000));
        assert!(tracker.admit(1000));
        assert!(!tracker.admit(1000));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.count(1000), 3);

        // Still throttled while above the low watermark, without re-firing.
        assert!(!tracker.admit(1000));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn limit_flag_clears_at_low_watermark() {
        let (tracker, _fired) = counting_tracker(3, 1);
        tracker.set_throttling(true);

        for _ in 0..3 {
            assert!(tracker.admit(7));
        }
        assert!(!tracker.admit(7));

        tracker.release(7);
        assert!(!tracker.admit(7), "still above the low watermark");
        tracker.release(7);
        assert!(tracker.admit(7), "flag cleared once the count reached the low watermark");
        assert_eq!(tracker.count(7), 2);
    }

    #[test]
    fn callback_refires_per_excess_delta() {
        let (tracker, fired) = counting_tracker(2, 1);

        for _ in 0..6 {
            assert!(tracker.admit(42), "without throttling every create is admitted");
        }
        // First fire at the third admit, second once the count exceeds the
        // last report by more than the high watermark.
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.count(42), 6);
    }

    #[test]
    fn count_drops_remove_entries() {
        let (tracker, _fired) = counting_tracker(10, 2);
        assert!(tracker.admit(5));
        assert!(tracker.admit(5));
        assert!(tracker.admit(6));
        assert_eq!(tracker.snapshot().len(), 2);

        tracker.release(5);
        tracker.release(5);
        tracker.release(6);
        assert!(tracker.snapshot().is_empty());
        assert_eq!(tracker.count(5), 0);
    }

    #[test]
    fn release_of_untracked_originator_is_ignored() {
        let tracker = ProxyTracker::new();
        tracker.release(999);
        assert_eq!(tracker.count(999), 0);
    }
}
