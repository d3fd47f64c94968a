//! Transmit/receive activity indicators
//!
//! Updated from the capture callback and the event pump, so both marks are
//! plain atomics holding microseconds since the monitor was created.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::constants::FRAME_TIME_MS;

const NEVER: u64 = u64::MAX;

pub struct ActivityMonitor {
    origin: Instant,
    window: Duration,
    last_sent: AtomicU64,
    last_received: AtomicU64,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(FRAME_TIME_MS as u64))
    }
}

impl ActivityMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            origin: Instant::now(),
            window,
            last_sent: AtomicU64::new(NEVER),
            last_received: AtomicU64::new(NEVER),
        }
    }

    pub fn record_sent(&self) {
        self.last_sent.store(self.now_micros(), Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.last_received.store(self.now_micros(), Ordering::Relaxed);
    }

    pub fn is_transmitting(&self) -> bool {
        self.within_window(&self.last_sent)
    }

    pub fn is_receiving(&self) -> bool {
        self.within_window(&self.last_received)
    }

    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn within_window(&self, mark: &AtomicU64) -> bool {
        let mark = mark.load(Ordering::Relaxed);
        if mark == NEVER {
            return false;
        }
        self.now_micros().saturating_sub(mark) <= self.window.as_micros() as u64
    }
}
