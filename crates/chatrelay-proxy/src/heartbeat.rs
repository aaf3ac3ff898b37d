//! Keep-alive timer for relayed streams.
//!
//! Each open stream owns one [`Heartbeat`]. Creating it bumps the shared
//! [`StreamGauge`]; dropping it (which happens unconditionally when the
//! relay closes) releases the timer and decrements the gauge again.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::trace;

/// Count of heartbeat timers currently alive.
#[derive(Debug, Clone, Default)]
pub struct StreamGauge(Arc<AtomicUsize>);

impl StreamGauge {
    /// Number of relayed streams whose heartbeat is still running.
    pub fn active(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Periodic keep-alive timer tied to one relayed stream.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
    gauge: StreamGauge,
}

impl Heartbeat {
    /// Start a timer whose first tick fires one full `period` from now.
    pub fn start(period: Duration, gauge: &StreamGauge) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        gauge.0.fetch_add(1, Ordering::AcqRel);
        trace!(period_ms = period.as_millis(), "heartbeat started");

        Self {
            interval,
            gauge: gauge.clone(),
        }
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.gauge.0.fetch_sub(1, Ordering::AcqRel);
        trace!("heartbeat stopped");
    }
}
