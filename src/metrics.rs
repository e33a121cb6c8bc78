//! Observability side channel for per-event processing delay.
//!
//! The detection agent records the observed-to-expected delay of every event;
//! a flush task it owns aggregates and logs the figures once per interval.
//! This is best-effort metrics only, not part of the correctness contract:
//! `record` never blocks and drops samples when the channel is full.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::bus::Shutdown;

const CHANNEL_CAPACITY: usize = 64;

/// Default aggregate log interval.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Recording side, held by the agent's handler.
pub struct DelayReporter {
    tx: mpsc::Sender<Duration>,
}

/// Flush side, run as a task owned by the agent and torn down with it.
pub struct DelayFlush {
    rx: mpsc::Receiver<Duration>,
    interval: Duration,
}

impl DelayReporter {
    pub fn new(interval: Duration) -> (Self, DelayFlush) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx }, DelayFlush { rx, interval })
    }

    /// Record one sample. Non-blocking; drops the sample if the flush task
    /// is behind.
    pub fn record(&self, delay: Duration) {
        let _ = self.tx.try_send(delay);
    }
}

impl DelayFlush {
    /// Aggregate and log until shutdown.
    pub async fn run(mut self, shutdown: Shutdown) {
        let mut delays: Vec<Duration> = Vec::new();
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,

                received = self.rx.recv() => match received {
                    Some(delay) => delays.push(delay),
                    // All reporters dropped.
                    None => return,
                },

                _ = tick.tick() => flush(&mut delays),
            }
        }
    }
}

fn flush(delays: &mut Vec<Duration>) {
    if delays.is_empty() {
        return;
    }

    let total: Duration = delays.iter().sum();
    let average = total / delays.len() as u32;
    info!(
        events = delays.len(),
        average_delay = ?average,
        "events processed since last report"
    );
    delays.clear();
}
