//! Keepalive probing
//!
//! The outbound pump owns a `Heartbeat` that schedules pings; the inbound
//! pump owns the matching `PongRecorder` and stamps every pong it reads. The
//! two halves share only a `watch` channel holding the last pong time.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// What the outbound pump should do on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Peer is alive; send the next ping
    Ping,
    /// No pong within the timeout; tear the connection down
    Expired,
}

/// Inbound side: records pong arrivals
#[derive(Debug)]
pub struct PongRecorder {
    last_pong: watch::Sender<Instant>,
}

impl PongRecorder {
    /// Mark the peer as alive as of now
    pub fn record(&self) {
        self.last_pong.send_replace(Instant::now());
    }
}

/// Outbound side: ping schedule and liveness check
#[derive(Debug)]
pub struct Heartbeat {
    ticker: Interval,
    timeout: Duration,
    last_pong: watch::Receiver<Instant>,
}

impl Heartbeat {
    /// Create a linked heartbeat pair. The first ping is due one `interval`
    /// from now; the connection counts as alive at creation.
    pub fn new(interval: Duration, timeout: Duration) -> (PongRecorder, Heartbeat) {
        let now = Instant::now();
        let (tx, rx) = watch::channel(now);

        let mut ticker = time::interval_at(now + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let heartbeat = Heartbeat {
            ticker,
            timeout,
            last_pong: rx,
        };
        (PongRecorder { last_pong: tx }, heartbeat)
    }

    /// Wait for the next tick and decide whether to ping or give up
    pub async fn tick(&mut self) -> Probe {
        self.ticker.tick().await;
        if self.last_pong.borrow().elapsed() > self.timeout {
            Probe::Expired
        } else {
            Probe::Ping
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_interval() {
        let (_recorder, mut heartbeat) = Heartbeat::new(Duration::from_secs(5), Duration::from_secs(12));
        let start = Instant::now();

        assert_eq!(heartbeat.tick().await, Probe::Ping);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_without_pong() {
        let (_recorder, mut heartbeat) = Heartbeat::new(Duration::from_secs(5), Duration::from_secs(12));

        assert_eq!(heartbeat.tick().await, Probe::Ping); // t=5
        assert_eq!(heartbeat.tick().await, Probe::Ping); // t=10
        assert_eq!(heartbeat.tick().await, Probe::Expired); // t=15
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_alive() {
        let (recorder, mut heartbeat) = Heartbeat::new(Duration::from_secs(5), Duration::from_secs(12));

        for _ in 0..10 {
            assert_eq!(heartbeat.tick().await, Probe::Ping);
            recorder.record();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_recorder_keeps_last_value() {
        let (recorder, mut heartbeat) = Heartbeat::new(Duration::from_secs(5), Duration::from_secs(12));
        drop(recorder);

        assert_eq!(heartbeat.tick().await, Probe::Ping);
        assert_eq!(heartbeat.tick().await, Probe::Ping);
        assert_eq!(heartbeat.tick().await, Probe::Expired);
    }
}
