//! Ping/pong liveness tracking.
//!
//! Pure bookkeeping; the driver owns the timers. A ping is sent every
//! `interval`. If no pong (application `pong` frame or transport Pong)
//! arrives within `timeout` of an unanswered ping, the socket is treated as
//! dead.

use std::time::Duration;

use tokio::time::Instant;

/// Result of checking the heartbeat at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// No outstanding ping, or still inside the pong window.
    Alive,
    /// An outstanding ping went unanswered past the timeout.
    TimedOut,
}

/// Heartbeat state for one socket session.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    awaiting_since: Option<Instant>,
}

impl Heartbeat {
    /// Track a new session.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            awaiting_since: None,
        }
    }

    /// Ping period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record that a ping went out at `now`. An earlier unanswered ping keeps
    /// its original deadline.
    pub fn ping_sent(&mut self, now: Instant) {
        if self.awaiting_since.is_none() {
            self.awaiting_since = Some(now);
        }
    }

    /// Record a pong.
    pub fn pong_received(&mut self) {
        self.awaiting_since = None;
    }

    /// When the outstanding ping expires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.awaiting_since.map(|since| since + self.timeout)
    }

    /// Status at `now`.
    pub fn check(&self, now: Instant) -> HeartbeatStatus {
        match self.deadline() {
            Some(deadline) if now >= deadline => HeartbeatStatus::TimedOut,
            _ => HeartbeatStatus::Alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hb() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(25), Duration::from_secs(10))
    }

    #[test]
    fn alive_without_outstanding_ping() {
        let hb = hb();
        assert_eq!(hb.deadline(), None);
        assert_eq!(hb.check(Instant::now()), HeartbeatStatus::Alive);
    }

    #[test]
    fn times_out_after_window() {
        let mut hb = hb();
        let t0 = Instant::now();
        hb.ping_sent(t0);
        assert_eq!(hb.check(t0 + Duration::from_secs(9)), HeartbeatStatus::Alive);
        assert_eq!(hb.check(t0 + Duration::from_secs(10)), HeartbeatStatus::TimedOut);
    }

    #[test]
    fn pong_clears_deadline() {
        let mut hb = hb();
        let t0 = Instant::now();
        hb.ping_sent(t0);
        hb.pong_received();
        assert_eq!(hb.check(t0 + Duration::from_secs(60)), HeartbeatStatus::Alive);
    }

    #[test]
    fn repeated_ping_keeps_first_deadline() {
        let mut hb = hb();
        let t0 = Instant::now();
        hb.ping_sent(t0);
        hb.ping_sent(t0 + Duration::from_secs(5));
        assert_eq!(hb.deadline(), Some(t0 + Duration::from_secs(10)));
    }
}
