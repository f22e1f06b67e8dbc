// Per-connection heartbeat timing.
//
// The server pings on a fixed interval and expects a pong within a short
// timeout. The timeout is strictly shorter than the interval, so a ping is
// never due while a pong is outstanding. Deadlines are plain state on this
// struct; dropping it (socket teardown) cancels everything, so no timer can
// ever fire against an evicted connection.

use std::time::Duration;

use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};

pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const PONG_TIMEOUT: Duration = Duration::from_secs(1);

/// What the socket pump should do next.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LivenessEvent {
    /// The interval elapsed: send a ping.
    SendPing,
    /// No pong arrived within the timeout: the connection is dead.
    Dead,
}

pub(crate) struct Liveness {
    ticker: Interval,
    pong_deadline: Option<Instant>,
    timeout: Duration,
}

impl Liveness {
    pub(crate) fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        debug_assert!(pong_timeout < ping_interval);
        let mut ticker = interval(ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset(); // skip the immediate first tick
        Self { ticker, pong_deadline: None, timeout: pong_timeout }
    }

    /// Wait for the next liveness event. Cancellation-safe: intended to be
    /// polled inside the socket pump's `select!`.
    pub(crate) async fn next_event(&mut self) -> LivenessEvent {
        match self.pong_deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                LivenessEvent::Dead
            }
            None => {
                self.ticker.tick().await;
                LivenessEvent::SendPing
            }
        }
    }

    /// Record that a ping went out; a pong is now due.
    pub(crate) fn ping_sent(&mut self) {
        self.pong_deadline = Some(Instant::now() + self.timeout);
    }

    /// Record a pong: the pending deadline is cancelled.
    pub(crate) fn pong_received(&mut self) {
        self.pong_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{Liveness, LivenessEvent, PING_INTERVAL, PONG_TIMEOUT};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn first_event_is_a_ping_after_one_interval() {
        let mut liveness = Liveness::new(PING_INTERVAL, PONG_TIMEOUT);
        let started = tokio::time::Instant::now();

        assert_eq!(liveness.next_event().await, LivenessEvent::SendPing);
        assert!(started.elapsed() >= PING_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_reports_dead_after_the_timeout() {
        let mut liveness = Liveness::new(PING_INTERVAL, PONG_TIMEOUT);

        assert_eq!(liveness.next_event().await, LivenessEvent::SendPing);
        liveness.ping_sent();
        let pinged_at = tokio::time::Instant::now();

        assert_eq!(liveness.next_event().await, LivenessEvent::Dead);
        let waited = pinged_at.elapsed();
        assert!(waited >= PONG_TIMEOUT);
        assert!(waited < PING_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_before_timeout_survives_many_cycles() {
        let mut liveness = Liveness::new(PING_INTERVAL, PONG_TIMEOUT);

        for _ in 0..10 {
            assert_eq!(liveness.next_event().await, LivenessEvent::SendPing);
            liveness.ping_sent();
            // pong arrives well within the window
            tokio::time::sleep(Duration::from_millis(100)).await;
            liveness.pong_received();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_pong_still_cancels_a_deadline_that_has_not_fired() {
        let mut liveness = Liveness::new(PING_INTERVAL, PONG_TIMEOUT);

        assert_eq!(liveness.next_event().await, LivenessEvent::SendPing);
        liveness.ping_sent();
        tokio::time::sleep(PONG_TIMEOUT - Duration::from_millis(1)).await;
        liveness.pong_received();

        // next event is the next ping, not a death
        assert_eq!(liveness.next_event().await, LivenessEvent::SendPing);
    }
}
