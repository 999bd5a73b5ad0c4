//! Liveness ticker for the lock holder.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Interval that only ticks while armed.
///
/// The actor arms it on entering `ACQUIRED` and disarms it on leaving, so
/// no heartbeat can fire more than one period after the lock was lost.
pub struct Heartbeat {
    period: Duration,
    interval: Option<Interval>,
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Starts ticking one period from now. No-op if already armed.
    pub fn arm(&mut self) {
        if self.interval.is_none() {
            let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.interval = Some(interval);
        }
    }

    pub fn disarm(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Completes on the next tick; never completes while disarmed.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_armed_heartbeat_ticks_after_one_period() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(8));
        heartbeat.arm();

        let start = Instant::now();
        heartbeat.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_heartbeat_never_ticks() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(8));
        heartbeat.arm();
        heartbeat.disarm();

        let result = tokio::time::timeout(Duration::from_secs(60), heartbeat.tick()).await;
        assert!(result.is_err());
        assert!(!heartbeat.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_keeps_existing_schedule() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(8));
        heartbeat.arm();
        tokio::time::advance(Duration::from_secs(5)).await;
        heartbeat.arm();

        let start = Instant::now();
        heartbeat.tick().await;
        assert!(start.elapsed() <= Duration::from_secs(3));
    }
}
