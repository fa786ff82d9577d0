use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Escalating "no frames lately" alarm.
///
/// Armed with the initial threshold; each expiry extends the threshold by
/// `increment` so repeated silence produces linearly spaced warnings.
/// Every accepted frame re-arms it at the initial threshold.
#[derive(Debug, Clone)]
pub struct WatchdogTimer {
    initial: Duration,
    increment: Duration,
    step: Duration,
    deadline: Instant,
    silent_since: Instant,
}

impl WatchdogTimer {
    pub fn new(initial: Duration, increment: Duration, now: Instant) -> Self {
        Self {
            initial,
            increment,
            step: initial,
            deadline: now + initial,
            silent_since: now,
        }
    }

    pub fn rearm(&mut self, now: Instant) {
        self.step = self.initial;
        self.deadline = now + self.initial;
        self.silent_since = now;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Record an alarm and schedule the next one. Returns the threshold that
    /// just elapsed.
    pub fn expire(&mut self, now: Instant) -> Duration {
        let elapsed = self.step;
        self.step += self.increment;
        self.deadline = now + self.step;
        elapsed
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.silent_since)
    }
}

/// Shared handle driving a [`WatchdogTimer`] on the tokio clock.
pub struct Watchdog {
    timer: Mutex<WatchdogTimer>,
    rearmed: Notify,
}

impl Watchdog {
    pub fn new(initial: Duration, increment: Duration) -> Self {
        Self {
            timer: Mutex::new(WatchdogTimer::new(initial, increment, Instant::now())),
            rearmed: Notify::new(),
        }
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, WatchdogTimer> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel the pending alarm and start over at the initial threshold.
    pub fn reset(&self) {
        self.timer().rearm(Instant::now());
        self.rearmed.notify_one();
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> WatchdogTimer {
        self.timer().clone()
    }

    /// Run forever, warning each time the current threshold passes without
    /// a reset. Never touches the capture process.
    pub async fn run(&self) {
        loop {
            let deadline = self.timer().deadline();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let now = Instant::now();
                    let alarm = {
                        let mut timer = self.timer();
                        // A reset may have landed between waking and locking.
                        if timer.is_due(now) {
                            let threshold = timer.expire(now);
                            Some((threshold, timer.silent_for(now), timer.step()))
                        } else {
                            None
                        }
                    };
                    let Some((threshold, silent, next)) = alarm else {
                        continue;
                    };
                    warn!(
                        threshold_secs = threshold.as_secs(),
                        silent_secs = silent.as_secs(),
                        next_alarm_secs = next.as_secs(),
                        "no frames received from capture process within {:?}",
                        threshold
                    );
                }
                _ = self.rearmed.notified() => {
                    debug!("watchdog re-armed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TEN: Duration = Duration::from_secs(10);

    #[test]
    fn expiry_escalates_linearly() {
        let start = Instant::now();
        let mut timer = WatchdogTimer::new(TEN, TEN, start);
        assert_eq!(timer.deadline(), start + TEN);
        assert!(!timer.is_due(start + Duration::from_secs(9)));
        assert!(timer.is_due(start + TEN));

        let t1 = start + TEN;
        assert_eq!(timer.expire(t1), TEN);
        assert_eq!(timer.deadline(), t1 + Duration::from_secs(20));

        let t2 = t1 + Duration::from_secs(20);
        assert_eq!(timer.expire(t2), Duration::from_secs(20));
        assert_eq!(timer.deadline(), t2 + Duration::from_secs(30));
        assert_eq!(timer.silent_for(t2), Duration::from_secs(30));
    }

    #[test]
    fn rearm_restores_initial_step() {
        let start = Instant::now();
        let mut timer = WatchdogTimer::new(TEN, TEN, start);
        timer.expire(start + TEN);
        timer.expire(start + Duration::from_secs(30));

        let later = start + Duration::from_secs(45);
        timer.rearm(later);
        assert_eq!(timer.step(), TEN);
        assert_eq!(timer.deadline(), later + TEN);
        assert_eq!(timer.silent_for(later), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_keeps_alarming_without_frames() {
        let watchdog = Arc::new(Watchdog::new(TEN, TEN));
        let task = tokio::spawn({
            let watchdog = Arc::clone(&watchdog);
            async move { watchdog.run().await }
        });

        // Alarms at 10s and 30s; the next one is due at 60s.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(watchdog.snapshot().step(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(watchdog.snapshot().step(), Duration::from_secs(40));

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_the_alarm() {
        let watchdog = Arc::new(Watchdog::new(TEN, TEN));
        let task = tokio::spawn({
            let watchdog = Arc::clone(&watchdog);
            async move { watchdog.run().await }
        });

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(8)).await;
            watchdog.reset();
        }
        assert_eq!(watchdog.snapshot().step(), TEN);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(watchdog.snapshot().step(), Duration::from_secs(20));

        task.abort();
    }
}
