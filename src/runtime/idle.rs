//! Idle tracking for proactive checks

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Tracks how long the session has been quiet and whether the client is
/// still playing audio
#[derive(Debug)]
pub(crate) struct IdleMonitor {
    check_interval: Duration,
    last_activity: Instant,
    client_playing: bool,
}

impl IdleMonitor {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            last_activity: Instant::now(),
            client_playing: false,
        }
    }

    /// Periodic check timer; the first tick is one interval from now
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    pub fn mark_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn client_playing(&self) -> bool {
        self.client_playing
    }

    pub fn set_client_playing(&mut self, playing: bool) {
        self.client_playing = playing;
        if !playing {
            self.mark_activity();
        }
    }
}
