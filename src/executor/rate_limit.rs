use std::time::Duration;

use tokio::time::Instant;

use crate::target::Channel;

/// Chat-style command channels are throttled server-side below this spacing.
pub const TEXT_COMMAND_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum spacing between consecutive world mutations
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(placements_per_second: f64, channel: Channel) -> Self {
        let base = if placements_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / placements_per_second)
        } else {
            Duration::ZERO
        };
        let interval = match channel {
            Channel::TextCommand => base.max(TEXT_COMMAND_MIN_INTERVAL),
            Channel::DirectApi => base,
        };
        Self { interval, last: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next mutation is allowed, then claim the slot.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last {
            let next = last + self.interval;
            if Instant::now() < next {
                tokio::time::sleep_until(next).await;
            }
        }
        self.last = Some(Instant::now());
    }
}
