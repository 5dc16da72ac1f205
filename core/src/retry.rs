use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff shared by every reconnect loop in the workspace:
/// start at `initial`, double on each failure, clamp at `cap`, reset on
/// success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    /// The broker/fabric reconnect shape: 3s doubling to a 60s ceiling.
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(60))
    }

    /// Returns the delay to wait now and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.cap, self.current.saturating_mul(2));
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Sleep that aborts early on cancellation. Returns false when cancelled.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
