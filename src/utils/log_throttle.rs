use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Window {
    started_at: Instant,
    suppressed: u64,
}

/// Collapses bursts of identical log lines into one line per window.
///
/// Owned by whoever emits the logs, so two guards never share counters.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    windows: HashMap<&'static str, Window>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            windows: HashMap::new(),
        }
    }

    /// Returns `Some(suppressed_count)` when a log for `key` should be emitted,
    /// otherwise `None` and the event is counted against the active window.
    pub fn should_emit(&mut self, key: &'static str) -> Option<u64> {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(window) if now.duration_since(window.started_at) >= self.interval => {
                let suppressed = window.suppressed;
                window.started_at = now;
                window.suppressed = 0;
                Some(suppressed)
            }
            Some(window) => {
                window.suppressed += 1;
                None
            }
            None => {
                self.windows.insert(
                    key,
                    Window {
                        started_at: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LogThrottle;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn emits_then_suppresses_then_emits_with_count() {
        let mut throttle = LogThrottle::new(Duration::from_millis(20));

        assert_eq!(throttle.should_emit("guard.loading"), Some(0));
        assert_eq!(throttle.should_emit("guard.loading"), None);
        assert_eq!(throttle.should_emit("guard.loading"), None);

        sleep(Duration::from_millis(30));
        assert_eq!(throttle.should_emit("guard.loading"), Some(2));
    }

    #[test]
    fn keys_are_counted_independently() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(throttle.should_emit("a"), Some(0));
        assert_eq!(throttle.should_emit("b"), Some(0));
        assert_eq!(throttle.should_emit("a"), None);
    }
}
