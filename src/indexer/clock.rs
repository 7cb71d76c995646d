use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for the indexing loop.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

type SleepHook = Box<dyn FnMut(usize) + Send>;

#[derive(Default)]
struct ManualClockState {
    now: Duration,
    sleeps: Vec<Duration>,
    on_sleep: Option<SleepHook>,
}

/// Virtual clock: `sleep` returns immediately after advancing time.
///
/// An optional hook runs on every sleep with the 1-based sleep count, which
/// lets a test move a mock chain forward while the loop is "waiting".
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualClockState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualClockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on_sleep(&self, hook: impl FnMut(usize) + Send + 'static) {
        self.state().on_sleep = Some(Box::new(hook));
    }

    pub fn advance(&self, duration: Duration) {
        self.state().now += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    pub fn sleep_count(&self) -> usize {
        self.state().sleeps.len()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.now += duration;
        state.sleeps.push(duration);
        let count = state.sleeps.len();
        if let Some(hook) = state.on_sleep.as_mut() {
            hook(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_manual_clock_advances_without_waiting() {
        let clock = ManualClock::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_hook = Arc::clone(&seen);
        clock.on_sleep(move |count| seen_hook.store(count, Ordering::SeqCst));

        clock.sleep(Duration::from_secs(10)).await;
        clock.sleep(Duration::from_secs(10)).await;
        clock.advance(Duration::from_millis(5));

        assert_eq!(clock.now(), Duration::from_millis(20_005));
        assert_eq!(clock.sleep_count(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tokio_clock_sleeps_at_least_the_duration() {
        let clock = TokioClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() - before >= Duration::from_millis(5));
    }
}
