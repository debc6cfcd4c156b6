use super::{lock, Wrapped};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Fires an action at most once per `interval`. Calls inside the interval
/// are dropped; nothing is queued for later.
pub struct Throttle<A, R> {
    wrapped: Wrapped<A, R>,
    interval: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl<A, R> Throttle<A, R> {
    pub fn new<F>(action: F, interval: Duration) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            wrapped: Wrapped {
                action: Box::new(action),
                callback: None,
            },
            interval,
            last_fired: Mutex::new(None),
        }
    }

    /// Like [`Throttle::new`], passing every result to `callback`
    pub fn with_callback<F, C>(action: F, interval: Duration, callback: C) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        C: Fn(&R) + Send + Sync + 'static,
    {
        let mut throttle = Self::new(action, interval);
        throttle.wrapped.callback = Some(Box::new(callback));
        throttle
    }

    /// Run the action unless it fired less than `interval` ago.
    /// Returns the result when it fired.
    pub fn call(&self, args: A) -> Option<R> {
        let now = Instant::now();
        {
            let mut last = lock(&self.last_fired);
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.interval {
                    return None;
                }
            }
            *last = Some(now);
        }
        Some(self.wrapped.fire(args))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
