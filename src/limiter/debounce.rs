use super::{lock, Wrapped};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Default)]
struct Timer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Delays an action until calls stop arriving for `delay`.
///
/// With `immediate` set, the first call of a quiet period fires right away.
/// Later calls inside the window are held back and restart it; the latest of
/// them fires when the window lapses. A call landing just after the window
/// lapses starts a new quiet period and fires immediately again.
///
/// Timers are tokio tasks, so `call` must run inside a runtime.
pub struct Debounce<A, R> {
    wrapped: Arc<Wrapped<A, R>>,
    delay: Duration,
    immediate: bool,
    timer: Arc<Mutex<Timer>>,
}

impl<A, R> Debounce<A, R>
where
    A: Send + 'static,
    R: 'static,
{
    pub fn new<F>(action: F, delay: Duration, immediate: bool) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::build(Box::new(action), None, delay, immediate)
    }

    /// Like [`Debounce::new`], passing every result to `callback`
    pub fn with_callback<F, C>(action: F, delay: Duration, immediate: bool, callback: C) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        C: Fn(&R) + Send + Sync + 'static,
    {
        Self::build(Box::new(action), Some(Box::new(callback)), delay, immediate)
    }

    fn build(
        action: super::Action<A, R>,
        callback: Option<super::Callback<R>>,
        delay: Duration,
        immediate: bool,
    ) -> Self {
        Self {
            wrapped: Arc::new(Wrapped { action, callback }),
            delay,
            immediate,
            timer: Arc::new(Mutex::new(Timer::default())),
        }
    }

    pub fn call(&self, args: A) {
        let mut timer = lock(&self.timer);

        let was_pending = match timer.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };

        let (leading, trailing) = if self.immediate && !was_pending {
            (Some(args), None)
        } else {
            (None, Some(args))
        };

        timer.generation += 1;
        let generation = timer.generation;
        let wrapped = self.wrapped.clone();
        let slot = self.timer.clone();
        let delay = self.delay;

        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(args) = trailing {
                wrapped.fire(args);
            }
            let mut timer = lock(&slot);
            if timer.generation == generation {
                timer.handle = None;
            }
        }));
        drop(timer);

        if let Some(args) = leading {
            self.wrapped.fire(args);
        }
    }

    /// Whether a delay window is currently open
    pub fn is_pending(&self) -> bool {
        lock(&self.timer).handle.is_some()
    }

    /// Drop a pending trailing call, if any
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.timer).handle.take() {
            handle.abort();
        }
    }
}
