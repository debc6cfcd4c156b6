//! Rate limiting wrappers around caller-supplied actions.
//!
//! - [`Debounce`] collapses a burst of calls into one delayed (or one
//!   leading-edge) firing.
//! - [`Throttle`] fires at most once per interval and drops the rest.
//!
//! Both hand the action's return value to an optional callback, once per
//! actual firing.

mod debounce;
mod throttle;

pub use debounce::Debounce;
pub use throttle::Throttle;

use std::sync::{Mutex, MutexGuard, PoisonError};

type Action<A, R> = Box<dyn Fn(A) -> R + Send + Sync>;
type Callback<R> = Box<dyn Fn(&R) + Send + Sync>;

/// An action plus the callback that receives its results
struct Wrapped<A, R> {
    action: Action<A, R>,
    callback: Option<Callback<R>>,
}

impl<A, R> Wrapped<A, R> {
    fn fire(&self, args: A) -> R {
        let result = (self.action)(args);
        if let Some(callback) = &self.callback {
            callback(&result);
        }
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
