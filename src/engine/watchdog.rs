use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, warn};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Cooperative cancellation flag shared by all workers of a run.
#[derive(Debug, Default)]
pub struct Cancellation {
    cancelled: AtomicBool,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs `f` while a watchdog thread cancels `cancellation` once `timeout`
/// has passed. The watchdog stops as soon as `f` returns.
pub fn with_deadline<F, R>(timeout: Duration, cancellation: &Cancellation, f: F) -> R
where
    F: FnOnce() -> R,
{
    crossbeam::thread::scope(|scope| {
        let (done, finished) = channel::bounded::<()>(0);

        scope.spawn(move |_| match finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "global timeout of {:?} reached, remaining paths are cut off",
                    timeout
                );
                cancellation.cancel();
            }
            _ => debug!("exploration finished before the global timeout"),
        });

        let result = f();
        drop(done);

        result
    })
    .expect("watchdog thread does not panic")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_finishing_in_time_is_not_cancelled() {
        let cancellation = Cancellation::new();

        let value = with_deadline(Duration::from_secs(60), &cancellation, || 42);

        assert_eq!(value, 42);
        assert!(!cancellation.is_cancelled());
    }

    #[test]
    fn expired_deadlines_cancel() {
        let cancellation = Cancellation::new();

        with_deadline(Duration::ZERO, &cancellation, || {
            while !cancellation.is_cancelled() {
                std::thread::yield_now();
            }
        });

        assert!(cancellation.is_cancelled());
    }
}
