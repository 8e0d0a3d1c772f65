//! Fixed-interval cycle driver with prompt, cooperative shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared cancellation flag, set from the signal handler and observed by
/// every sleeping scheduler within one sleep slice.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one cycle type on a fixed interval.
///
/// The cycle executes once immediately, then the scheduler sleeps in small
/// slices up to the interval, checking the [`ShutdownFlag`] between slices.
/// A running cycle is never interrupted mid-stage; shutdown is honored at
/// the next slice boundary.
pub struct Scheduler {
    name: &'static str,
    interval: Duration,
    slice: Duration,
    shutdown: ShutdownFlag,
}

const SLEEP_SLICE: Duration = Duration::from_secs(10);

impl Scheduler {
    pub fn new(name: &'static str, interval: Duration, shutdown: ShutdownFlag) -> Self {
        Self {
            name,
            interval,
            slice: SLEEP_SLICE,
            shutdown,
        }
    }

    #[cfg(test)]
    fn with_slice(mut self, slice: Duration) -> Self {
        self.slice = slice;
        self
    }

    /// Drives `cycle` until shutdown is requested. Cycles never overlap:
    /// the next iteration starts only after the previous one returned.
    pub fn run(&self, mut cycle: impl FnMut()) {
        log::info!(
            target: "sched",
            "{} scheduler started, interval {:?}",
            self.name,
            self.interval
        );

        loop {
            cycle();

            if !self.sleep_until_next() {
                log::info!(target: "sched", "{} scheduler shutting down", self.name);
                return;
            }
        }
    }

    /// Sleeps up to one interval; `false` once shutdown was requested.
    fn sleep_until_next(&self) -> bool {
        let mut slept = Duration::ZERO;
        while slept < self.interval {
            if self.shutdown.is_requested() {
                return false;
            }
            let nap = self.slice.min(self.interval - slept);
            thread::sleep(nap);
            slept += nap;
        }

        !self.shutdown.is_requested()
    }
}
