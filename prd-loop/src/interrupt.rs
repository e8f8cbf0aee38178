//! Cooperative stop requests (Ctrl+C, SIGTERM).
//!
//! The handler only sets a flag. The loop checks it at the top of every
//! iteration and inside its waits, so an in-flight agent call always runs to
//! completion before the loop pauses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM to this flag. Can only be installed once per
    /// process.
    pub fn install_handler(&self) -> Result<()> {
        let flag = self.0.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("install interrupt handler")?;
        Ok(())
    }

    pub fn request(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            info!("stop requested");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` when the full duration elapsed, `false` when cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion_without_request() {
        let flag = StopFlag::new();
        let start = Instant::now();
        assert!(flag.sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn request_cuts_sleep_short() {
        let flag = StopFlag::new();
        let remote = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.request();
        });

        let start = Instant::now();
        assert!(!flag.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(flag.is_requested());
        handle.join().expect("join");
    }
}
