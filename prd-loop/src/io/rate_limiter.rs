//! Hourly call budget persisted in `.prd/rate_limit.json`.
//!
//! Calls are counted per calendar hour of the local clock, not over a rolling
//! sixty minutes. Every operation first rolls the window forward when the
//! hour has changed, and persists the reset before the ceiling is checked.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::window::{hour_key, seconds_until_next_hour};

/// Source of wall-clock time for window bookkeeping.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// On-disk window record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateWindow {
    pub call_count: u32,
    pub hour_start: String,
    pub max_calls: u32,
}

/// Snapshot for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub call_count: u32,
    pub max_calls: u32,
    pub remaining: u32,
    pub hour_start: String,
    /// Seconds until reset when the budget is exhausted, otherwise 0.
    pub wait_seconds: u64,
}

pub struct RateLimiter<C: Clock = SystemClock> {
    path: PathBuf,
    max_calls: u32,
    window: RateWindow,
    clock: C,
}

impl<C: Clock> RateLimiter<C> {
    /// Load the persisted window (or start a fresh one) using `clock`.
    ///
    /// An unreadable window file is treated as a fresh window rather than an
    /// error: losing the count can only under-count.
    pub fn with_clock(path: &Path, max_calls: u32, clock: C) -> Result<Self> {
        let window = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), err = %err, "corrupt rate limit window, resetting");
                RateWindow::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RateWindow::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", path.display()));
            }
        };
        let mut limiter = Self {
            path: path.to_path_buf(),
            max_calls,
            window: RateWindow {
                max_calls,
                ..window
            },
            clock,
        };
        limiter.roll_window()?;
        Ok(limiter)
    }

    /// True while calls remain in the current hour.
    pub fn can_call(&mut self) -> Result<bool> {
        self.roll_window()?;
        Ok(self.window.call_count < self.max_calls)
    }

    /// Count one call and persist it. Returns the count for this hour.
    pub fn record_call(&mut self) -> Result<u32> {
        self.roll_window()?;
        self.window.call_count = self.window.call_count.saturating_add(1);
        self.save()?;
        debug!(
            call_count = self.window.call_count,
            max_calls = self.max_calls,
            "call recorded"
        );
        Ok(self.window.call_count)
    }

    pub fn remaining(&mut self) -> Result<u32> {
        self.roll_window()?;
        Ok(self.max_calls.saturating_sub(self.window.call_count))
    }

    /// Seconds until the top of the next hour.
    pub fn seconds_until_reset(&self) -> u64 {
        seconds_until_next_hour(self.clock.now())
    }

    pub fn status(&mut self) -> Result<RateLimitStatus> {
        let can_call = self.can_call()?;
        Ok(RateLimitStatus {
            call_count: self.window.call_count,
            max_calls: self.max_calls,
            remaining: self.remaining()?,
            hour_start: self.window.hour_start.clone(),
            wait_seconds: if can_call {
                0
            } else {
                self.seconds_until_reset()
            },
        })
    }

    fn roll_window(&mut self) -> Result<()> {
        let current = hour_key(self.clock.now());
        if self.window.hour_start == current {
            return Ok(());
        }
        if !self.window.hour_start.is_empty() {
            info!(
                previous = %self.window.hour_start,
                current = %current,
                "rate limit window reset"
            );
        }
        self.window = RateWindow {
            call_count: 0,
            hour_start: current,
            max_calls: self.max_calls,
        };
        self.save()
    }

    fn save(&self) -> Result<()> {
        let buf = serde_json::to_string(&self.window).context("serialize rate limit window")?;
        super::write_atomic(&self.path, &buf)
    }
}
