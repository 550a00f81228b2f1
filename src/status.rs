// Status module - telemetry about the backend itself
//
// statsd periodically asks every backend for its own status. This backend
// reports when it last flushed and when a write last failed.

use std::sync::atomic::{AtomicI64, Ordering};

/// Scope reported with every status value
pub const STATUS_SCOPE: &str = "mongoDB";

/// Timestamps describing the backend's recent activity
///
/// Shared between the flush dispatcher and its write tasks via `Arc`.
/// Values are advisory; concurrent updates from overlapping flush cycles
/// resolve as last write wins.
#[derive(Debug)]
pub struct BackendStatus {
    /// Unix timestamp of the most recent flush cycle
    last_flush: AtomicI64,

    /// Unix timestamp of the most recent failed write
    last_exception: AtomicI64,
}

impl BackendStatus {
    /// Creates the status with both timestamps set to the startup time
    pub fn new(startup_time: i64) -> Self {
        BackendStatus {
            last_flush: AtomicI64::new(startup_time),
            last_exception: AtomicI64::new(startup_time),
        }
    }

    pub fn last_flush(&self) -> i64 {
        self.last_flush.load(Ordering::Relaxed)
    }

    pub fn last_exception(&self) -> i64 {
        self.last_exception.load(Ordering::Relaxed)
    }

    pub fn record_flush(&self, time: i64) {
        self.last_flush.store(time, Ordering::Relaxed);
    }

    pub fn record_exception(&self, time: i64) {
        self.last_exception.store(time, Ordering::Relaxed);
    }

    /// Reports every status field through `emit(scope, name, value)`
    ///
    /// # Example
    /// ```
    /// status.on_status(|scope, name, value| println!("{scope}.{name}={value}"));
    /// ```
    pub fn on_status<F>(&self, mut emit: F)
    where
        F: FnMut(&str, &str, i64),
    {
        emit(STATUS_SCOPE, "last_flush", self.last_flush());
        emit(STATUS_SCOPE, "last_exception", self.last_exception());
    }
}
