//! Camera health bookkeeping
//!
//! Shared between the capture supervisor (success/failure counting) and the
//! refresher (refresh timestamps, disabled flag). Uses its own lock so a
//! slow health check can never block frame publication.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct HealthInner {
    last_success: Option<Instant>,
    consecutive_failures: u32,
    last_refresh: Option<Instant>,
    disabled: bool,
}

/// Synchronized camera health state
#[derive(Debug, Default)]
pub struct CameraHealth {
    inner: Mutex<HealthInner>,
}

/// Point-in-time health snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct CameraHealthStatus {
    pub disabled: bool,
    pub consecutive_failures: u32,
    pub last_success_ms: Option<u64>,
    pub last_refresh_ms: Option<u64>,
}

impl CameraHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capture completed within the slow threshold
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.last_success = Some(Instant::now());
        inner.consecutive_failures = 0;
    }

    /// A capture failed or was slow; returns the new consecutive count
    pub fn record_failure(&self) -> u32 {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.consecutive_failures
    }

    pub fn reset_failures(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Record a refresh attempt (successful or not), for cooldown gating
    pub fn mark_refreshed(&self) {
        self.lock().last_refresh = Some(Instant::now());
    }

    /// Time since the last refresh attempt
    pub fn refresh_elapsed(&self) -> Option<Duration> {
        self.lock().last_refresh.map(|at| at.elapsed())
    }

    pub fn last_success_elapsed(&self) -> Option<Duration> {
        self.lock().last_success.map(|at| at.elapsed())
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.lock().disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.lock().disabled
    }

    pub fn snapshot(&self) -> CameraHealthStatus {
        let inner = self.lock();
        CameraHealthStatus {
            disabled: inner.disabled,
            consecutive_failures: inner.consecutive_failures,
            last_success_ms: inner.last_success.map(|at| at.elapsed().as_millis() as u64),
            last_refresh_ms: inner.last_refresh.map(|at| at.elapsed().as_millis() as u64),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HealthInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_success() {
        let health = CameraHealth::new();
        assert_eq!(health.record_failure(), 1);
        assert_eq!(health.record_failure(), 2);
        health.record_success();
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.record_failure(), 1);
    }

    #[test]
    fn snapshot_reports_disabled_flag() {
        let health = CameraHealth::new();
        assert!(!health.snapshot().disabled);
        health.set_disabled(true);
        assert!(health.snapshot().disabled);
        assert!(health.is_disabled());
    }

    #[test]
    fn refresh_elapsed_tracks_attempts() {
        let health = CameraHealth::new();
        assert!(health.refresh_elapsed().is_none());
        health.mark_refreshed();
        assert!(health.refresh_elapsed().unwrap() < Duration::from_secs(1));
    }
}
