//! CameraRefresher - cooldown-gated stop-and-reinitialize
//!
//! ## Responsibilities
//!
//! - Cycle the capture device: stop the supervisor, close the source, clear
//!   the buffer, settle, reopen, restart the supervisor
//! - Enforce the refresh cooldown; a refresh inside the window is a no-op
//!   unless forced or the staleness is an emergency
//! - Watch frame freshness and escalate when the buffer goes stale
//!
//! A failed reinitialization marks the camera disabled instead of retrying
//! in a tight loop; the freshness watch retries on its own schedule.

use super::frame_buffer::FrameBuffer;
use super::health::CameraHealth;
use super::source::FrameSource;
use super::supervisor::{CaptureSupervisor, RefreshRequest};
use crate::config::RefreshConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// CameraRefresher instance
pub struct CameraRefresher {
    source: Arc<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    health: Arc<CameraHealth>,
    supervisor: Arc<CaptureSupervisor>,
    config: RefreshConfig,
    started_at: Instant,
    // Serializes refreshes; two can never run concurrently
    refresh_lock: Mutex<()>,
}

impl CameraRefresher {
    pub fn new(
        source: Arc<dyn FrameSource>,
        buffer: Arc<FrameBuffer>,
        health: Arc<CameraHealth>,
        supervisor: Arc<CaptureSupervisor>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            source,
            buffer,
            health,
            supervisor,
            config,
            started_at: Instant::now(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Stop and reinitialize the camera.
    ///
    /// Returns `Ok(false)` when the cooldown suppressed the refresh, and
    /// `Ok(true)` after an actual reinitialization. A refresh inside the
    /// cooldown window proceeds anyway when `force` is set or the buffer
    /// staleness has crossed the emergency threshold.
    pub async fn refresh(&self, force: bool, reason: &str) -> Result<bool> {
        let _guard = self.refresh_lock.lock().await;

        if !force && !self.is_emergency() {
            if let Some(elapsed) = self.health.refresh_elapsed() {
                if elapsed < self.config.cooldown() {
                    tracing::debug!(
                        reason,
                        elapsed_ms = elapsed.as_millis() as u64,
                        cooldown_ms = self.config.cooldown().as_millis() as u64,
                        "Refresh suppressed, cooldown active"
                    );
                    return Ok(false);
                }
            }
        }

        tracing::info!(force, reason, "Refreshing camera");
        self.health.mark_refreshed();

        self.supervisor.stop().await;
        self.source.close().await;
        self.buffer.clear();

        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        if let Err(e) = self.source.open().await {
            self.health.set_disabled(true);
            tracing::error!(error = %e, "Camera reinitialization failed, camera disabled");
            return Err(Error::Disabled(format!(
                "camera reinitialization failed: {}",
                e
            )));
        }

        self.health.set_disabled(false);
        self.health.reset_failures();
        self.supervisor.start().await;

        tracing::info!("Camera refresh complete");
        Ok(true)
    }

    /// Refresh if the buffer is older than `max_stale` or has never been
    /// filled. Escalates to a forced refresh past the emergency threshold.
    pub async fn ensure_fresh(&self, max_stale: Duration) -> Result<bool> {
        let stale = match self.buffer.age() {
            None => true,
            Some(age) => age > max_stale,
        };
        if !stale {
            return Ok(false);
        }

        let force = self.is_emergency();
        if force {
            tracing::warn!(
                age_ms = self.buffer.age().map(|a| a.as_millis() as u64),
                "Frame staleness past emergency threshold"
            );
        }
        self.refresh(force, "stale frame buffer").await
    }

    /// Staleness past the point where the cooldown no longer applies
    fn is_emergency(&self) -> bool {
        match self.buffer.age() {
            Some(age) => age >= self.config.emergency_stale(),
            // Nothing ever published (or the buffer was just cleared):
            // measure from the last refresh attempt, or process start
            None => {
                let since = self
                    .health
                    .refresh_elapsed()
                    .unwrap_or_else(|| self.started_at.elapsed());
                since >= self.config.emergency_stale()
            }
        }
    }

    /// Drain refresh requests from the capture supervisor
    pub fn spawn_refresh_worker(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<RefreshRequest>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match this.refresh(false, &request.reason).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(reason = %request.reason, "Refresh request absorbed by cooldown")
                    }
                    Err(e) => tracing::error!(error = %e, "Requested refresh failed"),
                }
            }
        })
    }

    /// Periodic freshness check; the external retry path once the camera
    /// has been marked disabled
    pub fn spawn_freshness_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(this.config.check_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = this.ensure_fresh(this.config.max_stale()).await {
                    tracing::error!(error = %e, "Freshness check failed");
                }
            }
        })
    }
}
