//! CaptureSupervisor - background capture loop
//!
//! ## Responsibilities
//!
//! - Pull frames from the source into the frame buffer at the target cadence
//! - Time every capture; slow or failed captures count against the device
//! - After N consecutive slow/failed captures, request a refresh (the
//!   supervisor never refreshes the device itself)
//!
//! A single failed capture is never fatal; the loop backs off briefly and
//! tries again. The loop checks a cooperative stop flag every iteration and
//! shutdown joins the task with a bounded timeout.

use super::frame_buffer::FrameBuffer;
use super::health::CameraHealth;
use super::source::FrameSource;
use crate::config::CaptureConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Request for the refresher to cycle the camera
#[derive(Debug)]
pub struct RefreshRequest {
    pub reason: String,
}

/// CaptureSupervisor instance
pub struct CaptureSupervisor {
    source: Arc<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    health: Arc<CameraHealth>,
    config: CaptureConfig,
    refresh_tx: mpsc::Sender<RefreshRequest>,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSupervisor {
    pub fn new(
        source: Arc<dyn FrameSource>,
        buffer: Arc<FrameBuffer>,
        health: Arc<CameraHealth>,
        config: CaptureConfig,
        refresh_tx: mpsc::Sender<RefreshRequest>,
    ) -> Self {
        Self {
            source,
            buffer,
            health,
            config,
            refresh_tx,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the capture loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Capture loop already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            target_fps = self.config.target_fps,
            slow_capture_ms = self.config.slow_capture_ms,
            "Starting capture supervisor"
        );

        let source = self.source.clone();
        let buffer = self.buffer.clone();
        let health = self.health.clone();
        let config = self.config.clone();
        let refresh_tx = self.refresh_tx.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(config.cadence());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    break;
                }

                let started = Instant::now();
                match source.capture().await {
                    Ok(frame) => {
                        let took = started.elapsed();
                        buffer.publish(frame);

                        if took > config.slow_threshold() {
                            tracing::warn!(
                                took_ms = took.as_millis() as u64,
                                threshold_ms = config.slow_capture_ms,
                                "Slow capture"
                            );
                            let failures = health.record_failure();
                            Self::maybe_request_refresh(&health, &refresh_tx, &config, failures);
                        } else {
                            health.record_success();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Capture failed");
                        let failures = health.record_failure();
                        Self::maybe_request_refresh(&health, &refresh_tx, &config, failures);
                        tokio::time::sleep(Duration::from_millis(config.failure_backoff_ms)).await;
                    }
                }
            }

            tracing::info!("Capture supervisor stopped");
        });

        *self.task.lock().await = Some(handle);
    }

    fn maybe_request_refresh(
        health: &CameraHealth,
        refresh_tx: &mpsc::Sender<RefreshRequest>,
        config: &CaptureConfig,
        failures: u32,
    ) {
        if failures < config.max_consecutive_failures {
            return;
        }
        health.reset_failures();

        let request = RefreshRequest {
            reason: format!("{} consecutive slow or failed captures", failures),
        };
        match refresh_tx.try_send(request) {
            Ok(()) => tracing::warn!(failures, "Requested camera refresh"),
            // Refresher already has work queued; it will recover the camera
            Err(e) => tracing::debug!(error = %e, "Refresh request dropped"),
        }
    }

    /// Stop the capture loop, joining the task with a bounded timeout.
    /// Does not close the source; that is the caller's decision.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }

        if let Some(handle) = self.task.lock().await.take() {
            let abort = handle.abort_handle();
            let join_timeout = Duration::from_millis(self.config.join_timeout_ms);
            if tokio::time::timeout(join_timeout, handle).await.is_err() {
                tracing::warn!(
                    timeout_ms = self.config.join_timeout_ms,
                    "Capture task did not stop in time, aborting"
                );
                abort.abort();
            }
        }
    }

    /// Stop the loop and release the device
    pub async fn shutdown(&self) {
        self.stop().await;
        self.source.close().await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
