//! Shared application state

use crate::automation::AutomationTrigger;
use crate::camera::{CameraHealth, CameraHealthStatus, CameraRefresher, CaptureSupervisor, FrameBuffer};
use crate::config::AppConfig;
use crate::detection::DetectionOrchestrator;
use crate::detection_log::MemoryDetectionStore;
use crate::patrol::{PatrolStateMachine, PatrolStatus};
use crate::tracking::TrackingController;
use serde::Serialize;
use std::sync::Arc;

/// Handles to every long-lived component, shared across tasks
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub buffer: Arc<FrameBuffer>,
    pub health: Arc<CameraHealth>,
    pub supervisor: Arc<CaptureSupervisor>,
    pub refresher: Arc<CameraRefresher>,
    pub orchestrator: Arc<DetectionOrchestrator>,
    pub tracker: Arc<TrackingController>,
    pub patrol: Arc<PatrolStateMachine>,
    pub automation: Arc<AutomationTrigger>,
    pub store: Arc<MemoryDetectionStore>,
}

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub camera: CameraHealthStatus,
    pub frame_age_ms: Option<u64>,
    pub detection_running: bool,
    pub tracking_target: bool,
    pub patrol: PatrolStatus,
    pub logged_detections: usize,
}

impl AppState {
    pub async fn status(&self) -> SystemStatus {
        SystemStatus {
            camera: self.health.snapshot(),
            frame_age_ms: self.buffer.age().map(|a| a.as_millis() as u64),
            detection_running: self.orchestrator.is_running().await,
            tracking_target: self.tracker.has_target().await,
            patrol: self.patrol.status().await,
            logged_detections: self.store.len(),
        }
    }
}
