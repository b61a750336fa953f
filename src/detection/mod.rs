//! DetectionOrchestrator - the periodic detect-decide-act cycle
//!
//! ## Responsibilities
//!
//! - Every interval: take the latest frame, run inference, filter to the
//!   classes of interest, then fan out to logging, snapshots, notifications,
//!   automation and tracking
//! - Keep side-effect failures isolated: a dead inference server, a failed
//!   notification or a refused garage trigger never stops the cycle loop
//!
//! Detection runs against whatever frame is in the buffer; it never waits
//! for a capture.

use crate::automation::{AutomationTrigger, FireOutcome};
use crate::camera::{Frame, FrameBuffer};
use crate::config::{DetectionConfig, NotificationConfig};
use crate::detection_log::{DetectionRecord, DetectionStore};
use crate::error::Result;
use crate::inference::{Detection, InferenceService};
use crate::notifier::Notifier;
use crate::tracking::TrackingController;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const VEHICLE_CLASSES: &[&str] = &["car", "truck", "motorcycle", "bicycle"];

/// DetectionOrchestrator instance
pub struct DetectionOrchestrator {
    buffer: Arc<FrameBuffer>,
    inference: Arc<dyn InferenceService>,
    store: Arc<dyn DetectionStore>,
    tracker: Arc<TrackingController>,
    automation: Arc<AutomationTrigger>,
    notifier: Arc<dyn Notifier>,
    config: DetectionConfig,
    notifications: NotificationConfig,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<FrameBuffer>,
        inference: Arc<dyn InferenceService>,
        store: Arc<dyn DetectionStore>,
        tracker: Arc<TrackingController>,
        automation: Arc<AutomationTrigger>,
        notifier: Arc<dyn Notifier>,
        config: DetectionConfig,
        notifications: NotificationConfig,
    ) -> Self {
        Self {
            buffer,
            inference,
            store,
            tracker,
            automation,
            notifier,
            config,
            notifications,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the cycle loop
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Detection loop already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            interval_ms = self.config.interval().as_millis() as u64,
            threshold = self.config.confidence_threshold,
            "Starting detection orchestrator"
        );

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(this.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !*this.running.read().await {
                    break;
                }
                this.run_cycle().await;
            }
            tracing::info!("Detection orchestrator stopped");
        });
        *self.task.lock().await = Some(handle);
    }

    /// Stop the cycle loop
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }
        if let Some(handle) = self.task.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!("Detection task did not stop in time");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One detect-decide-act pass
    pub async fn run_cycle(&self) {
        let Some((frame, _)) = self.buffer.latest() else {
            tracing::trace!("No frame available, skipping cycle");
            return;
        };

        let detections = match self
            .inference
            .detect(
                &frame,
                self.config.confidence_threshold,
                &self.config.classes_of_interest,
            )
            .await
        {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(error = %e, "Inference failed, skipping cycle");
                return;
            }
        };

        let accepted: Vec<Detection> = detections
            .into_iter()
            .filter(|d| {
                d.confidence >= self.config.confidence_threshold
                    && self
                        .config
                        .classes_of_interest
                        .iter()
                        .any(|c| c == &d.class_name)
            })
            .collect();

        if accepted.is_empty() {
            self.tracker.clear_target().await;
            return;
        }

        let snapshot = self.save_snapshot(&frame).await;
        let notified = self.notify(&accepted, &frame).await;
        let fired = self.run_automation(&accepted).await;

        for detection in &accepted {
            let mut actions = Vec::new();
            if notified {
                actions.push("notified".to_string());
            }
            if fired
                && self
                    .config
                    .automation_classes
                    .iter()
                    .any(|c| c == &detection.class_name)
            {
                actions.push("garage_triggered".to_string());
            }

            self.store
                .save(DetectionRecord {
                    id: 0,
                    object_type: detection.class_name.clone(),
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                    image_path: snapshot.clone(),
                    action_taken: actions,
                    detected_at: Utc::now(),
                })
                .await;
        }

        // Follow the first accepted detection
        if let Some(first) = accepted.first() {
            tracing::debug!(
                class = %first.class_name,
                confidence = first.confidence,
                "Tracking detection"
            );
            if let Err(e) = self.tracker.track(first.bbox, frame.width, frame.height).await {
                tracing::warn!(error = %e, "Tracking move failed");
            }
        }
    }

    /// Write the frame to the snapshot directory, one file per cycle
    async fn save_snapshot(&self, frame: &Frame) -> Option<PathBuf> {
        if !self.config.save_snapshots {
            return None;
        }
        let result: Result<PathBuf> = async {
            tokio::fs::create_dir_all(&self.config.snapshot_dir).await?;
            let name = format!("detection_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S%.3f"));
            let path = self.config.snapshot_dir.join(name);
            tokio::fs::write(&path, frame.data()).await?;
            Ok(path)
        }
        .await;

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot save failed");
                None
            }
        }
    }

    /// At most one notification per cycle, summarizing what was seen
    async fn notify(&self, accepted: &[Detection], frame: &Frame) -> bool {
        if !self.notifications.enabled {
            return false;
        }

        let mut classes: Vec<&str> = Vec::new();
        for detection in accepted {
            let wanted = if detection.class_name == "person" {
                self.notifications.notify_person
            } else if VEHICLE_CLASSES.contains(&detection.class_name.as_str()) {
                self.notifications.notify_vehicle
            } else {
                true
            };
            if wanted && !classes.contains(&detection.class_name.as_str()) {
                classes.push(&detection.class_name);
            }
        }
        if classes.is_empty() {
            return false;
        }

        let text = format!("Detected: {}", classes.join(", "));
        let result = if self.notifications.send_photo {
            self.notifier.send_photo(&text, frame.data()).await
        } else {
            self.notifier.send(&text).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Notification failed");
                false
            }
        }
    }

    /// Fire the garage for automation classes; returns true if it fired
    async fn run_automation(&self, accepted: &[Detection]) -> bool {
        if !self.automation.enabled() {
            return false;
        }
        for detection in accepted {
            if !self
                .config
                .automation_classes
                .iter()
                .any(|c| c == &detection.class_name)
            {
                continue;
            }
            match self.automation.fire("garage", &detection.class_name).await {
                Ok(FireOutcome::Fired) => return true,
                Ok(FireOutcome::OnCooldown { remaining }) => {
                    tracing::debug!(
                        remaining_secs = remaining.as_secs(),
                        "Garage on cooldown"
                    );
                    return false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Garage trigger failed");
                    return false;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::GarageActuator;
    use crate::config::{
        AutomationConfig, PanTiltConfig, PatrolConfig, TrackingConfig,
    };
    use crate::detection_log::MemoryDetectionStore;
    use crate::inference::BBox;
    use crate::pantilt::{PanTiltLimits, SimulatedPanTilt};
    use crate::patrol::PatrolStateMachine;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedInference {
        results: StdMutex<Vec<Result<Vec<Detection>>>>,
        calls: AtomicU32,
    }

    impl ScriptedInference {
        fn new(results: Vec<Result<Vec<Detection>>>) -> Self {
            Self {
                results: StdMutex::new(results),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl InferenceService for ScriptedInference {
        async fn detect(
            &self,
            _frame: &Frame,
            _threshold: f32,
            _classes: &[String],
        ) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(Vec::new())
            } else {
                results.remove(0)
            }
        }
    }

    struct RecordingNotifier {
        messages: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<()> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_photo(&self, text: &str, _jpeg: &[u8]) -> Result<()> {
            self.messages.lock().unwrap().push(format!("photo:{}", text));
            Ok(())
        }
    }

    struct CountingGarage {
        triggers: AtomicU32,
    }

    #[async_trait]
    impl GarageActuator for CountingGarage {
        async fn trigger(&self) -> Result<()> {
            self.triggers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Rig {
        orchestrator: Arc<DetectionOrchestrator>,
        buffer: Arc<FrameBuffer>,
        store: Arc<MemoryDetectionStore>,
        tracker: Arc<TrackingController>,
        notifier: Arc<RecordingNotifier>,
        garage: Arc<CountingGarage>,
    }

    fn detection(class: &str, confidence: f32) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence,
            bbox: BBox {
                x1: 0.0,
                y1: 0.0,
                x2: 100.0,
                y2: 100.0,
            },
        }
    }

    fn detection_at(class: &str, confidence: f32, cx: f32) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence,
            bbox: BBox {
                x1: cx - 50.0,
                y1: 310.0,
                x2: cx + 50.0,
                y2: 410.0,
            },
        }
    }

    fn rig(inference: ScriptedInference, auto_open: bool) -> Rig {
        let buffer = Arc::new(FrameBuffer::new());
        let store = Arc::new(MemoryDetectionStore::new(100));
        let actuator = Arc::new(SimulatedPanTilt::new(&PanTiltConfig::default()));
        let patrol = Arc::new(PatrolStateMachine::new(
            actuator.clone(),
            PatrolConfig::default(),
        ));
        let tracker = Arc::new(TrackingController::new(
            actuator,
            patrol,
            TrackingConfig::default(),
            PanTiltLimits::from(&PanTiltConfig::default()),
        ));
        let garage = Arc::new(CountingGarage {
            triggers: AtomicU32::new(0),
        });
        let automation = Arc::new(AutomationTrigger::new(
            garage.clone(),
            None,
            AutomationConfig {
                auto_open,
                cooldown_secs: 300,
                flipper_port: "/dev/null".into(),
            },
        ));
        let notifier = Arc::new(RecordingNotifier {
            messages: StdMutex::new(Vec::new()),
        });

        let config = DetectionConfig {
            save_snapshots: false,
            ..DetectionConfig::default()
        };
        let notifications = NotificationConfig {
            enabled: true,
            notify_person: true,
            notify_vehicle: true,
            send_photo: false,
        };

        let orchestrator = Arc::new(DetectionOrchestrator::new(
            buffer.clone(),
            Arc::new(inference),
            store.clone(),
            tracker.clone(),
            automation,
            notifier.clone(),
            config,
            notifications,
        ));
        Rig {
            orchestrator,
            buffer,
            store,
            tracker,
            notifier,
            garage,
        }
    }

    fn publish_frame(buffer: &FrameBuffer) {
        buffer.publish(Frame::new(vec![0xff, 0xd8, 0xff], 1280, 720));
    }

    #[tokio::test]
    async fn detections_are_logged_and_tracked() {
        let rig = rig(
            ScriptedInference::new(vec![Ok(vec![
                detection("person", 0.9),
                detection("car", 0.7),
            ])]),
            false,
        );
        publish_frame(&rig.buffer);

        rig.orchestrator.run_cycle().await;

        let recent = rig.store.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert!(rig.tracker.has_target().await);
        assert_eq!(rig.notifier.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tracks_the_first_detection_not_the_most_confident() {
        let rig = rig(
            ScriptedInference::new(vec![Ok(vec![
                detection_at("person", 0.65, 100.0),
                detection_at("car", 0.95, 900.0),
            ])]),
            false,
        );
        publish_frame(&rig.buffer);

        rig.orchestrator.run_cycle().await;

        let target = rig.tracker.target().await.unwrap();
        assert!((target.center().0 - 100.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn zero_detections_clear_the_tracking_target() {
        let rig = rig(
            ScriptedInference::new(vec![
                Ok(vec![detection("person", 0.9)]),
                Ok(Vec::new()),
            ]),
            false,
        );
        publish_frame(&rig.buffer);

        rig.orchestrator.run_cycle().await;
        assert!(rig.tracker.has_target().await);

        rig.orchestrator.run_cycle().await;
        assert!(!rig.tracker.has_target().await);
    }

    #[tokio::test]
    async fn inference_failure_skips_the_cycle_without_side_effects() {
        let rig = rig(
            ScriptedInference::new(vec![Err(crate::error::Error::service(
                "inference",
                "down",
            ))]),
            false,
        );
        publish_frame(&rig.buffer);

        rig.orchestrator.run_cycle().await;

        assert!(rig.store.is_empty());
        assert!(rig.notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_classes_are_filtered_out() {
        let rig = rig(
            ScriptedInference::new(vec![Ok(vec![
                detection("bird", 0.95),
                detection("person", 0.3), // below threshold
            ])]),
            false,
        );
        publish_frame(&rig.buffer);

        rig.orchestrator.run_cycle().await;
        assert!(rig.store.is_empty());
    }

    #[tokio::test]
    async fn empty_buffer_skips_inference_entirely() {
        let inference = ScriptedInference::new(vec![Ok(vec![detection("car", 0.9)])]);
        let rig = rig(inference, false);

        rig.orchestrator.run_cycle().await;
        assert!(rig.store.is_empty());
    }

    #[tokio::test]
    async fn automation_class_fires_the_garage_once() {
        let inference = ScriptedInference::new(vec![
            Ok(vec![detection("my_car", 0.9)]),
            Ok(vec![detection("my_car", 0.9)]),
        ]);
        let mut rig = rig(inference, true);
        // my_car must also pass the interest filter
        let orchestrator = Arc::get_mut(&mut rig.orchestrator).unwrap();
        orchestrator.config.classes_of_interest.push("my_car".to_string());
        publish_frame(&rig.buffer);

        rig.orchestrator.run_cycle().await;
        rig.orchestrator.run_cycle().await;

        // second fire lands on the 300s cooldown
        assert_eq!(rig.garage.triggers.load(Ordering::SeqCst), 1);
        let recent = rig.store.recent(10).await;
        assert!(recent[1].action_taken.contains(&"garage_triggered".to_string()));
        assert!(!recent[0].action_taken.contains(&"garage_triggered".to_string()));
    }

    #[tokio::test]
    async fn start_stop_runs_cycles_in_the_background() {
        let inference = ScriptedInference::new(Vec::new());
        let mut rig = rig(inference, false);
        let orchestrator = Arc::get_mut(&mut rig.orchestrator).unwrap();
        orchestrator.config.interval_secs = 0.01;
        publish_frame(&rig.buffer);

        rig.orchestrator.start().await;
        assert!(rig.orchestrator.is_running().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.orchestrator.stop().await;
        assert!(!rig.orchestrator.is_running().await);
    }
}
