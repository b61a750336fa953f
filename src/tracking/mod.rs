//! TrackingController - proportional object following
//!
//! Keeps the tracked object centered by nudging the mount toward it. The
//! correction is proportional to the object's normalized offset from frame
//! center, clamped by the mount limits; small offsets inside the deadzone
//! produce no movement so the mount does not twitch on jitter.

use crate::config::TrackingConfig;
use crate::error::Result;
use crate::inference::BBox;
use crate::pantilt::{PanTiltActuator, PanTiltLimits};
use crate::patrol::PatrolStateMachine;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Correction computed for one tracking step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub pan_delta: f32,
    pub tilt_delta: f32,
}

/// Offset of a box center from frame center, normalized to [-1, 1] per axis
fn normalized_offset(bbox: &BBox, frame_width: u32, frame_height: u32) -> (f32, f32) {
    let (cx, cy) = bbox.center();
    let half_w = (frame_width.max(1) as f32) / 2.0;
    let half_h = (frame_height.max(1) as f32) / 2.0;
    ((cx - half_w) / half_w, (cy - half_h) / half_h)
}

/// Proportional correction for an offset; `None` inside the deadzone.
/// Tilt is inverted: an object above center needs the mount to tilt up,
/// which is a negative image-space offset.
fn correction(offset: (f32, f32), deadzone: f32, gain: f32) -> Option<Correction> {
    let (dx, dy) = offset;
    if dx.abs() < deadzone && dy.abs() < deadzone {
        return None;
    }
    let pan_delta = if dx.abs() >= deadzone { dx * gain } else { 0.0 };
    let tilt_delta = if dy.abs() >= deadzone { -dy * gain } else { 0.0 };
    Some(Correction {
        pan_delta,
        tilt_delta,
    })
}

/// TrackingController instance
pub struct TrackingController {
    actuator: Arc<dyn PanTiltActuator>,
    patrol: Arc<PatrolStateMachine>,
    config: TrackingConfig,
    limits: PanTiltLimits,
    target: RwLock<Option<BBox>>,
}

impl TrackingController {
    pub fn new(
        actuator: Arc<dyn PanTiltActuator>,
        patrol: Arc<PatrolStateMachine>,
        config: TrackingConfig,
        limits: PanTiltLimits,
    ) -> Self {
        Self {
            actuator,
            patrol,
            config,
            limits,
            target: RwLock::new(None),
        }
    }

    /// One tracking step toward the given box. Interrupts patrol first so
    /// the sweep cannot fight the correction, then applies a proportional,
    /// clamped nudge. Returns true if the mount moved.
    pub async fn track(&self, bbox: BBox, frame_width: u32, frame_height: u32) -> Result<bool> {
        *self.target.write().await = Some(bbox);

        if !self.config.enabled {
            return Ok(false);
        }

        self.patrol.interrupt().await;

        let offset = normalized_offset(&bbox, frame_width, frame_height);
        let Some(correction) = correction(offset, self.config.deadzone, self.config.gain) else {
            tracing::trace!(dx = offset.0, dy = offset.1, "Target inside deadzone");
            return Ok(false);
        };

        let (pan, tilt) = self.actuator.position().await;
        let (target_pan, target_tilt) = self
            .limits
            .clamp(pan + correction.pan_delta, tilt + correction.tilt_delta);

        tracing::debug!(
            pan_delta = correction.pan_delta,
            tilt_delta = correction.tilt_delta,
            target_pan,
            target_tilt,
            "Tracking correction"
        );
        self.actuator
            .move_to(target_pan, target_tilt, self.config.speed)
            .await?;
        Ok(true)
    }

    /// Forget the current target (no detections this cycle)
    pub async fn clear_target(&self) {
        *self.target.write().await = None;
    }

    pub async fn has_target(&self) -> bool {
        self.target.read().await.is_some()
    }

    pub async fn target(&self) -> Option<BBox> {
        *self.target.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PanTiltConfig, PatrolConfig};
    use crate::pantilt::SimulatedPanTilt;
    use crate::patrol::PatrolPhase;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Actuator that records every commanded move
    struct RecordingActuator {
        moves: StdMutex<Vec<(f32, f32, u8)>>,
        position: StdMutex<(f32, f32)>,
    }

    impl RecordingActuator {
        fn new() -> Self {
            Self {
                moves: StdMutex::new(Vec::new()),
                position: StdMutex::new((0.0, 0.0)),
            }
        }

        fn moves(&self) -> Vec<(f32, f32, u8)> {
            self.moves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PanTiltActuator for RecordingActuator {
        async fn move_to(&self, pan: f32, tilt: f32, speed: u8) -> Result<(f32, f32)> {
            self.moves.lock().unwrap().push((pan, tilt, speed));
            *self.position.lock().unwrap() = (pan, tilt);
            Ok((pan, tilt))
        }

        async fn home(&self) -> Result<()> {
            self.move_to(0.0, 0.0, 10).await?;
            Ok(())
        }

        async fn position(&self) -> (f32, f32) {
            *self.position.lock().unwrap()
        }
    }

    fn limits() -> PanTiltLimits {
        PanTiltLimits::from(&PanTiltConfig::default())
    }

    fn rig(config: TrackingConfig) -> (TrackingController, Arc<RecordingActuator>) {
        let actuator = Arc::new(RecordingActuator::new());
        let patrol_actuator = Arc::new(SimulatedPanTilt::new(&PanTiltConfig::default()));
        let patrol = Arc::new(PatrolStateMachine::new(
            patrol_actuator,
            PatrolConfig::default(),
        ));
        let controller = TrackingController::new(actuator.clone(), patrol, config, limits());
        (controller, actuator)
    }

    fn centered_box(cx: f32, cy: f32) -> BBox {
        BBox {
            x1: cx - 10.0,
            y1: cy - 10.0,
            x2: cx + 10.0,
            y2: cy + 10.0,
        }
    }

    #[test]
    fn offset_is_normalized_per_axis() {
        let bbox = centered_box(480.0, 120.0); // left of and above center
        let (dx, dy) = normalized_offset(&bbox, 1280, 480);
        assert!((dx - (-0.25)).abs() < 1e-6);
        assert!((dy - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn deadzone_suppresses_small_offsets() {
        assert!(correction((0.05, -0.09), 0.1, 5.0).is_none());
        let c = correction((0.2, 0.0), 0.1, 5.0).unwrap();
        assert!((c.pan_delta - 1.0).abs() < 1e-6);
        assert_eq!(c.tilt_delta, 0.0);
    }

    #[test]
    fn tilt_correction_is_inverted() {
        // object below center (positive dy) needs the mount to tilt down
        let c = correction((0.0, 0.4), 0.1, 5.0).unwrap();
        assert!((c.tilt_delta - (-2.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn centered_target_does_not_move_the_mount() {
        let (controller, actuator) = rig(TrackingConfig::default());
        let moved = controller.track(centered_box(640.0, 360.0), 1280, 720).await.unwrap();
        assert!(!moved);
        assert!(actuator.moves().is_empty());
        assert!(controller.has_target().await);
    }

    #[tokio::test]
    async fn off_center_target_gets_a_proportional_nudge() {
        let (controller, actuator) = rig(TrackingConfig {
            enabled: true,
            deadzone: 0.1,
            gain: 5.0,
            speed: 10,
        });

        // object center at (1280, 360) in a 1280x720 frame: dx = 1.0, dy = 0
        let moved = controller.track(centered_box(1280.0, 360.0), 1280, 720).await.unwrap();
        assert!(moved);

        let moves = actuator.moves();
        assert_eq!(moves.len(), 1);
        assert!((moves[0].0 - 5.0).abs() < 1e-4);
        assert_eq!(moves[0].1, 0.0);
        assert_eq!(moves[0].2, 10);
    }

    #[tokio::test]
    async fn corrections_are_clamped_to_mount_limits() {
        let (controller, actuator) = rig(TrackingConfig {
            enabled: true,
            deadzone: 0.1,
            gain: 500.0,
            speed: 10,
        });

        controller.track(centered_box(1280.0, 720.0), 1280, 720).await.unwrap();
        let moves = actuator.moves();
        assert_eq!(moves[0].0, 90.0);
        assert_eq!(moves[0].1, -45.0);
    }

    #[tokio::test]
    async fn tracking_interrupts_an_active_patrol() {
        let (controller, _actuator) = rig(TrackingConfig::default());
        let patrol = controller.patrol.clone();
        patrol.add_position("a", -20.0, 0.0, 0.05).await;
        patrol.add_position("b", 20.0, 0.0, 0.05).await;
        patrol.start(None).await.unwrap();

        controller.track(centered_box(1280.0, 360.0), 1280, 720).await.unwrap();
        assert_eq!(patrol.phase().await, PatrolPhase::Interrupted);

        patrol.stop().await;
    }

    #[tokio::test]
    async fn disabled_tracking_records_target_but_never_moves() {
        let (controller, actuator) = rig(TrackingConfig {
            enabled: false,
            ..TrackingConfig::default()
        });

        let moved = controller.track(centered_box(1280.0, 360.0), 1280, 720).await.unwrap();
        assert!(!moved);
        assert!(actuator.moves().is_empty());
        assert!(controller.has_target().await);

        controller.clear_target().await;
        assert!(!controller.has_target().await);
    }
}
