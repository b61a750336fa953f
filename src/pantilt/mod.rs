//! Pan-tilt mount control
//!
//! The actuator trait is the seam between motion policy (tracking, patrol)
//! and the servo hardware. All angles are degrees; every implementation
//! clamps to its limits before moving, so callers can request out-of-range
//! targets without faulting the servos.

use crate::config::PanTiltConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Hardware angle limits
#[derive(Debug, Clone, Copy)]
pub struct PanTiltLimits {
    pub pan_min: f32,
    pub pan_max: f32,
    pub tilt_min: f32,
    pub tilt_max: f32,
}

impl PanTiltLimits {
    pub fn clamp(&self, pan: f32, tilt: f32) -> (f32, f32) {
        (
            pan.clamp(self.pan_min, self.pan_max),
            tilt.clamp(self.tilt_min, self.tilt_max),
        )
    }
}

impl From<&PanTiltConfig> for PanTiltLimits {
    fn from(config: &PanTiltConfig) -> Self {
        Self {
            pan_min: config.pan_min,
            pan_max: config.pan_max,
            tilt_min: config.tilt_min,
            tilt_max: config.tilt_max,
        }
    }
}

/// Servo mount interface
#[async_trait]
pub trait PanTiltActuator: Send + Sync {
    /// Move to the given angles at `speed` (1 slowest, 10 fastest).
    /// Returns the clamped position actually reached.
    async fn move_to(&self, pan: f32, tilt: f32, speed: u8) -> Result<(f32, f32)>;

    /// Return to the home position
    async fn home(&self) -> Result<()>;

    /// Current commanded position
    async fn position(&self) -> (f32, f32);
}

/// Build the mount driver named in the configuration. Rejects unknown
/// driver names instead of silently falling back to the simulator.
pub fn build_actuator(config: &PanTiltConfig) -> Result<Arc<dyn PanTiltActuator>> {
    match config.driver.as_str() {
        "simulated" => {
            tracing::info!("Using simulated pan-tilt mount");
            Ok(Arc::new(SimulatedPanTilt::new(config)))
        }
        other => Err(Error::Config(format!(
            "unknown pan-tilt driver '{}'",
            other
        ))),
    }
}

/// Software servo mount: stepped interpolation toward the target, with the
/// same clamping and speed behavior a physical mount would have. Stands in
/// for hardware in development and in tests.
pub struct SimulatedPanTilt {
    limits: PanTiltLimits,
    home: (f32, f32),
    position: Mutex<(f32, f32)>,
    /// Degrees moved per interpolation step at speed 10
    step_degrees: f32,
}

impl SimulatedPanTilt {
    pub fn new(config: &PanTiltConfig) -> Self {
        Self {
            limits: PanTiltLimits::from(config),
            home: (config.home_pan, config.home_tilt),
            position: Mutex::new((config.home_pan, config.home_tilt)),
            step_degrees: 2.0,
        }
    }

    fn step_toward(current: f32, target: f32, step: f32) -> f32 {
        let delta = target - current;
        if delta.abs() <= step {
            target
        } else {
            current + step.copysign(delta)
        }
    }
}

#[async_trait]
impl PanTiltActuator for SimulatedPanTilt {
    async fn move_to(&self, pan: f32, tilt: f32, speed: u8) -> Result<(f32, f32)> {
        let (target_pan, target_tilt) = self.limits.clamp(pan, tilt);
        let speed = speed.clamp(1, 10);
        // Slower speeds take smaller steps with the same pacing
        let step = self.step_degrees * speed as f32 / 10.0;

        let mut position = self.position.lock().await;
        while position.0 != target_pan || position.1 != target_tilt {
            position.0 = Self::step_toward(position.0, target_pan, step);
            position.1 = Self::step_toward(position.1, target_tilt, step);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tracing::trace!(pan = target_pan, tilt = target_tilt, "Mount settled");
        Ok(*position)
    }

    async fn home(&self) -> Result<()> {
        self.move_to(self.home.0, self.home.1, 10).await?;
        Ok(())
    }

    async fn position(&self) -> (f32, f32) {
        *self.position.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount() -> SimulatedPanTilt {
        SimulatedPanTilt::new(&PanTiltConfig::default())
    }

    #[tokio::test]
    async fn move_reaches_target_exactly() {
        let mount = mount();
        let reached = mount.move_to(30.0, -15.0, 10).await.unwrap();
        assert_eq!(reached, (30.0, -15.0));
        assert_eq!(mount.position().await, (30.0, -15.0));
    }

    #[tokio::test]
    async fn out_of_range_targets_are_clamped() {
        let mount = mount();
        let reached = mount.move_to(500.0, -500.0, 10).await.unwrap();
        assert_eq!(reached, (90.0, -45.0));
    }

    #[tokio::test]
    async fn home_returns_to_configured_origin() {
        let mount = mount();
        mount.move_to(45.0, 20.0, 10).await.unwrap();
        mount.home().await.unwrap();
        assert_eq!(mount.position().await, (0.0, 0.0));
    }

    #[tokio::test]
    async fn driver_selection_follows_config() {
        let config = PanTiltConfig::default();
        assert_eq!(config.driver, "simulated");
        assert!(build_actuator(&config).is_ok());

        let bad = PanTiltConfig {
            driver: "tapo".to_string(),
            ..PanTiltConfig::default()
        };
        assert!(matches!(build_actuator(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn step_never_overshoots() {
        assert_eq!(SimulatedPanTilt::step_toward(0.0, 1.0, 2.0), 1.0);
        assert_eq!(SimulatedPanTilt::step_toward(0.0, 10.0, 2.0), 2.0);
        assert_eq!(SimulatedPanTilt::step_toward(10.0, 0.0, 2.0), 8.0);
    }
}
