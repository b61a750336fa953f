//! Patrol state machine
//!
//! ## Responsibilities
//!
//! - Sweep the mount through the saved positions in ping-pong order
//!   (1 -> 2 -> 3 -> 2 -> 1 -> 2 ...), dwelling at each stop
//! - Pause on interrupt (tracking has taken the mount) and auto-resume
//!   after a quiet period; every new interrupt restarts that timer
//! - Persist positions as JSON so they survive restarts
//!
//! The dwell sleeps in short slices so an interrupt or stop takes effect
//! within ~100ms instead of a full dwell period.

use crate::config::PatrolConfig;
use crate::error::{Error, Result};
use crate::pantilt::PanTiltActuator;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// One saved patrol stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatrolPosition {
    pub id: u64,
    pub name: String,
    pub pan: f32,
    pub tilt: f32,
    /// Seconds to hold this position before moving on
    pub dwell_secs: f64,
}

/// Sweep direction through the position list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// Patrol lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatrolPhase {
    Idle,
    Patrolling,
    Interrupted,
}

/// Point-in-time patrol status for reporting
#[derive(Debug, Clone, Serialize)]
pub struct PatrolStatus {
    pub phase: PatrolPhase,
    pub position_count: usize,
    pub current_index: usize,
    pub direction: Direction,
    pub speed: u8,
}

/// Next stop in ping-pong order.
///
/// Endpoints are visited once per sweep: with three positions the index
/// sequence is 0, 1, 2, 1, 0, 1, 2. One position stays put; two alternate.
fn advance(index: usize, direction: Direction, len: usize) -> (usize, Direction) {
    if len <= 1 {
        return (0, Direction::Forward);
    }
    match direction {
        Direction::Forward => {
            if index + 1 >= len {
                (len - 2, Direction::Backward)
            } else {
                (index + 1, Direction::Forward)
            }
        }
        Direction::Backward => {
            if index == 0 {
                (1, Direction::Forward)
            } else {
                (index - 1, Direction::Backward)
            }
        }
    }
}

struct SweepState {
    index: usize,
    direction: Direction,
}

/// PatrolStateMachine instance
pub struct PatrolStateMachine {
    actuator: Arc<dyn PanTiltActuator>,
    config: PatrolConfig,
    positions: RwLock<Vec<PatrolPosition>>,
    phase: RwLock<PatrolPhase>,
    sweep: RwLock<SweepState>,
    speed: RwLock<u8>,
    next_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    resume_timer: Mutex<Option<JoinHandle<()>>>,
}

impl PatrolStateMachine {
    pub fn new(actuator: Arc<dyn PanTiltActuator>, config: PatrolConfig) -> Self {
        let speed = config.default_speed;
        Self {
            actuator,
            config,
            positions: RwLock::new(Vec::new()),
            phase: RwLock::new(PatrolPhase::Idle),
            sweep: RwLock::new(SweepState {
                index: 0,
                direction: Direction::Forward,
            }),
            speed: RwLock::new(speed),
            next_id: AtomicU64::new(1),
            task: Mutex::new(None),
            resume_timer: Mutex::new(None),
        }
    }

    // ----- position management -----

    /// Save a new patrol stop
    pub async fn add_position(&self, name: &str, pan: f32, tilt: f32, dwell_secs: f64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let position = PatrolPosition {
            id,
            name: name.to_string(),
            pan,
            tilt,
            dwell_secs: dwell_secs.max(0.0),
        };
        self.positions.write().await.push(position);
        tracing::info!(id, name, pan, tilt, "Patrol position added");
        id
    }

    /// Save the mount's current position as a patrol stop
    pub async fn add_current_position(&self, name: &str, dwell_secs: f64) -> u64 {
        let (pan, tilt) = self.actuator.position().await;
        self.add_position(name, pan, tilt, dwell_secs).await
    }

    /// Delete a stop; the sweep index is clamped so the loop stays in range
    pub async fn delete_position(&self, id: u64) -> bool {
        let mut positions = self.positions.write().await;
        let before = positions.len();
        positions.retain(|p| p.id != id);
        let removed = positions.len() < before;

        if removed {
            let mut sweep = self.sweep.write().await;
            if sweep.index >= positions.len() {
                sweep.index = positions.len().saturating_sub(1);
                sweep.direction = Direction::Backward;
            }
            tracing::info!(id, remaining = positions.len(), "Patrol position deleted");
        }
        removed
    }

    /// Change how long the sweep holds a stop
    pub async fn update_dwell(&self, id: u64, dwell_secs: f64) -> bool {
        let mut positions = self.positions.write().await;
        match positions.iter_mut().find(|p| p.id == id) {
            Some(position) => {
                position.dwell_secs = dwell_secs.max(0.0);
                true
            }
            None => false,
        }
    }

    /// Remove every stop; a running sweep will notice and go idle
    pub async fn clear_positions(&self) {
        self.positions.write().await.clear();
        let mut sweep = self.sweep.write().await;
        sweep.index = 0;
        sweep.direction = Direction::Forward;
        tracing::info!("Patrol positions cleared");
    }

    pub async fn positions(&self) -> Vec<PatrolPosition> {
        self.positions.read().await.clone()
    }

    /// Persist positions as JSON
    pub async fn save_positions(&self, path: impl AsRef<Path>) -> Result<()> {
        let positions = self.positions.read().await.clone();
        let raw = serde_json::to_string_pretty(&positions)?;
        tokio::fs::write(path.as_ref(), raw).await?;
        tracing::debug!(count = positions.len(), "Patrol positions saved");
        Ok(())
    }

    /// Load positions from JSON, replacing the current set. A missing file
    /// is not an error; patrol simply starts with no stops.
    pub async fn load_positions(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No saved patrol positions");
            return Ok(0);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let loaded: Vec<PatrolPosition> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let max_id = loaded.iter().map(|p| p.id).max().unwrap_or(0);
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        let count = loaded.len();
        *self.positions.write().await = loaded;
        {
            let mut sweep = self.sweep.write().await;
            sweep.index = 0;
            sweep.direction = Direction::Forward;
        }
        tracing::info!(count, "Patrol positions loaded");
        Ok(count)
    }

    // ----- lifecycle -----

    /// Start the sweep. Rejected when no positions are saved.
    pub async fn start(self: &Arc<Self>, speed: Option<u8>) -> Result<()> {
        if self.positions.read().await.is_empty() {
            return Err(Error::Rejected("no patrol positions saved".to_string()));
        }

        {
            let mut phase = self.phase.write().await;
            if *phase != PatrolPhase::Idle {
                tracing::warn!(current = ?*phase, "Patrol already active");
                return Ok(());
            }
            *phase = PatrolPhase::Patrolling;
        }

        if let Some(speed) = speed {
            *self.speed.write().await = speed.clamp(1, 10);
        }
        {
            let mut sweep = self.sweep.write().await;
            sweep.index = 0;
            sweep.direction = Direction::Forward;
        }

        tracing::info!(speed = *self.speed.read().await, "Patrol started");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run().await;
            tracing::info!("Patrol loop stopped");
        });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the sweep and cancel any pending auto-resume
    pub async fn stop(&self) {
        {
            let mut phase = self.phase.write().await;
            if *phase == PatrolPhase::Idle {
                return;
            }
            *phase = PatrolPhase::Idle;
        }
        self.cancel_resume_timer().await;

        if let Some(handle) = self.task.lock().await.take() {
            // Loop exits at the next dwell slice
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                tracing::warn!("Patrol task did not stop in time");
            }
        }
        tracing::info!("Patrol stopped");
    }

    /// Pause the sweep because something else needs the mount. Each call
    /// restarts the auto-resume timer, so patrol only resumes after a full
    /// quiet period with no further interrupts.
    pub async fn interrupt(self: &Arc<Self>) {
        {
            let mut phase = self.phase.write().await;
            match *phase {
                PatrolPhase::Idle => return,
                PatrolPhase::Patrolling => {
                    *phase = PatrolPhase::Interrupted;
                    tracing::info!("Patrol interrupted");
                }
                PatrolPhase::Interrupted => {}
            }
        }

        self.cancel_resume_timer().await;
        let this = self.clone();
        let delay = self.config.resume_delay();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.resume().await;
        });
        *self.resume_timer.lock().await = Some(handle);
    }

    /// Resume the sweep from where it was interrupted
    pub async fn resume(&self) {
        let mut phase = self.phase.write().await;
        if *phase != PatrolPhase::Interrupted {
            return;
        }
        *phase = PatrolPhase::Patrolling;
        tracing::info!("Patrol resumed");
    }

    pub async fn phase(&self) -> PatrolPhase {
        *self.phase.read().await
    }

    pub async fn status(&self) -> PatrolStatus {
        let sweep = self.sweep.read().await;
        PatrolStatus {
            phase: *self.phase.read().await,
            position_count: self.positions.read().await.len(),
            current_index: sweep.index,
            direction: sweep.direction,
            speed: *self.speed.read().await,
        }
    }

    // ----- sweep loop -----

    async fn run(&self) {
        loop {
            match self.phase().await {
                PatrolPhase::Idle => break,
                PatrolPhase::Interrupted => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                PatrolPhase::Patrolling => {}
            }

            let target = {
                let positions = self.positions.read().await;
                if positions.is_empty() {
                    tracing::warn!("All patrol positions deleted, stopping sweep");
                    *self.phase.write().await = PatrolPhase::Idle;
                    break;
                }
                let index = self.sweep.read().await.index.min(positions.len() - 1);
                positions[index].clone()
            };

            let speed = *self.speed.read().await;
            if let Err(e) = self.actuator.move_to(target.pan, target.tilt, speed).await {
                tracing::error!(error = %e, name = %target.name, "Patrol move failed");
            }

            if !self.dwell(Duration::from_secs_f64(target.dwell_secs)).await {
                continue; // interrupted or stopped during the dwell
            }

            let len = self.positions.read().await.len();
            let mut sweep = self.sweep.write().await;
            let (index, direction) = advance(sweep.index, sweep.direction, len);
            sweep.index = index;
            sweep.direction = direction;
        }
    }

    /// Sleep in 100ms slices; returns false if the phase left Patrolling
    async fn dwell(&self, total: Duration) -> bool {
        let slice = Duration::from_millis(100);
        let mut remaining = total;
        loop {
            if self.phase().await != PatrolPhase::Patrolling {
                return false;
            }
            if remaining.is_zero() {
                return true;
            }
            let nap = remaining.min(slice);
            tokio::time::sleep(nap).await;
            remaining = remaining.saturating_sub(nap);
        }
    }

    async fn cancel_resume_timer(&self) {
        if let Some(handle) = self.resume_timer.lock().await.take() {
            handle.abort();
        }
    }
}
