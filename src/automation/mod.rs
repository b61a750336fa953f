//! AutomationTrigger - cooldown-gated physical actions
//!
//! Detections can fire real-world actions (the garage opener). Each action
//! name has its own lock and cooldown window, so two detection cycles can
//! never double-fire the same action, and a failed attempt does not consume
//! the cooldown.

use crate::config::AutomationConfig;
use crate::error::{Error, Result};
use crate::notifier::Notifier;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Result of a fire attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Fired,
    OnCooldown { remaining: Duration },
}

/// Physical trigger interface
#[async_trait]
pub trait GarageActuator: Send + Sync {
    async fn trigger(&self) -> Result<()>;
}

/// Flipper Zero over USB serial: one command line per trigger, the device
/// replays the stored sub-GHz capture.
pub struct FlipperGarage {
    port: PathBuf,
}

impl FlipperGarage {
    pub fn new(port: impl Into<PathBuf>) -> Self {
        Self { port: port.into() }
    }
}

#[async_trait]
impl GarageActuator for FlipperGarage {
    async fn trigger(&self) -> Result<()> {
        let mut serial = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.port)
            .await
            .map_err(|e| Error::service("garage", format!("{}: {}", self.port.display(), e)))?;
        serial
            .write_all(b"subghz tx_from_file /ext/subghz/garage.sub\r\n")
            .await
            .map_err(|e| Error::service("garage", e.to_string()))?;
        serial
            .flush()
            .await
            .map_err(|e| Error::service("garage", e.to_string()))?;
        tracing::info!(port = %self.port.display(), "Garage trigger sent");
        Ok(())
    }
}

#[derive(Default)]
struct ActionState {
    last_fired: Option<Instant>,
}

/// AutomationTrigger instance
pub struct AutomationTrigger {
    actuator: Arc<dyn GarageActuator>,
    notifier: Option<Arc<dyn Notifier>>,
    config: AutomationConfig,
    // One lock per action name; fire() holds it across check-and-trigger
    actions: RwLock<HashMap<String, Arc<Mutex<ActionState>>>>,
}

impl AutomationTrigger {
    pub fn new(
        actuator: Arc<dyn GarageActuator>,
        notifier: Option<Arc<dyn Notifier>>,
        config: AutomationConfig,
    ) -> Self {
        Self {
            actuator,
            notifier,
            config,
            actions: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.auto_open
    }

    async fn action_state(&self, action: &str) -> Arc<Mutex<ActionState>> {
        if let Some(state) = self.actions.read().await.get(action) {
            return state.clone();
        }
        self.actions
            .write()
            .await
            .entry(action.to_string())
            .or_default()
            .clone()
    }

    /// Fire an action unless its cooldown is still running.
    ///
    /// The cooldown timestamp only advances on a successful trigger, so a
    /// hardware failure leaves the next cycle free to retry immediately.
    pub async fn fire(&self, action: &str, cause: &str) -> Result<FireOutcome> {
        if !self.config.auto_open {
            return Err(Error::Disabled("automation disabled".to_string()));
        }

        let state = self.action_state(action).await;
        let mut state = state.lock().await;

        if let Some(last) = state.last_fired {
            let elapsed = last.elapsed();
            if elapsed < self.config.cooldown() {
                let remaining = self.config.cooldown() - elapsed;
                tracing::debug!(
                    action,
                    remaining_secs = remaining.as_secs(),
                    "Action on cooldown"
                );
                return Ok(FireOutcome::OnCooldown { remaining });
            }
        }

        self.actuator.trigger().await?;
        state.last_fired = Some(Instant::now());
        drop(state);

        tracing::info!(action, cause, "Automation fired");
        if let Some(notifier) = &self.notifier {
            let text = format!("Automation '{}' fired: {}", action, cause);
            if let Err(e) = notifier.send(&text).await {
                tracing::warn!(error = %e, "Automation notification failed");
            }
        }
        Ok(FireOutcome::Fired)
    }

    /// Cooldown remaining for an action, if one is running
    pub async fn cooldown_remaining(&self, action: &str) -> Option<Duration> {
        let state = self.action_state(action).await;
        let state = state.lock().await;
        let last = state.last_fired?;
        self.config.cooldown().checked_sub(last.elapsed())
    }
}
