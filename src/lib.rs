//! homepi-sentinel: security camera pipeline for a home automation hub
//!
//! Continuously captures frames from a local camera, runs remote object
//! detection on the freshest frame, and reacts: logs detections, sends
//! alerts, follows objects with the pan-tilt mount, sweeps saved patrol
//! positions when idle, and opens the garage for recognized vehicles.
//!
//! ## Components
//!
//! - `camera`: frame source, latest-frame buffer, capture supervision,
//!   health tracking and cooldown-gated device refresh
//! - `inference`: HTTP client for the remote detection server
//! - `detection`: the periodic detect-decide-act orchestrator
//! - `detection_log`: bounded in-memory detection history
//! - `tracking`: proportional pan-tilt object following
//! - `patrol`: ping-pong sweep state machine with interrupt/auto-resume
//! - `pantilt`: servo mount abstraction and simulator
//! - `automation`: cooldown-gated garage trigger
//! - `notifier`: Telegram alerts

pub mod automation;
pub mod camera;
pub mod config;
pub mod detection;
pub mod detection_log;
pub mod error;
pub mod inference;
pub mod notifier;
pub mod pantilt;
pub mod patrol;
pub mod state;
pub mod tracking;

pub use error::{Error, Result};
pub use state::AppState;
