//! Camera subsystem
//!
//! ## Responsibilities
//!
//! - Own the physical capture device behind the [`FrameSource`] trait
//! - Keep a single-slot [`FrameBuffer`] fresh via the [`CaptureSupervisor`]
//! - Detect slow or stalled capture and recover through [`CameraRefresher`]
//! - Track device health in [`CameraHealth`]
//!
//! The capture loop is the only writer of the frame buffer; the detection
//! orchestrator and any snapshot consumers are readers. Last write wins,
//! readers never block the writer.

mod frame_buffer;
mod health;
mod refresher;
mod source;
mod supervisor;

pub use frame_buffer::FrameBuffer;
pub use health::{CameraHealth, CameraHealthStatus};
pub use refresher::CameraRefresher;
pub use source::{FfmpegFrameSource, Frame, FrameSource};
pub use supervisor::{CaptureSupervisor, RefreshRequest};
