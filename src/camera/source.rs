//! Frame source abstraction and the ffmpeg-backed implementation
//!
//! A [`FrameSource`] owns the physical device. `capture` grabs exactly one
//! frame; `open`/`close` bracket the device lifetime so the refresher can
//! cycle it without tearing down the rest of the pipeline.

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::RwLock;

/// One captured image plus its capture timestamp.
///
/// The payload is shared, so cloning a frame never copies pixel data and
/// consumers can hold a frame while the capture loop keeps publishing.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    /// JPEG bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Capture device interface
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Initialize the device. Must complete before `capture` is called.
    async fn open(&self) -> Result<()>;

    /// Grab one frame. May block on hardware I/O up to the device timeout.
    async fn capture(&self) -> Result<Frame>;

    /// Release the device handle.
    async fn close(&self);

    async fn is_open(&self) -> bool;
}

/// Frame source that shells out to ffmpeg for single-frame grabs
///
/// Works against both RTSP URLs and local V4L2 devices. Each capture spawns
/// ffmpeg with `kill_on_drop(true)`: when the capture timeout fires and the
/// future is cancelled, the child is dropped and SIGKILLed, so unresponsive
/// cameras cannot accumulate zombie processes.
pub struct FfmpegFrameSource {
    config: CameraConfig,
    opened: RwLock<bool>,
}

impl FfmpegFrameSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            opened: RwLock::new(false),
        }
    }

    /// Check that ffmpeg is on the PATH
    pub async fn check_ffmpeg() -> Result<String> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|e| Error::Config(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Config("ffmpeg version check failed".to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }

    /// Video filter chain: scale to the configured size, then rotate
    fn filter_chain(&self) -> String {
        let mut chain = format!("scale={}:{}", self.config.width, self.config.height);
        match ((self.config.rotation % 360) + 360) % 360 {
            90 => chain.push_str(",transpose=1"),
            180 => chain.push_str(",hflip,vflip"),
            270 => chain.push_str(",transpose=2"),
            _ => {}
        }
        chain
    }

    fn input_args(&self) -> Vec<String> {
        if self.config.source.starts_with("rtsp://") {
            vec![
                "-rtsp_transport".to_string(),
                "tcp".to_string(),
                "-i".to_string(),
                self.config.source.clone(),
            ]
        } else {
            vec![
                "-f".to_string(),
                "v4l2".to_string(),
                "-i".to_string(),
                self.config.source.clone(),
            ]
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn open(&self) -> Result<()> {
        {
            let opened = self.opened.read().await;
            if *opened {
                return Ok(());
            }
        }

        Self::check_ffmpeg().await?;

        // Hardware settle; some sensors deliver garbage right after power-up
        tokio::time::sleep(Duration::from_millis(self.config.warmup_ms)).await;

        *self.opened.write().await = true;
        tracing::info!(source = %self.config.source, "Frame source opened");
        Ok(())
    }

    async fn capture(&self) -> Result<Frame> {
        if !*self.opened.read().await {
            return Err(Error::Disabled("frame source is not open".to_string()));
        }

        use std::process::Stdio;

        let mut args = self.input_args();
        args.extend(
            [
                "-frames:v",
                "1",
                "-vf",
                &self.filter_chain(),
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-loglevel",
                "error",
                "-y",
                "-",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transient("capture", format!("ffmpeg spawn failed: {}", e)))?;

        let timeout = Duration::from_millis(self.config.capture_timeout_ms);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::transient(
                        "capture",
                        format!("ffmpeg failed: {}", stderr.trim()),
                    ));
                }
                if output.stdout.is_empty() {
                    return Err(Error::transient("capture", "ffmpeg returned empty output"));
                }
                Ok(Frame::new(
                    output.stdout,
                    self.config.width,
                    self.config.height,
                ))
            }
            Ok(Err(e)) => Err(Error::transient(
                "capture",
                format!("ffmpeg execution failed: {}", e),
            )),
            Err(_) => {
                // Child dropped here; kill_on_drop reaps the process
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    source = %self.config.source,
                    "Capture timeout, ffmpeg killed"
                );
                Err(Error::transient(
                    "capture",
                    format!("capture timeout ({} ms)", timeout.as_millis()),
                ))
            }
        }
    }

    async fn close(&self) {
        let mut opened = self.opened.write().await;
        if *opened {
            *opened = false;
            tracing::info!(source = %self.config.source, "Frame source closed");
        }
    }

    async fn is_open(&self) -> bool {
        *self.opened.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clone_shares_payload() {
        let frame = Frame::new(vec![1, 2, 3], 4, 3);
        let copy = frame.clone();
        assert_eq!(copy.data(), frame.data());
        assert_eq!(copy.width, 4);
    }

    #[test]
    fn filter_chain_includes_rotation() {
        let source = FfmpegFrameSource::new(CameraConfig {
            rotation: 180,
            width: 640,
            height: 480,
            ..CameraConfig::default()
        });
        assert_eq!(source.filter_chain(), "scale=640:480,hflip,vflip");
    }

    #[test]
    fn rtsp_source_uses_tcp_transport() {
        let source = FfmpegFrameSource::new(CameraConfig {
            source: "rtsp://cam.local/stream".to_string(),
            ..CameraConfig::default()
        });
        assert_eq!(source.input_args()[0], "-rtsp_transport");
    }

    #[tokio::test]
    async fn capture_requires_open() {
        let source = FfmpegFrameSource::new(CameraConfig::default());
        let result = source.capture().await;
        assert!(matches!(result, Err(Error::Disabled(_))));
    }
}
