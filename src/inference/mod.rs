//! InferenceService - remote object detection adapter
//!
//! ## Responsibilities
//!
//! - Submit frames to the remote inference server (multipart POST)
//! - Parse detections and map normalized boxes to pixel coordinates
//! - Keep failures distinguishable from "zero detections": a timeout or
//!   transport error is `Err`, an empty list is `Ok(vec![])`

use crate::camera::Frame;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn from_normalized(norm: [f32; 4], width: u32, height: u32) -> Self {
        Self {
            x1: norm[0] * width as f32,
            y1: norm[1] * height as f32,
            x2: norm[2] * width as f32,
            y2: norm[3] * height as f32,
        }
    }

    /// Same box scaled back to [0, 1] coordinates
    pub fn normalized(&self, width: u32, height: u32) -> [f32; 4] {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        [self.x1 / w, self.y1 / h, self.x2 / w, self.y2 / h]
    }
}

/// One detection from a single inference call.
/// Immutable; lives for one orchestration cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Remote inference interface
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Run detection on a frame. `classes` narrows the result server-side;
    /// detections below `threshold` are dropped.
    async fn detect(
        &self,
        frame: &Frame,
        threshold: f32,
        classes: &[String],
    ) -> Result<Vec<Detection>>;
}

/// Wire format of one detection from the inference server
#[derive(Debug, Deserialize)]
struct WireDetection {
    class_name: String,
    confidence: f32,
    #[serde(default)]
    bbox_norm: Option<[f32; 4]>,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

/// HTTP client for the remote inference server
pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Check the inference server is up
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn convert(response: DetectResponse, width: u32, height: u32) -> Vec<Detection> {
        response
            .detections
            .into_iter()
            .filter_map(|wire| {
                let bbox = match (wire.bbox_norm, wire.bbox) {
                    (Some(norm), _) => BBox::from_normalized(norm, width, height),
                    (None, Some(px)) => BBox {
                        x1: px[0],
                        y1: px[1],
                        x2: px[2],
                        y2: px[3],
                    },
                    (None, None) => return None,
                };
                Some(Detection {
                    class_name: wire.class_name,
                    confidence: wire.confidence,
                    bbox,
                })
            })
            .collect()
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn detect(
        &self,
        frame: &Frame,
        threshold: f32,
        classes: &[String],
    ) -> Result<Vec<Detection>> {
        let url = format!("{}/detect", self.base_url);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data().to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("threshold", threshold.to_string())
            .text("classes", serde_json::to_string(classes)?)
            .text("captured_at", frame.captured_at.to_rfc3339());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::service("inference", "request timed out")
                } else {
                    Error::service("inference", e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(Error::service(
                "inference",
                format!("server returned {}", resp.status()),
            ));
        }

        let parsed: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::service("inference", format!("bad response: {}", e)))?;

        Ok(Self::convert(parsed, frame.width, frame.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_center() {
        let bbox = BBox {
            x1: 0.0,
            y1: 0.0,
            x2: 100.0,
            y2: 50.0,
        };
        assert_eq!(bbox.center(), (50.0, 25.0));
    }

    #[test]
    fn normalized_round_trip() {
        let bbox = BBox::from_normalized([0.25, 0.5, 0.75, 1.0], 1920, 1080);
        assert_eq!(bbox.x1, 480.0);
        assert_eq!(bbox.y2, 1080.0);
        let norm = bbox.normalized(1920, 1080);
        assert!((norm[0] - 0.25).abs() < 1e-6);
        assert!((norm[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn convert_prefers_normalized_boxes() {
        let raw = r#"{"detections": [
            {"class_name": "car", "confidence": 0.9, "bbox_norm": [0.0, 0.0, 0.5, 0.5]},
            {"class_name": "person", "confidence": 0.7, "bbox": [10.0, 20.0, 30.0, 40.0]},
            {"class_name": "ghost", "confidence": 0.5}
        ]}"#;
        let parsed: DetectResponse = serde_json::from_str(raw).unwrap();
        let detections = HttpInferenceClient::convert(parsed, 640, 480);

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_name, "car");
        assert_eq!(detections[0].bbox.x2, 320.0);
        assert_eq!(detections[1].bbox.y1, 20.0);
    }

    #[test]
    fn empty_response_is_zero_detections() {
        let parsed: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(HttpInferenceClient::convert(parsed, 640, 480).is_empty());
    }
}
