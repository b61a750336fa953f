//! Detection log - bounded in-memory record of accepted detections
//!
//! The store keeps the most recent N records in a ring; older entries fall
//! off the back. Records are append-only and immutable once saved.

use crate::inference::BBox;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

/// One logged detection event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: u64,
    pub object_type: String,
    pub confidence: f32,
    pub bbox: BBox,
    /// Snapshot path, when one was saved
    pub image_path: Option<PathBuf>,
    /// What the pipeline did about it ("notified", "garage_triggered", ...)
    pub action_taken: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Detection persistence interface
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Append a record, returning its assigned id
    async fn save(&self, record: DetectionRecord) -> u64;
    /// Most recent records, newest first
    async fn recent(&self, limit: usize) -> Vec<DetectionRecord>;
}

struct StoreInner {
    records: VecDeque<DetectionRecord>,
    next_id: u64,
}

/// In-memory ring buffer store
pub struct MemoryDetectionStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl MemoryDetectionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                next_id: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryDetectionStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl DetectionStore for MemoryDetectionStore {
    async fn save(&self, mut record: DetectionRecord) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        record.id = id;

        if inner.records.len() >= self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
        id
    }

    async fn recent(&self, limit: usize) -> Vec<DetectionRecord> {
        let inner = self.lock();
        inner.records.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(object_type: &str) -> DetectionRecord {
        DetectionRecord {
            id: 0,
            object_type: object_type.to_string(),
            confidence: 0.9,
            bbox: BBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
            image_path: None,
            action_taken: Vec::new(),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_recent_is_newest_first() {
        let store = MemoryDetectionStore::new(10);
        let a = store.save(record("car")).await;
        let b = store.save(record("person")).await;
        assert!(b > a);

        let recent = store.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].object_type, "person");
        assert_eq!(recent[1].object_type, "car");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = MemoryDetectionStore::new(3);
        for i in 0..5 {
            store.save(record(&format!("obj{}", i))).await;
        }
        assert_eq!(store.len(), 3);

        let recent = store.recent(10).await;
        assert_eq!(recent[0].object_type, "obj4");
        assert_eq!(recent[2].object_type, "obj2");
    }
}
