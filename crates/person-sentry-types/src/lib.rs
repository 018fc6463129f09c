//! Shared domain models for the person-sentry workspace.
//!
//! This crate centralizes the lightweight data structures passed between the
//! vision, index, and pipeline crates. Keep it backend-agnostic and free of
//! model or broker dependencies so every crate can depend on it without
//! pulling native SDKs or heavy features.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// System-wide default embedding dimension. Both the re-id model of the
/// original deployment and the built-in histogram embedder produce vectors
/// of this length.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// One encoded frame as received from the frame source. Transient: owned by
/// the consumer for the duration of a single processing cycle.
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    received_at: DateTime<Utc>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("bytes", &self.data.len())
            .field("received_at", &self.received_at)
            .finish()
    }
}

impl Frame {
    pub fn new(data: Vec<u8>, received_at: DateTime<Utc>) -> Self {
        Self {
            data: Arc::from(data.into_boxed_slice()),
            received_at,
        }
    }

    pub fn received_now(data: Vec<u8>) -> Self {
        Self::new(data, Utc::now())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Axis-aligned pixel-corner bounding box, `(x1, y1)` top-left inclusive and
/// `(x2, y2)` bottom-right exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> TypesResult<Self> {
        if x2 <= x1 || y2 <= y1 {
            return Err(TypesError::DegenerateBox { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Intersects the box with a `width` x `height` image, returning `None`
    /// when nothing of the box remains inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        let x2 = self.x2.min(width);
        let y2 = self.y2.min(height);
        BoundingBox::new(x1, y1, x2, y2).ok()
    }
}

/// One localized person: a bounding box plus the localizer's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    bbox: BoundingBox,
    confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Fixed-dimension appearance fingerprint of one person crop.
///
/// Extractors are required to be deterministic: identical crop bytes always
/// yield the identical vector, which is what makes broker redelivery
/// idempotent downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> TypesResult<Self> {
        if values.is_empty() {
            return Err(TypesError::EmptyEmbedding);
        }
        Ok(Self { values })
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn l2_norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Scales the vector to unit length. A zero vector is returned unchanged.
    pub fn into_unit_norm(mut self) -> Self {
        let norm = self.l2_norm();
        if norm > 0.0 {
            for value in &mut self.values {
                *value /= norm;
            }
        }
        self
    }
}

/// Append-only record held by the identity store. Created exactly once per
/// resolved new identity and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PersonRecord {
    id: String,
    embedding: Embedding,
    first_seen: DateTime<Utc>,
}

impl PersonRecord {
    pub fn new(id: String, embedding: Embedding, first_seen: DateTime<Utc>) -> Self {
        Self {
            id,
            embedding,
            first_seen,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }
}

/// Outbound alert record. Serialized by the publisher, then discarded; the
/// core never stores alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub person_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

impl Alert {
    pub fn new(person_id: String, timestamp: DateTime<Utc>, image: Vec<u8>) -> Self {
        Self {
            person_id,
            timestamp,
            image,
        }
    }
}

/// Serde adapter encoding the alert image payload as standard base64, the
/// form the dashboard and notification sinks expect.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

pub type TypesResult<T> = Result<T, TypesError>;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("degenerate bounding box ({x1},{y1})-({x2},{y2})")]
    DegenerateBox { x1: u32, y1: u32, x2: u32, y2: u32 },

    #[error("embedding must contain at least one value")]
    EmptyEmbedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_rejects_degenerate_corners() {
        assert!(BoundingBox::new(10, 10, 10, 20).is_err());
        assert!(BoundingBox::new(10, 10, 20, 10).is_err());
        assert!(BoundingBox::new(10, 10, 20, 20).is_ok());
    }

    #[test]
    fn bounding_box_clamps_to_image_bounds() {
        let bbox = BoundingBox::new(100, 50, 300, 200).unwrap();
        let clamped = bbox.clamp_to(200, 400).unwrap();
        assert_eq!(clamped.x2(), 200);
        assert_eq!(clamped.y2(), 200);
        assert_eq!(clamped.width(), 100);

        let outside = BoundingBox::new(500, 500, 600, 600).unwrap();
        assert!(outside.clamp_to(200, 400).is_none());
    }

    #[test]
    fn embedding_normalizes_to_unit_length() {
        let embedding = Embedding::from_vec(vec![3.0, 4.0]).unwrap().into_unit_norm();
        assert!((embedding.l2_norm() - 1.0).abs() < 1e-6);
        assert_eq!(embedding.as_slice(), &[0.6, 0.8]);
    }

    #[test]
    fn zero_embedding_survives_normalization() {
        let embedding = Embedding::from_vec(vec![0.0, 0.0]).unwrap().into_unit_norm();
        assert_eq!(embedding.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn alert_serializes_image_as_base64() {
        let timestamp = "2026-01-02T03:04:05Z".parse().unwrap();
        let alert = Alert::new("person-1".into(), timestamp, vec![1, 2, 3]);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["person_id"], "person-1");
        assert_eq!(json["image"], "AQID");
        assert!(json["timestamp"].as_str().unwrap().starts_with("2026-01-02"));

        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back.image, vec![1, 2, 3]);
    }
}
