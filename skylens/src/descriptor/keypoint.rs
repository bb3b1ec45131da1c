//! Keypoint candidates and spatial deduplication.

use serde::{Deserialize, Serialize};

/// Detector family that produced a keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeypointKind {
    Corner,
    Edge,
    Blob,
}

/// A candidate feature point on the luminance plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Column, in pixels.
    pub x: f32,
    /// Row, in pixels.
    pub y: f32,
    /// Detector response, normalized to [0, 1] within its detector.
    pub strength: f32,
    /// Detection scale in pixels.
    pub scale: f32,
    /// Dominant gradient orientation in radians.
    pub orientation: f32,
    pub kind: KeypointKind,
}

impl Keypoint {
    pub fn distance_sq(&self, other: &Keypoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Sort by strength descending, then keep each keypoint only if it is
/// further than `min_distance` from every already-kept one. Greedy, so
/// the strongest of any cluster always survives.
pub fn dedup(mut keypoints: Vec<Keypoint>, min_distance: f32) -> Vec<Keypoint> {
    keypoints.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let min_sq = min_distance * min_distance;
    let mut kept: Vec<Keypoint> = Vec::with_capacity(keypoints.len());
    for candidate in keypoints {
        if kept.iter().all(|k| candidate.distance_sq(k) >= min_sq) {
            kept.push(candidate);
        }
    }
    kept
}
