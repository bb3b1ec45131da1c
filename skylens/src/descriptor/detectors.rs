//! Feature detectors over the luminance plane.
//!
//! Four independent detectors feed the descriptor analyzer: Harris
//! corners (via the kernel backend), a FAST-style circle test, Sobel
//! edge points, and difference-of-Gaussians blobs. Each detector
//! normalizes its responses to [0, 1] so the merged candidate list is
//! comparable across detector families.

use crate::common::Buffer2;
use crate::kernels::{cpu, ExecutionContext};

use super::keypoint::{Keypoint, KeypointKind};
use super::DescriptorConfig;

/// Radius-3 Bresenham circle used by the FAST test.
const FAST_CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a FAST detection.
const FAST_ARC: usize = 9;

/// Harris corners: kernel-backend response map, 3x3 local maxima above
/// a fraction of the peak response.
pub fn harris_corners(
    luma: &Buffer2<f32>,
    config: &DescriptorConfig,
    ctx: &ExecutionContext,
) -> Vec<Keypoint> {
    let response = ctx.harris_response(luma, config.harris_k);
    let peak = response
        .pixels()
        .iter()
        .fold(0.0f32, |acc, &v| acc.max(v));
    if peak <= 0.0 {
        return Vec::new();
    }
    let threshold = peak * config.harris_relative_threshold;

    let width = response.width();
    let height = response.height();
    let mut keypoints = Vec::new();
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let v = *response.get(x, y);
            if v < threshold || !is_local_max(&response, x, y, v) {
                continue;
            }
            keypoints.push(Keypoint {
                x: x as f32,
                y: y as f32,
                strength: v / peak,
                scale: 1.0,
                orientation: orientation_at(luma, x, y),
                kind: KeypointKind::Corner,
            });
        }
    }
    keypoints
}

/// FAST-style segment test: a corner exists where at least [`FAST_ARC`]
/// contiguous circle pixels are all brighter, or all darker, than the
/// center by the configured threshold.
pub fn fast_corners(luma: &Buffer2<f32>, config: &DescriptorConfig) -> Vec<Keypoint> {
    let width = luma.width();
    let height = luma.height();
    if width < 7 || height < 7 {
        return Vec::new();
    }
    let t = config.fast_threshold;

    let mut keypoints = Vec::new();
    for y in 3..height - 3 {
        for x in 3..width - 3 {
            let center = *luma.get(x, y);
            let mut states = [0i8; 16];
            for (i, (dx, dy)) in FAST_CIRCLE.iter().enumerate() {
                let v = *luma.get((x as i32 + dx) as usize, (y as i32 + dy) as usize);
                states[i] = if v > center + t {
                    1
                } else if v < center - t {
                    -1
                } else {
                    0
                };
            }
            if let Some(contrast) = segment_contrast(&states, luma, x, y, center) {
                keypoints.push(Keypoint {
                    x: x as f32,
                    y: y as f32,
                    strength: (contrast / (t * 4.0)).clamp(0.0, 1.0),
                    scale: 1.0,
                    orientation: orientation_at(luma, x, y),
                    kind: KeypointKind::Corner,
                });
            }
        }
    }
    keypoints
}

/// Sobel edge points: gradient magnitude maxima above threshold.
pub fn edge_points(luma: &Buffer2<f32>, config: &DescriptorConfig) -> Vec<Keypoint> {
    let width = luma.width();
    let height = luma.height();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let mut magnitude = Buffer2::new_default(width, height);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let (gx, gy) = cpu::sobel_at(luma.pixels(), width, x, y);
            *magnitude.get_mut(x, y) = (gx * gx + gy * gy).sqrt();
        }
    }
    let peak = magnitude
        .pixels()
        .iter()
        .fold(0.0f32, |acc, &v| acc.max(v));
    if peak <= config.edge_threshold {
        return Vec::new();
    }

    let mut keypoints = Vec::new();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let v = *magnitude.get(x, y);
            if v < config.edge_threshold || !is_local_max(&magnitude, x, y, v) {
                continue;
            }
            keypoints.push(Keypoint {
                x: x as f32,
                y: y as f32,
                strength: v / peak,
                scale: 1.0,
                orientation: orientation_at(luma, x, y),
                kind: KeypointKind::Edge,
            });
        }
    }
    keypoints
}

/// Difference-of-Gaussians blobs: |G(σ) − G(kσ)| extrema.
pub fn blob_points(luma: &Buffer2<f32>, config: &DescriptorConfig) -> Vec<Keypoint> {
    let width = luma.width();
    let height = luma.height();
    if width < 9 || height < 9 {
        return Vec::new();
    }

    let sigma = config.blob_sigma;
    let narrow = gaussian_blur(luma, sigma);
    let wide = gaussian_blur(luma, sigma * 1.6);

    let mut dog = Buffer2::new_default(width, height);
    for i in 0..dog.len() {
        dog.pixels_mut()[i] = (narrow.pixels()[i] - wide.pixels()[i]).abs();
    }

    let peak = dog.pixels().iter().fold(0.0f32, |acc, &v| acc.max(v));
    if peak <= 0.0 {
        return Vec::new();
    }
    let threshold = (peak * 0.2).max(config.blob_threshold);

    let mut keypoints = Vec::new();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let v = *dog.get(x, y);
            if v < threshold || !is_local_max(&dog, x, y, v) {
                continue;
            }
            keypoints.push(Keypoint {
                x: x as f32,
                y: y as f32,
                strength: v / peak,
                scale: sigma,
                orientation: orientation_at(luma, x, y),
                kind: KeypointKind::Blob,
            });
        }
    }
    keypoints
}

/// Separable Gaussian blur with a radius of 3 sigma.
pub fn gaussian_blur(src: &Buffer2<f32>, sigma: f32) -> Buffer2<f32> {
    let width = src.width();
    let height = src.height();
    let radius = (sigma * 3.0).ceil() as i32;

    let mut kernel = Vec::with_capacity((radius * 2 + 1) as usize);
    let mut sum = 0.0f32;
    for i in -radius..=radius {
        let w = (-(i * i) as f32 / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }

    // Horizontal pass, edges clamped.
    let mut tmp = Buffer2::new_default(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for (ki, w) in kernel.iter().enumerate() {
                let sx = (x as i32 + ki as i32 - radius).clamp(0, width as i32 - 1) as usize;
                acc += *src.get(sx, y) * w;
            }
            *tmp.get_mut(x, y) = acc;
        }
    }

    // Vertical pass.
    let mut out = Buffer2::new_default(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for (ki, w) in kernel.iter().enumerate() {
                let sy = (y as i32 + ki as i32 - radius).clamp(0, height as i32 - 1) as usize;
                acc += *tmp.get(x, sy) * w;
            }
            *out.get_mut(x, y) = acc;
        }
    }
    out
}

fn is_local_max(map: &Buffer2<f32>, x: usize, y: usize, v: f32) -> bool {
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            if nx < 0 || ny < 0 || nx >= map.width() as i32 || ny >= map.height() as i32 {
                continue;
            }
            if *map.get(nx as usize, ny as usize) > v {
                return false;
            }
        }
    }
    true
}

/// Gradient orientation, zero at the plane border.
fn orientation_at(luma: &Buffer2<f32>, x: usize, y: usize) -> f32 {
    if x == 0 || y == 0 || x >= luma.width() - 1 || y >= luma.height() - 1 {
        return 0.0;
    }
    let (gx, gy) = cpu::sobel_at(luma.pixels(), luma.width(), x, y);
    gy.atan2(gx)
}

/// Longest wrap-around run of same-sign circle states; returns the mean
/// center contrast over that run when it reaches [`FAST_ARC`].
fn segment_contrast(
    states: &[i8; 16],
    luma: &Buffer2<f32>,
    x: usize,
    y: usize,
    center: f32,
) -> Option<f32> {
    for sign in [1i8, -1i8] {
        let mut best_run = 0usize;
        let mut best_start = 0usize;
        let mut run = 0usize;
        // Doubled walk handles wrap-around runs.
        for i in 0..32 {
            if states[i % 16] == sign {
                run += 1;
                if run > best_run {
                    best_run = run;
                    best_start = i + 1 - run;
                }
            } else {
                run = 0;
            }
        }
        if best_run >= FAST_ARC {
            let mut contrast = 0.0f32;
            for i in best_start..best_start + best_run.min(16) {
                let (dx, dy) = FAST_CIRCLE[i % 16];
                let v = *luma.get((x as i32 + dx) as usize, (y as i32 + dy) as usize);
                contrast += (v - center).abs();
            }
            return Some(contrast / best_run.min(16) as f32);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checkerboard_buffer, uniform_buffer};

    fn default_config() -> DescriptorConfig {
        DescriptorConfig::default()
    }

    #[test]
    fn test_uniform_yields_no_keypoints() {
        let buffer = uniform_buffer(32, 32, 128);
        let ctx = ExecutionContext::cpu_only();
        let config = default_config();
        assert!(harris_corners(buffer.luma(), &config, &ctx).is_empty());
        assert!(fast_corners(buffer.luma(), &config).is_empty());
        assert!(edge_points(buffer.luma(), &config).is_empty());
        assert!(blob_points(buffer.luma(), &config).is_empty());
    }

    #[test]
    fn test_checkerboard_has_corners_and_edges() {
        let buffer = checkerboard_buffer(64, 64, 8);
        let ctx = ExecutionContext::cpu_only();
        let config = default_config();
        let corners = harris_corners(buffer.luma(), &config, &ctx);
        let edges = edge_points(buffer.luma(), &config);
        assert!(!corners.is_empty());
        assert!(!edges.is_empty());
        for kp in corners.iter().chain(edges.iter()) {
            assert!((0.0..=1.0).contains(&kp.strength));
        }
    }

    #[test]
    fn test_single_bright_spot_is_a_blob() {
        let mut luma = Buffer2::new_filled(32, 32, 0.25f32);
        // 3x3 bright spot in the middle.
        for y in 15..18 {
            for x in 15..18 {
                *luma.get_mut(x, y) = 0.9;
            }
        }
        let blobs = blob_points(&luma, &default_config());
        assert!(!blobs.is_empty());
        let near_center = blobs
            .iter()
            .any(|kp| (kp.x - 16.0).abs() < 3.0 && (kp.y - 16.0).abs() < 3.0);
        assert!(near_center);
    }

    #[test]
    fn test_gaussian_blur_preserves_mean() {
        let buffer = checkerboard_buffer(32, 32, 4);
        let blurred = gaussian_blur(buffer.luma(), 1.5);
        let mean_before: f32 =
            buffer.luma().pixels().iter().sum::<f32>() / buffer.luma().len() as f32;
        let mean_after: f32 = blurred.pixels().iter().sum::<f32>() / blurred.len() as f32;
        assert!((mean_before - mean_after).abs() < 0.02);
    }
}
