//! Portable CPU reference implementations of the pixel-level kernels.
//!
//! These are the reference-correct implementations; the GPU shader
//! equivalents in [`super::gpu`] are validated against them statistically,
//! not bit-for-bit.

use rayon::prelude::*;

use crate::common::parallel::rows_per_chunk;
use crate::common::Buffer2;
use crate::loader::PixelBuffer;

/// Absolute 3x3 Laplacian response.
///
/// Kernel:
/// ```text
///  0  1  0
///  1 -4  1
///  0  1  0
/// ```
///
/// Border pixels are left at zero; only interior pixels carry a response.
pub fn laplacian_map(luma: &Buffer2<f32>) -> Buffer2<f32> {
    let width = luma.width();
    let height = luma.height();
    let mut out = Buffer2::new_default(width, height);
    if width < 3 || height < 3 {
        return out;
    }

    let src = luma.pixels();
    let chunk_rows = rows_per_chunk(height);
    out.pixels_mut()
        .par_chunks_mut(chunk_rows * width)
        .enumerate()
        .for_each(|(chunk_idx, rows)| {
            let y0 = chunk_idx * chunk_rows;
            for (row_idx, row) in rows.chunks_mut(width).enumerate() {
                let y = y0 + row_idx;
                if y == 0 || y == height - 1 {
                    continue;
                }
                for (x, value) in row.iter_mut().enumerate().take(width - 1).skip(1) {
                    let i = y * width + x;
                    let response =
                        src[i - 1] + src[i + 1] + src[i - width] + src[i + width] - 4.0 * src[i];
                    *value = response.abs();
                }
            }
        });

    out
}

/// Sobel gradient at an interior pixel of a single plane.
#[inline]
pub fn sobel_at(plane: &[f32], width: usize, x: usize, y: usize) -> (f32, f32) {
    let i = y * width + x;
    let tl = plane[i - width - 1];
    let tc = plane[i - width];
    let tr = plane[i - width + 1];
    let ml = plane[i - 1];
    let mr = plane[i + 1];
    let bl = plane[i + width - 1];
    let bc = plane[i + width];
    let br = plane[i + width + 1];

    let gx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
    let gy = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
    (gx, gy)
}

/// Harris corner response: det(M) - k * trace(M)^2 over a 3x3 window of
/// the gradient second-moment matrix.
pub fn harris_response_map(luma: &Buffer2<f32>, k: f32) -> Buffer2<f32> {
    let width = luma.width();
    let height = luma.height();
    let mut out = Buffer2::new_default(width, height);
    if width < 5 || height < 5 {
        return out;
    }

    let src = luma.pixels();

    // Gradient products, borders zero.
    let mut ixx = vec![0.0f32; width * height];
    let mut iyy = vec![0.0f32; width * height];
    let mut ixy = vec![0.0f32; width * height];

    ixx.par_chunks_mut(width)
        .zip(iyy.par_chunks_mut(width))
        .zip(ixy.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, ((row_xx, row_yy), row_xy))| {
            if y == 0 || y == height - 1 {
                return;
            }
            for x in 1..width - 1 {
                let (gx, gy) = sobel_at(src, width, x, y);
                row_xx[x] = gx * gx;
                row_yy[x] = gy * gy;
                row_xy[x] = gx * gy;
            }
        });

    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            if y < 2 || y >= height - 2 {
                return;
            }
            for (x, value) in row.iter_mut().enumerate().take(width - 2).skip(2) {
                let mut sxx = 0.0f32;
                let mut syy = 0.0f32;
                let mut sxy = 0.0f32;
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        let i = (y as i32 + dy) as usize * width + (x as i32 + dx) as usize;
                        sxx += ixx[i];
                        syy += iyy[i];
                        sxy += ixy[i];
                    }
                }
                let det = sxx * syy - sxy * sxy;
                let trace = sxx + syy;
                *value = det - k * trace * trace;
            }
        });

    out
}

/// Per-block luminance variance over non-overlapping `block_size` blocks.
///
/// Returns one variance per full block, row-major over the block grid.
/// Partial blocks at the right/bottom edges are ignored.
pub fn block_variances(luma: &Buffer2<f32>, block_size: usize) -> Vec<f32> {
    let width = luma.width();
    let height = luma.height();
    let bw = width / block_size;
    let bh = height / block_size;
    if bw == 0 || bh == 0 {
        return Vec::new();
    }

    let src = luma.pixels();
    let mut out = vec![0.0f32; bw * bh];
    out.par_iter_mut().enumerate().for_each(|(bi, value)| {
        let bx = bi % bw;
        let by = bi / bw;
        let x0 = bx * block_size;
        let y0 = by * block_size;

        let n = (block_size * block_size) as f32;
        let mut sum = 0.0f32;
        let mut sum_sq = 0.0f32;
        for y in y0..y0 + block_size {
            for x in x0..x0 + block_size {
                let v = src[y * width + x];
                sum += v;
                sum_sq += v * v;
            }
        }
        let mean = sum / n;
        *value = (sum_sq / n - mean * mean).max(0.0);
    });

    out
}

/// Compression blocking signature map.
///
/// At each `period`-aligned block boundary (horizontal and vertical), the
/// luminance discontinuity across the boundary is compared against the
/// smooth variation just inside the adjacent blocks. Only the excess
/// discontinuity is recorded; non-boundary pixels stay zero.
pub fn blocking_map(luma: &Buffer2<f32>, period: usize) -> Buffer2<f32> {
    let width = luma.width();
    let height = luma.height();
    let mut out = Buffer2::new_default(width, height);
    if width < 2 * period || height < 2 * period {
        return out;
    }

    let src = luma.pixels();
    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let mut v = 0.0f32;

                // Vertical boundary between columns x-1 | x.
                if x % period == 0 && x >= 2 && x + 1 < width {
                    let i = y * width + x;
                    let boundary = (src[i] - src[i - 1]).abs();
                    let interior =
                        ((src[i - 1] - src[i - 2]).abs() + (src[i + 1] - src[i]).abs()) * 0.5;
                    v += (boundary - interior).max(0.0);
                }

                // Horizontal boundary between rows y-1 | y.
                if y % period == 0 && y >= 2 && y + 1 < height {
                    let i = y * width + x;
                    let boundary = (src[i] - src[i - width]).abs();
                    let interior = ((src[i - width] - src[i - 2 * width]).abs()
                        + (src[i + width] - src[i]).abs())
                        * 0.5;
                    v += (boundary - interior).max(0.0);
                }

                *value = v;
            }
        });

    out
}

/// Chromatic aberration map: edge-gated disagreement between the R/G/B
/// gradient vectors.
///
/// Pixels whose mean channel gradient magnitude falls below
/// `edge_threshold` carry no response.
pub fn aberration_map(buffer: &PixelBuffer, edge_threshold: f32) -> Buffer2<f32> {
    let width = buffer.width();
    let height = buffer.height();
    let mut out = Buffer2::new_default(width, height);
    if width < 3 || height < 3 {
        return out;
    }

    // Split channels once so Sobel taps are cheap.
    let n = width * height;
    let mut red = vec![0.0f32; n];
    let mut green = vec![0.0f32; n];
    let mut blue = vec![0.0f32; n];
    for (i, px) in buffer.rgba().chunks_exact(4).enumerate() {
        red[i] = px[0] as f32 / 255.0;
        green[i] = px[1] as f32 / 255.0;
        blue[i] = px[2] as f32 / 255.0;
    }

    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            if y == 0 || y == height - 1 {
                return;
            }
            for (x, value) in row.iter_mut().enumerate().take(width - 1).skip(1) {
                let (rx, ry) = sobel_at(&red, width, x, y);
                let (gx, gy) = sobel_at(&green, width, x, y);
                let (bx, by) = sobel_at(&blue, width, x, y);

                let mr = (rx * rx + ry * ry).sqrt();
                let mg = (gx * gx + gy * gy).sqrt();
                let mb = (bx * bx + by * by).sqrt();
                let mean_mag = (mr + mg + mb) / 3.0;
                if mean_mag < edge_threshold {
                    continue;
                }

                let angular = (angle_disagreement(rx, ry, mr, gx, gy, mg)
                    + angle_disagreement(gx, gy, mg, bx, by, mb)
                    + angle_disagreement(rx, ry, mr, bx, by, mb))
                    / 3.0;

                let var = ((mr - mean_mag).powi(2)
                    + (mg - mean_mag).powi(2)
                    + (mb - mean_mag).powi(2))
                    / 3.0;
                let magnitude = (var.sqrt() / mean_mag.max(1e-6)).min(1.0);

                *value = 0.6 * angular + 0.4 * magnitude;
            }
        });

    out
}

/// Disagreement between two gradient directions in [0, 1].
/// 0 = parallel, 1 = opposite. Degenerate gradients contribute nothing.
#[inline]
fn angle_disagreement(ax: f32, ay: f32, am: f32, bx: f32, by: f32, bm: f32) -> f32 {
    const MIN_MAG: f32 = 1e-4;
    if am < MIN_MAG || bm < MIN_MAG {
        return 0.0;
    }
    let cos = ((ax * bx + ay * by) / (am * bm)).clamp(-1.0, 1.0);
    (1.0 - cos) * 0.5
}

/// Mean brightness along concentric rings from image center to corner.
///
/// Rings partition the normalized radius range [0, 1] into `rings` bands.
pub fn ring_profile(luma: &Buffer2<f32>, rings: usize) -> Vec<f32> {
    assert!(rings > 0, "rings must be positive");
    let width = luma.width();
    let height = luma.height();
    if width == 0 || height == 0 {
        return vec![0.0; rings];
    }

    let cx = (width as f32 - 1.0) * 0.5;
    let cy = (height as f32 - 1.0) * 0.5;
    let max_radius = (cx * cx + cy * cy).sqrt().max(1e-6);

    let mut sums = vec![0.0f64; rings];
    let mut counts = vec![0u64; rings];
    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let r = (dx * dx + dy * dy).sqrt() / max_radius;
            let ring = ((r * rings as f32) as usize).min(rings - 1);
            sums[ring] += *luma.get(x, y) as f64;
            counts[ring] += 1;
        }
    }

    sums.iter()
        .zip(counts.iter())
        .map(|(&s, &c)| if c > 0 { (s / c as f64) as f32 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checkerboard_buffer, uniform_buffer};

    #[test]
    fn test_laplacian_zero_on_uniform() {
        let buffer = uniform_buffer(32, 32, 128);
        let map = laplacian_map(buffer.luma());
        assert!(map.pixels().iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_laplacian_responds_to_edges() {
        let buffer = checkerboard_buffer(32, 32, 4);
        let map = laplacian_map(buffer.luma());
        let max = map.pixels().iter().cloned().fold(0.0f32, f32::max);
        assert!(max > 0.5);
    }

    #[test]
    fn test_laplacian_tiny_image() {
        let buffer = uniform_buffer(2, 2, 10);
        let map = laplacian_map(buffer.luma());
        assert_eq!(map.len(), 4);
        assert!(map.pixels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_harris_flat_has_no_corners() {
        let buffer = uniform_buffer(32, 32, 100);
        let map = harris_response_map(buffer.luma(), 0.04);
        assert!(map.pixels().iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_harris_checkerboard_has_corners() {
        let buffer = checkerboard_buffer(64, 64, 8);
        let map = harris_response_map(buffer.luma(), 0.04);
        let max = map.pixels().iter().cloned().fold(f32::MIN, f32::max);
        assert!(max > 0.0);
    }

    #[test]
    fn test_block_variance_uniform_is_zero() {
        let buffer = uniform_buffer(64, 64, 77);
        let vars = block_variances(buffer.luma(), 8);
        assert_eq!(vars.len(), 64);
        assert!(vars.iter().all(|&v| v < 1e-6));
    }

    #[test]
    fn test_block_variance_ignores_partial_blocks() {
        let buffer = uniform_buffer(20, 12, 50);
        let vars = block_variances(buffer.luma(), 8);
        // 20/8 = 2 full columns, 12/8 = 1 full row.
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_blocking_map_zero_on_uniform() {
        let buffer = uniform_buffer(64, 64, 90);
        let map = blocking_map(buffer.luma(), 8);
        assert!(map.pixels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_blocking_map_detects_grid() {
        // Checkerboard with 8px cells puts hard edges exactly on the
        // 8-pixel boundaries.
        let buffer = checkerboard_buffer(64, 64, 8);
        let map = blocking_map(buffer.luma(), 8);
        let total: f32 = map.pixels().iter().sum();
        assert!(total > 1.0);
    }

    #[test]
    fn test_aberration_zero_on_gray() {
        // Gray image: all channel gradients agree, so no aberration.
        let buffer = checkerboard_buffer(32, 32, 8);
        let map = aberration_map(&buffer, 0.1);
        assert!(map.pixels().iter().all(|&v| v < 1e-3));
    }

    #[test]
    fn test_ring_profile_uniform() {
        let buffer = uniform_buffer(50, 50, 128);
        let profile = ring_profile(buffer.luma(), 8);
        assert_eq!(profile.len(), 8);
        for &v in &profile {
            assert!((v - 128.0 / 255.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_ring_profile_dark_corners() {
        // Radial falloff: bright center, dark corners.
        let width = 64usize;
        let height = 64usize;
        let mut rgba = vec![0u8; width * height * 4];
        for y in 0..height {
            for x in 0..width {
                let dx = x as f32 - 31.5;
                let dy = y as f32 - 31.5;
                let r = (dx * dx + dy * dy).sqrt() / 45.0;
                let v = (255.0 * (1.0 - r * 0.8).max(0.0)) as u8;
                let i = (y * width + x) * 4;
                rgba[i] = v;
                rgba[i + 1] = v;
                rgba[i + 2] = v;
                rgba[i + 3] = 255;
            }
        }
        let buffer = crate::loader::PixelBuffer::from_rgba(width, height, rgba).unwrap();
        let profile = ring_profile(buffer.luma(), 8);
        assert!(profile[0] > profile[7]);
    }
}
