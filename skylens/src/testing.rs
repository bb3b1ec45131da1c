//! Synthetic image helpers shared across tests.

use std::io::Cursor;

use image::{Rgba, RgbaImage};

use crate::loader::PixelBuffer;

/// Encode an RGBA image as PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encode failed");
    bytes
}

/// Horizontal luminance gradient, black to white.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _y| {
        let v = (x as f32 / (width.max(2) - 1) as f32 * 255.0) as u8;
        Rgba([v, v, v, 255])
    })
}

/// Uniform gray image.
pub fn uniform_image(width: u32, height: u32, value: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
}

/// Black/white checkerboard with the given cell size.
pub fn checkerboard_image(width: u32, height: u32, cell: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = if ((x / cell) + (y / cell)) % 2 == 0 {
            255
        } else {
            0
        };
        Rgba([v, v, v, 255])
    })
}

/// Uniform gray image with deterministic pseudo-random noise added.
pub fn noisy_image(width: u32, height: u32, base: u8, amplitude: u8) -> RgbaImage {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0x5eed);
    RgbaImage::from_fn(width, height, |_x, _y| {
        let delta = rng.random_range(-(amplitude as i16)..=amplitude as i16);
        let v = (base as i16 + delta).clamp(0, 255) as u8;
        Rgba([v, v, v, 255])
    })
}

/// Build a [`PixelBuffer`] straight from an RGBA image without going
/// through the decoder.
pub fn buffer_from_image(img: &RgbaImage) -> PixelBuffer {
    PixelBuffer::from_rgba(
        img.width() as usize,
        img.height() as usize,
        img.as_raw().clone(),
    )
    .expect("valid dimensions")
}

/// Uniform gray pixel buffer.
pub fn uniform_buffer(width: u32, height: u32, value: u8) -> PixelBuffer {
    buffer_from_image(&uniform_image(width, height, value))
}

/// Checkerboard pixel buffer.
pub fn checkerboard_buffer(width: u32, height: u32, cell: u32) -> PixelBuffer {
    buffer_from_image(&checkerboard_image(width, height, cell))
}
