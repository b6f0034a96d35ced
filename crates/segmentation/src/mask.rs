use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::SegmentError;

/// Binary mask, row-major, one byte per pixel (`0` or `1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize)],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y as usize) * (self.width as usize) + x as usize] != 0
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

pub fn blank_overlay(width: u32, height: u32) -> RgbaImage {
    RgbaImage::new(width, height)
}

/// `color` over masked pixels, fully transparent everywhere else.
pub fn composite_overlay(mask: &Mask, color: [u8; 4]) -> RgbaImage {
    let fill = Rgba(color);
    let mut out = blank_overlay(mask.width, mask.height);
    for (x, y, px) in out.enumerate_pixels_mut() {
        if mask.get(x, y) {
            *px = fill;
        }
    }
    out
}

pub fn encode_png(raster: &RgbaImage) -> Result<Vec<u8>, SegmentError> {
    let mut buf = Cursor::new(Vec::new());
    raster.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal(n: u32) -> Mask {
        let mut mask = Mask::empty(n, n);
        for i in 0..n {
            mask.data[(i * n + i) as usize] = 1;
        }
        mask
    }

    #[test]
    fn test_composite_only_touches_masked_pixels() {
        let raster = composite_overlay(&diagonal(4), [0, 114, 255, 140]);
        assert_eq!(raster.get_pixel(2, 2).0, [0, 114, 255, 140]);
        assert_eq!(raster.get_pixel(1, 2).0, [0, 0, 0, 0]);
        assert_eq!(raster.dimensions(), (4, 4));
    }

    #[test]
    fn test_png_roundtrip_keeps_alpha() {
        let raster = composite_overlay(&diagonal(3), [10, 20, 30, 40]);
        let png = encode_png(&raster).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let back = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(back, raster);
    }

    #[test]
    fn test_mask_get_out_of_bounds_is_false() {
        let mask = diagonal(2);
        assert!(mask.get(1, 1));
        assert!(!mask.get(5, 0));
        assert_eq!(mask.count(), 2);
    }
}
