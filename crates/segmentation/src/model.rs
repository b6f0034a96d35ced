use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{LoadProgress, Mask, Point, PointLabel, SegmentError};

pub const DEFAULT_LONGEST_EDGE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Model input: the resized image padded to a square canvas, plus the two
/// sizes needed to map prompts in and masks back out.
#[derive(Debug, Clone)]
pub struct ImageInputs {
    pub pixel_values: RgbImage,
    pub original_size: ImageSize,
    pub reshaped_input_size: ImageSize,
}

/// Per-cell image features over the padded input grid. Cells at or beyond
/// `valid_cols`/`valid_rows` cover padding only.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub cols: usize,
    pub rows: usize,
    pub valid_cols: usize,
    pub valid_rows: usize,
    pub cell: u32,
    pub features: Vec<[f32; 3]>,
}

impl Embedding {
    pub fn feature(&self, col: usize, row: usize) -> [f32; 3] {
        self.features[row * self.cols + col]
    }

    /// Cell under a point given in reshaped input pixels, clamped to the
    /// non-padding area.
    pub fn cell_at(&self, point: [f32; 2]) -> (usize, usize) {
        let col = (point[0].max(0.0) / self.cell as f32) as usize;
        let row = (point[1].max(0.0) / self.cell as f32) as usize;
        (
            col.min(self.valid_cols.saturating_sub(1)),
            row.min(self.valid_rows.saturating_sub(1)),
        )
    }
}

/// Low-resolution mask over the embedding grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridMask {
    pub cols: usize,
    pub rows: usize,
    pub cell: u32,
    pub cells: Vec<bool>,
}

impl GridMask {
    pub fn empty(cols: usize, rows: usize, cell: u32) -> Self {
        Self {
            cols,
            rows,
            cell,
            cells: vec![false; cols * rows],
        }
    }

    pub fn get(&self, col: usize, row: usize) -> bool {
        self.cells[row * self.cols + col]
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub masks: Vec<GridMask>,
    pub scores: Vec<f32>,
}

pub trait SegmentModel: Send {
    fn model_id(&self) -> &str;

    fn embed(&self, inputs: &ImageInputs) -> Result<Embedding, SegmentError>;

    /// `points` are in reshaped input pixels, one label per point.
    fn decode(
        &self,
        embedding: &Embedding,
        points: &[[f32; 2]],
        labels: &[PointLabel],
    ) -> Result<ModelOutput, SegmentError>;
}

pub struct LoadedModel {
    pub model: Box<dyn SegmentModel>,
    pub processor: Processor,
}

pub trait ModelLoader: Send + 'static {
    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<LoadedModel, SegmentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processor {
    longest_edge: u32,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new(DEFAULT_LONGEST_EDGE)
    }
}

impl Processor {
    pub fn new(longest_edge: u32) -> Self {
        Self {
            longest_edge: longest_edge.max(1),
        }
    }

    pub fn longest_edge(&self) -> u32 {
        self.longest_edge
    }

    pub fn reshaped_size(&self, original: ImageSize) -> ImageSize {
        let longest = original.width.max(original.height).max(1) as f64;
        let scale = self.longest_edge as f64 / longest;
        let w = ((original.width as f64 * scale).round() as u32).clamp(1, self.longest_edge);
        let h = ((original.height as f64 * scale).round() as u32).clamp(1, self.longest_edge);
        ImageSize::new(w, h)
    }

    pub fn preprocess(&self, image: &DynamicImage) -> ImageInputs {
        let original_size = ImageSize::new(image.width(), image.height());
        let reshaped = self.reshaped_size(original_size);
        let rgb = image.to_rgb8();
        let resized = imageops::resize(&rgb, reshaped.width, reshaped.height, FilterType::Triangle);
        let mut padded = RgbImage::new(self.longest_edge, self.longest_edge);
        imageops::replace(&mut padded, &resized, 0, 0);
        ImageInputs {
            pixel_values: padded,
            original_size,
            reshaped_input_size: reshaped,
        }
    }

    /// Normalized prompts to reshaped input pixels: `x * w`, `y * h`.
    pub fn map_points(&self, inputs: &ImageInputs, points: &[Point]) -> (Vec<[f32; 2]>, Vec<PointLabel>) {
        let w = inputs.reshaped_input_size.width as f32;
        let h = inputs.reshaped_input_size.height as f32;
        points
            .iter()
            .map(|p| ([p.point[0] * w, p.point[1] * h], p.label))
            .unzip()
    }

    /// Upsample grid masks to the original image size, dropping padding.
    pub fn post_process_masks(&self, inputs: &ImageInputs, output: &ModelOutput) -> Vec<Mask> {
        output
            .masks
            .iter()
            .map(|grid| self.post_process_mask(inputs, grid))
            .collect()
    }

    fn post_process_mask(&self, inputs: &ImageInputs, grid: &GridMask) -> Mask {
        let orig = inputs.original_size;
        let reshaped = inputs.reshaped_input_size;
        let sx = reshaped.width as f32 / orig.width.max(1) as f32;
        let sy = reshaped.height as f32 / orig.height.max(1) as f32;
        let cell = grid.cell.max(1) as f32;

        let cols: Vec<usize> = (0..orig.width)
            .map(|x| (((x as f32 + 0.5) * sx / cell) as usize).min(grid.cols - 1))
            .collect();
        let mut mask = Mask::empty(orig.width, orig.height);
        for y in 0..orig.height {
            let row = (((y as f32 + 0.5) * sy / cell) as usize).min(grid.rows - 1);
            let base = (y as usize) * (orig.width as usize);
            for (x, &col) in cols.iter().enumerate() {
                mask.data[base + x] = grid.get(col, row) as u8;
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn inputs(w: u32, h: u32) -> ImageInputs {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 10, 10])));
        Processor::default().preprocess(&img)
    }

    #[test]
    fn test_longest_side_becomes_1024() {
        let p = Processor::default();
        assert_eq!(p.reshaped_size(ImageSize::new(100, 50)), ImageSize::new(1024, 512));
        assert_eq!(p.reshaped_size(ImageSize::new(300, 600)), ImageSize::new(512, 1024));
        assert_eq!(p.reshaped_size(ImageSize::new(100, 100)), ImageSize::new(1024, 1024));
    }

    #[test]
    fn test_preprocess_pads_to_square() {
        let inputs = inputs(100, 50);
        assert_eq!(inputs.pixel_values.dimensions(), (1024, 1024));
        assert_eq!(inputs.original_size, ImageSize::new(100, 50));
        assert_eq!(inputs.pixel_values.get_pixel(10, 10).0, [200, 10, 10]);
        assert_eq!(inputs.pixel_values.get_pixel(10, 900).0, [0, 0, 0]);
    }

    #[test]
    fn test_map_points_uses_reshaped_axes() {
        let inputs = inputs(100, 50);
        let (pts, labels) =
            Processor::default().map_points(&inputs, &[Point::include(0.5, 0.5), Point::exclude(0.25, 1.0)]);
        assert_eq!(pts, vec![[512.0, 256.0], [256.0, 512.0]]);
        assert_eq!(labels, vec![PointLabel::Include, PointLabel::Exclude]);
    }

    #[test]
    fn test_post_process_maps_grid_to_original_size() {
        let inputs = inputs(100, 50);
        // 64x64 grid of 16px cells; the left half of the valid 64x32 area is set.
        let mut grid = GridMask::empty(64, 64, 16);
        for row in 0..32 {
            for col in 0..32 {
                grid.cells[row * 64 + col] = true;
            }
        }
        let out = ModelOutput {
            masks: vec![grid],
            scores: vec![1.0],
        };
        let masks = Processor::default().post_process_masks(&inputs, &out);
        assert_eq!((masks[0].width, masks[0].height), (100, 50));
        assert!(masks[0].get(10, 25));
        assert!(masks[0].get(49, 49));
        assert!(!masks[0].get(50, 0));
        assert_eq!(masks[0].count(), 50 * 50);
    }
}
