use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    Embedding, GridMask, ImageInputs, LoadProgress, LoadedModel, ModelLoader, ModelOutput,
    PointLabel, Processor, SegmentError, SegmentModel,
};

const READ_CHUNK: usize = 64 * 1024;
const MAX_COLOR_DIST: f32 = 1.732_050_8; // sqrt(3)

/// Parameters of the colour-affinity model, as stored in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityParams {
    pub model_id: String,
    pub patch_size: u32,
    pub input_size: u32,
    /// Similarity cut-offs for the three candidate masks, tightest first.
    pub thresholds: [f32; 3],
}

impl Default for AffinityParams {
    fn default() -> Self {
        Self {
            model_id: "nemu/colour-affinity-64".to_string(),
            patch_size: 16,
            input_size: 1024,
            thresholds: [0.08, 0.16, 0.28],
        }
    }
}

impl AffinityParams {
    fn validate(&self, source: &str) -> Result<(), SegmentError> {
        let invalid = |reason: &str| SegmentError::InvalidModel {
            path: source.to_string(),
            reason: reason.to_string(),
        };
        if self.patch_size == 0 || self.input_size == 0 {
            return Err(invalid("patch_size and input_size must be positive"));
        }
        if self.input_size % self.patch_size != 0 {
            return Err(invalid("input_size must be a multiple of patch_size"));
        }
        if self
            .thresholds
            .iter()
            .any(|t| !t.is_finite() || *t <= 0.0 || *t > 1.0)
        {
            return Err(invalid("thresholds must lie in (0, 1]"));
        }
        Ok(())
    }
}

/// Region-growing segmenter over a grid of mean patch colours.
///
/// Each include point seeds a region; neighbouring cells join while their
/// colour stays within the threshold of the mean seed colour. A cell that is
/// closer to some exclude point's colour than to the seed colour never joins.
#[derive(Debug, Clone)]
pub struct AffinityModel {
    params: AffinityParams,
}

impl AffinityModel {
    pub fn new(params: AffinityParams) -> Self {
        Self { params }
    }

    fn grow(
        &self,
        embedding: &Embedding,
        seeds: &[(usize, usize)],
        seed_color: [f32; 3],
        blocked: &[bool],
        threshold: f32,
    ) -> (GridMask, f32) {
        let mut mask = GridMask::empty(embedding.cols, embedding.rows, embedding.cell);
        let mut queue = VecDeque::new();
        for &(col, row) in seeds {
            let idx = row * embedding.cols + col;
            if !blocked[idx] && !mask.cells[idx] {
                mask.cells[idx] = true;
                queue.push_back((col, row));
            }
        }

        while let Some((col, row)) = queue.pop_front() {
            let mut visit = |c: usize, r: usize| {
                let idx = r * embedding.cols + c;
                if mask.cells[idx] || blocked[idx] {
                    return;
                }
                if color_distance(embedding.feature(c, r), seed_color) <= threshold {
                    mask.cells[idx] = true;
                    queue.push_back((c, r));
                }
            };
            if col > 0 {
                visit(col - 1, row);
            }
            if col + 1 < embedding.valid_cols {
                visit(col + 1, row);
            }
            if row > 0 {
                visit(col, row - 1);
            }
            if row + 1 < embedding.valid_rows {
                visit(col, row + 1);
            }
        }

        let mut total = 0.0f32;
        let mut n = 0usize;
        for row in 0..embedding.valid_rows {
            for col in 0..embedding.valid_cols {
                if mask.get(col, row) {
                    total += 1.0 - color_distance(embedding.feature(col, row), seed_color);
                    n += 1;
                }
            }
        }
        let score = if n == 0 { 0.0 } else { total / n as f32 };
        (mask, score)
    }
}

impl SegmentModel for AffinityModel {
    fn model_id(&self) -> &str {
        &self.params.model_id
    }

    fn embed(&self, inputs: &ImageInputs) -> Result<Embedding, SegmentError> {
        let size = self.params.input_size;
        let patch = self.params.patch_size;
        if inputs.pixel_values.dimensions() != (size, size) {
            return Err(SegmentError::Inference(format!(
                "expected {size}x{size} input, got {:?}",
                inputs.pixel_values.dimensions()
            )));
        }
        let cols = (size / patch) as usize;
        let rows = cols;
        let reshaped = inputs.reshaped_input_size;
        let valid_cols = (reshaped.width.div_ceil(patch) as usize).clamp(1, cols);
        let valid_rows = (reshaped.height.div_ceil(patch) as usize).clamp(1, rows);

        let area = (patch * patch) as f32;
        let mut features = Vec::with_capacity(cols * rows);
        for row in 0..rows as u32 {
            for col in 0..cols as u32 {
                let mut sum = [0.0f32; 3];
                for y in row * patch..(row + 1) * patch {
                    for x in col * patch..(col + 1) * patch {
                        let px = inputs.pixel_values.get_pixel(x, y).0;
                        sum[0] += px[0] as f32;
                        sum[1] += px[1] as f32;
                        sum[2] += px[2] as f32;
                    }
                }
                features.push(sum.map(|s| s / area / 255.0));
            }
        }
        debug!(cols, rows, valid_cols, valid_rows, "embedding computed");
        Ok(Embedding {
            cols,
            rows,
            valid_cols,
            valid_rows,
            cell: patch,
            features,
        })
    }

    fn decode(
        &self,
        embedding: &Embedding,
        points: &[[f32; 2]],
        labels: &[PointLabel],
    ) -> Result<ModelOutput, SegmentError> {
        if points.is_empty() {
            return Err(SegmentError::NoPoints);
        }
        if points.len() != labels.len() {
            return Err(SegmentError::Inference(format!(
                "{} points but {} labels",
                points.len(),
                labels.len()
            )));
        }

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for (p, label) in points.iter().zip(labels) {
            let cell = embedding.cell_at(*p);
            match label {
                PointLabel::Include => include.push(cell),
                PointLabel::Exclude => exclude.push(cell),
            }
        }

        if include.is_empty() {
            let empty = GridMask::empty(embedding.cols, embedding.rows, embedding.cell);
            return Ok(ModelOutput {
                masks: vec![empty; self.params.thresholds.len()],
                scores: vec![0.0; self.params.thresholds.len()],
            });
        }

        let mut seed_color = [0.0f32; 3];
        for &(c, r) in &include {
            let f = embedding.feature(c, r);
            for k in 0..3 {
                seed_color[k] += f[k] / include.len() as f32;
            }
        }
        let exclude_colors: Vec<[f32; 3]> =
            exclude.iter().map(|&(c, r)| embedding.feature(c, r)).collect();

        let mut blocked = vec![true; embedding.cols * embedding.rows];
        for row in 0..embedding.valid_rows {
            for col in 0..embedding.valid_cols {
                let f = embedding.feature(col, row);
                let to_seed = color_distance(f, seed_color);
                blocked[row * embedding.cols + col] =
                    exclude_colors.iter().any(|e| color_distance(f, *e) < to_seed);
            }
        }
        for &(c, r) in &exclude {
            blocked[r * embedding.cols + c] = true;
        }

        let mut masks = Vec::with_capacity(3);
        let mut scores = Vec::with_capacity(3);
        for &threshold in &self.params.thresholds {
            let (mask, score) = self.grow(embedding, &include, seed_color, &blocked, threshold);
            masks.push(mask);
            scores.push(score);
        }
        Ok(ModelOutput { masks, scores })
    }
}

/// Euclidean RGB distance scaled to `[0, 1]`.
fn color_distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let d: f32 = (0..3).map(|k| (a[k] - b[k]) * (a[k] - b[k])).sum();
    d.sqrt() / MAX_COLOR_DIST
}

/// Loads [`AffinityParams`] from a JSON model file, or uses the built-in
/// parameters when no file is configured.
#[derive(Debug, Clone, Default)]
pub struct AffinityLoader {
    path: Option<PathBuf>,
}

impl AffinityLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn builtin() -> Self {
        Self { path: None }
    }

    fn read_params(
        path: &Path,
        progress: &mut dyn FnMut(LoadProgress),
    ) -> Result<AffinityParams, SegmentError> {
        let mut file = File::open(path).map_err(|e| SegmentError::InvalidModel {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let total = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut bytes = Vec::with_capacity(total as usize);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            let loaded = bytes.len() as u64;
            progress(LoadProgress {
                status: "Downloading model...".to_string(),
                progress: if total > 0 {
                    (loaded as f32 / total as f32 * 100.0).min(100.0)
                } else {
                    100.0
                },
                file: Some(name.clone()),
                loaded: Some(loaded),
                total: Some(total),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl ModelLoader for AffinityLoader {
    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<LoadedModel, SegmentError> {
        progress(LoadProgress::stage("Downloading model...", 0.0));
        let (params, source) = match &self.path {
            Some(path) => (
                Self::read_params(path, progress)?,
                path.display().to_string(),
            ),
            None => {
                let params = AffinityParams::default();
                progress(LoadProgress {
                    file: Some(params.model_id.clone()),
                    ..LoadProgress::stage("Downloading model...", 100.0)
                });
                (params, "<builtin>".to_string())
            }
        };
        params.validate(&source)?;

        progress(LoadProgress::stage("Loading processor...", 50.0));
        let processor = Processor::new(params.input_size);
        info!(model_id = %params.model_id, %source, "segmentation model loaded");
        Ok(LoadedModel {
            model: Box::new(AffinityModel::new(params)),
            processor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Write;

    fn split_image() -> DynamicImage {
        let img = RgbImage::from_fn(100, 100, |x, _| {
            if x < 50 {
                Rgb([220, 30, 30])
            } else {
                Rgb([20, 40, 210])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn run(image: &DynamicImage, points: &[Point]) -> (Vec<crate::Mask>, Vec<f32>) {
        let model = AffinityModel::new(AffinityParams::default());
        let processor = Processor::default();
        let inputs = processor.preprocess(image);
        let embedding = model.embed(&inputs).unwrap();
        let (pts, labels) = processor.map_points(&inputs, points);
        let out = model.decode(&embedding, &pts, &labels).unwrap();
        (processor.post_process_masks(&inputs, &out), out.scores)
    }

    #[test]
    fn test_region_stops_at_colour_edge() {
        let (masks, scores) = run(&split_image(), &[Point::include(0.25, 0.5)]);
        assert_eq!(scores.len(), 3);
        let best = &masks[crate::best_mask_index(&scores).unwrap()];
        assert!(best.get(10, 50));
        assert!(best.get(40, 5));
        assert!(!best.get(80, 50));
    }

    #[test]
    fn test_exclude_point_cell_never_joins() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([90, 90, 90])));
        let (masks, _) = run(
            &image,
            &[Point::include(0.1, 0.1), Point::exclude(0.9, 0.9)],
        );
        assert!(masks[0].get(5, 5));
        assert!(!masks[0].get(90, 90));
        assert!(masks[0].get(50, 50));
    }

    #[test]
    fn test_only_exclude_points_give_empty_masks() {
        let (masks, scores) = run(&split_image(), &[Point::exclude(0.5, 0.5)]);
        assert!(masks.iter().all(|m| m.is_empty()));
        assert_eq!(scores, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_loader_reads_file_and_reports_progress() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model_id": "test/affinity", "patch_size": 32, "input_size": 512, "thresholds": [0.1, 0.2, 0.3]}}"#
        )
        .unwrap();

        let mut events = Vec::new();
        let loaded = AffinityLoader::new(Some(file.path().to_path_buf()))
            .load(&mut |p| events.push(p))
            .unwrap();
        assert_eq!(loaded.model.model_id(), "test/affinity");
        assert_eq!(loaded.processor.longest_edge(), 512);

        let download = events
            .iter()
            .find(|p| p.total.is_some())
            .expect("chunk progress");
        assert_eq!(download.status, "Downloading model...");
        assert_eq!(download.loaded, download.total);
        let last = events.last().unwrap();
        assert_eq!((last.status.as_str(), last.progress), ("Loading processor...", 50.0));
    }

    #[test]
    fn test_loader_rejects_bad_params() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"patch_size": 0}}"#).unwrap();
        let err = AffinityLoader::new(Some(file.path().to_path_buf()))
            .load(&mut |_| {})
            .err()
            .unwrap();
        assert!(matches!(err, SegmentError::InvalidModel { .. }));
    }

    #[test]
    fn test_builtin_loader_still_reports_stages() {
        let mut statuses = Vec::new();
        AffinityLoader::builtin()
            .load(&mut |p| statuses.push(p.status))
            .unwrap();
        assert_eq!(statuses.first().map(String::as_str), Some("Downloading model..."));
        assert_eq!(statuses.last().map(String::as_str), Some("Loading processor..."));
    }
}
