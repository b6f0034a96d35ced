use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::{
    blank_overlay, composite_overlay, encode_png, DecodeOutput, LoadProgress, Point, PointLabel,
    SegmentError, SegmentImage, SegmentPhase, WorkerEvent, WorkerHandle, WorkerRequest,
    WorkerSpawner,
};

const DEFAULT_MASK_COLOR: [u8; 4] = [0, 114, 255, 140];

/// Everything the regeneration call needs from one overlay session.
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationDraft {
    pub panel_index: usize,
    pub image: Vec<u8>,
    pub mask_png: Vec<u8>,
    pub prompt: String,
}

/// Map a click inside `origin..origin+size` to normalized image coordinates.
/// Clicks outside the image area yield `None`.
pub fn normalize_click(pos: [f32; 2], origin: [f32; 2], size: [f32; 2]) -> Option<[f32; 2]> {
    if size[0] <= 0.0 || size[1] <= 0.0 {
        return None;
    }
    let x = (pos[0] - origin[0]) / size[0];
    let y = (pos[1] - origin[1]) / size[1];
    if (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y) {
        Some([x, y])
    } else {
        None
    }
}

/// One segmentation popup: a private worker, the accumulated point prompts
/// and the current mask raster.
///
/// At most one decode is in flight. Points added meanwhile leave a pending
/// intent, and the latest point list is decoded as soon as the in-flight
/// result arrives.
pub struct OverlayController {
    panel_index: usize,
    image: Vec<u8>,
    worker: Option<WorkerHandle>,
    mask_color: [u8; 4],

    ready: bool,
    encoded: bool,
    decoding: bool,
    pending_decode: bool,
    discard_in_flight: bool,

    points: Vec<Point>,
    prompt: String,
    progress: Option<LoadProgress>,
    status: String,
    overlay: Option<RgbaImage>,
    score: Option<f32>,
}

impl OverlayController {
    pub fn open(
        panel_index: usize,
        image: Vec<u8>,
        spawner: &dyn WorkerSpawner,
    ) -> Result<Self, SegmentError> {
        let worker = spawner.spawn_worker();
        worker.send(WorkerRequest::Init)?;
        info!(panel_index, worker = %worker.id(), "segmentation overlay opened");
        Ok(Self {
            panel_index,
            image,
            worker: Some(worker),
            mask_color: DEFAULT_MASK_COLOR,
            ready: false,
            encoded: false,
            decoding: false,
            pending_decode: false,
            discard_in_flight: false,
            points: Vec::new(),
            prompt: String::new(),
            progress: None,
            status: "Loading model...".to_string(),
            overlay: None,
            score: None,
        })
    }

    pub fn with_mask_color(mut self, color: [u8; 4]) -> Self {
        self.mask_color = color;
        self
    }

    pub fn panel_index(&self) -> usize {
        self.panel_index
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    pub fn is_decoding(&self) -> bool {
        self.decoding
    }

    pub fn has_pending_decode(&self) -> bool {
        self.pending_decode
    }

    pub fn is_closed(&self) -> bool {
        self.worker.is_none()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn prompt_mut(&mut self) -> &mut String {
        &mut self.prompt
    }

    pub fn progress(&self) -> Option<&LoadProgress> {
        self.progress.as_ref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn overlay(&self) -> Option<&RgbaImage> {
        self.overlay.as_ref()
    }

    pub fn score(&self) -> Option<f32> {
        self.score
    }

    /// Drain and apply every event the worker has produced so far.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.worker.as_ref().and_then(WorkerHandle::try_recv) {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::LoadingProgress(progress) => {
                self.status = progress.status.clone();
                self.progress = Some(progress);
            }
            WorkerEvent::Ready => {
                self.ready = true;
                let request = WorkerRequest::Segment(SegmentImage::new(self.image.clone()));
                match self.send(request) {
                    Ok(()) => self.status = "Encoding image...".to_string(),
                    Err(e) => self.status = format!("Error: {e}"),
                }
            }
            WorkerEvent::SegmentResult(SegmentPhase::Start) => {
                self.encoded = false;
                self.status = "Encoding image...".to_string();
            }
            WorkerEvent::SegmentResult(SegmentPhase::Done) => {
                self.encoded = true;
                self.progress = None;
                self.status = "Click to add points (left: include, right: exclude)".to_string();
                debug!(panel_index = self.panel_index, "image encoded");
            }
            WorkerEvent::DecodeResult(output) => self.on_decoded(output),
            WorkerEvent::Error(failure) => {
                warn!(panel_index = self.panel_index, message = %failure.message, "worker error");
                self.decoding = false;
                self.discard_in_flight = false;
                self.progress = None;
                self.status = format!("Error: {}", failure.message);
                self.flush_pending();
            }
        }
    }

    fn on_decoded(&mut self, output: DecodeOutput) {
        self.decoding = false;
        if std::mem::take(&mut self.discard_in_flight) {
            debug!("discarding decode result for cleared points");
        } else if let Some((mask, score)) = output.best() {
            self.overlay = Some(composite_overlay(mask, self.mask_color));
            self.score = Some(score);
            self.status = format!("Score: {score:.3}");
        }
        self.flush_pending();
    }

    /// Re-issue one decode for points added while the last one was in flight.
    fn flush_pending(&mut self) {
        if std::mem::take(&mut self.pending_decode) && !self.points.is_empty() {
            if let Err(e) = self.request_decode() {
                self.status = format!("Error: {e}");
            }
        }
    }

    /// Append a point prompt. Rejected until the image is encoded.
    pub fn add_point(&mut self, normalized: [f32; 2], label: PointLabel) -> Result<(), SegmentError> {
        if !self.encoded {
            return Err(SegmentError::NotEncoded);
        }
        self.points.push(Point {
            point: normalized,
            label,
        });
        if let Err(e) = self.request_decode() {
            self.points.pop();
            return Err(e);
        }
        Ok(())
    }

    /// A click in widget space. Returns whether it landed on the image.
    pub fn click(
        &mut self,
        pos: [f32; 2],
        image_origin: [f32; 2],
        image_size: [f32; 2],
        label: PointLabel,
    ) -> Result<bool, SegmentError> {
        match normalize_click(pos, image_origin, image_size) {
            Some(normalized) => self.add_point(normalized, label).map(|()| true),
            None => Ok(false),
        }
    }

    fn request_decode(&mut self) -> Result<(), SegmentError> {
        if self.decoding {
            self.pending_decode = true;
            return Ok(());
        }
        self.send(WorkerRequest::Decode(self.points.clone()))?;
        self.decoding = true;
        self.pending_decode = false;
        Ok(())
    }

    /// Forget all points and the raster without contacting the worker.
    pub fn clear_points(&mut self) {
        self.points.clear();
        self.overlay = None;
        self.score = None;
        self.pending_decode = false;
        if self.decoding {
            self.discard_in_flight = true;
        }
        if self.encoded {
            self.status = "Points cleared".to_string();
        }
    }

    pub fn can_regenerate(&self) -> bool {
        !self.points.is_empty() && !self.prompt.trim().is_empty() && self.encoded
    }

    /// The original image, the mask flattened to PNG and the edit prompt.
    /// `None` while regeneration is not allowed.
    pub fn regeneration_draft(&self) -> Result<Option<RegenerationDraft>, SegmentError> {
        if !self.can_regenerate() {
            return Ok(None);
        }
        let mask_png = match &self.overlay {
            Some(raster) => encode_png(raster)?,
            None => {
                let img = image::load_from_memory(&self.image)?;
                encode_png(&blank_overlay(img.width(), img.height()))?
            }
        };
        Ok(Some(RegenerationDraft {
            panel_index: self.panel_index,
            image: self.image.clone(),
            mask_png,
            prompt: self.prompt.trim().to_string(),
        }))
    }

    /// Terminate the worker. Nothing it still produces is applied.
    pub fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.terminate();
            info!(panel_index = self.panel_index, "segmentation overlay closed");
        }
        self.decoding = false;
        self.pending_decode = false;
    }

    fn send(&self, request: WorkerRequest) -> Result<(), SegmentError> {
        self.worker
            .as_ref()
            .ok_or(SegmentError::Disconnected)?
            .send(request)
    }
}

impl Drop for OverlayController {
    fn drop(&mut self) {
        self.close();
    }
}
