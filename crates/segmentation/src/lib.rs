//! Interactive point-prompt segmentation.
//!
//! A [`SegmentWorker`] owns the model on its own thread and speaks the
//! [`WorkerRequest`]/[`WorkerEvent`] protocol. The [`OverlayController`]
//! drives one worker per open popup and turns decode results into a
//! translucent mask raster.

use std::error::Error as StdError;

use thiserror::Error;

mod affinity;
mod mask;
mod model;
mod overlay;
mod protocol;
mod worker;

pub use affinity::{AffinityLoader, AffinityModel, AffinityParams};
pub use mask::{blank_overlay, composite_overlay, encode_png, Mask};
pub use model::{
    Embedding, GridMask, ImageInputs, ImageSize, LoadedModel, ModelLoader, ModelOutput,
    Processor, SegmentModel, DEFAULT_LONGEST_EDGE,
};
pub use overlay::{normalize_click, OverlayController, RegenerationDraft};
pub use protocol::{
    best_mask_index, DecodeOutput, LoadProgress, Point, PointLabel, SegmentImage, SegmentPhase,
    WorkerEvent, WorkerFailure, WorkerRequest,
};
pub use worker::{SegmentWorker, WorkerHandle, WorkerSpawner, WorkerState};

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("model is not ready; send init and wait for ready first")]
    NotReady,
    #[error("no encoded image; segment must complete before decode")]
    NotEncoded,
    #[error("decode needs at least one point")]
    NoPoints,
    #[error("invalid model file {path}: {reason}")]
    InvalidModel { path: String, reason: String },
    #[error("model file is not valid json")]
    ModelFormat(#[from] serde_json::Error),
    #[error("image could not be decoded")]
    Image(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("worker is no longer running")]
    Disconnected,
}

impl SegmentError {
    /// Flattened `source()` chain, used as diagnostic detail on error events.
    pub fn source_chain(&self) -> Option<String> {
        let mut lines = Vec::new();
        let mut cur = self.source();
        while let Some(err) = cur {
            lines.push(err.to_string());
            cur = err.source();
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\ncaused by: "))
        }
    }
}
