use serde::{Deserialize, Serialize};

use crate::{Mask, SegmentError};

/// Include/exclude label of a point prompt. On the wire: `1` / `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PointLabel {
    Include,
    Exclude,
}

impl From<PointLabel> for u8 {
    fn from(label: PointLabel) -> u8 {
        match label {
            PointLabel::Include => 1,
            PointLabel::Exclude => 0,
        }
    }
}

impl TryFrom<u8> for PointLabel {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(PointLabel::Include),
            0 => Ok(PointLabel::Exclude),
            other => Err(format!("point label must be 0 or 1, got {other}")),
        }
    }
}

/// A point prompt in normalized `[0,1] x [0,1]` image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub point: [f32; 2],
    pub label: PointLabel,
}

impl Point {
    pub fn include(x: f32, y: f32) -> Self {
        Self {
            point: [x, y],
            label: PointLabel::Include,
        }
    }

    pub fn exclude(x: f32, y: f32) -> Self {
        Self {
            point: [x, y],
            label: PointLabel::Exclude,
        }
    }
}

/// Encoded image file bytes (PNG, JPEG) handed to `segment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentImage {
    pub bytes: Vec<u8>,
}

impl SegmentImage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerRequest {
    Init,
    Segment(SegmentImage),
    Decode(Vec<Point>),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub status: String,
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl LoadProgress {
    pub fn stage(status: impl Into<String>, progress: f32) -> Self {
        Self {
            status: status.into(),
            progress,
            file: None,
            loaded: None,
            total: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPhase {
    Start,
    Done,
}

/// Candidate masks at the original image size, one score per mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOutput {
    #[serde(rename = "mask")]
    pub masks: Vec<Mask>,
    pub scores: Vec<f32>,
}

impl DecodeOutput {
    pub fn best(&self) -> Option<(&Mask, f32)> {
        let index = best_mask_index(&self.scores)?;
        Some((self.masks.get(index)?, self.scores[index]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&SegmentError> for WorkerFailure {
    fn from(err: &SegmentError) -> Self {
        Self {
            message: err.to_string(),
            stack: err.source_chain(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerEvent {
    LoadingProgress(LoadProgress),
    Ready,
    SegmentResult(SegmentPhase),
    DecodeResult(DecodeOutput),
    Error(WorkerFailure),
}

/// Index of the highest score; ties go to the lowest index, NaN never wins.
pub fn best_mask_index(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_best_mask_index_picks_highest() {
        assert_eq!(best_mask_index(&[0.2, 0.91, 0.74]), Some(1));
    }

    #[test]
    fn test_best_mask_index_ties_and_empty() {
        assert_eq!(best_mask_index(&[0.5, 0.9, 0.9]), Some(1));
        assert_eq!(best_mask_index(&[f32::NAN, 0.1]), Some(1));
        assert_eq!(best_mask_index(&[]), None);
    }

    #[test]
    fn test_request_envelope_shape() {
        let decode = WorkerRequest::Decode(vec![Point::include(0.25, 0.75), Point::exclude(0.5, 0.125)]);
        assert_eq!(
            serde_json::to_value(&decode).unwrap(),
            json!({
                "type": "decode",
                "data": [
                    {"point": [0.25, 0.75], "label": 1},
                    {"point": [0.5, 0.125], "label": 0}
                ]
            })
        );
        assert_eq!(
            serde_json::to_value(&WorkerRequest::Init).unwrap(),
            json!({"type": "init"})
        );
    }

    #[test]
    fn test_event_envelope_parses_wire_names() {
        let ev: WorkerEvent =
            serde_json::from_value(json!({"type": "segment_result", "data": "done"})).unwrap();
        assert_eq!(ev, WorkerEvent::SegmentResult(SegmentPhase::Done));

        let ev: WorkerEvent = serde_json::from_value(json!({
            "type": "loading_progress",
            "data": {"status": "Downloading model...", "progress": 12.5, "file": "model.json"}
        }))
        .unwrap();
        match ev {
            WorkerEvent::LoadingProgress(p) => {
                assert_eq!(p.progress, 12.5);
                assert_eq!(p.file.as_deref(), Some("model.json"));
                assert_eq!(p.total, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_label_rejects_other_values() {
        let res: Result<Point, _> =
            serde_json::from_value(json!({"point": [0.0, 0.0], "label": 2}));
        assert!(res.is_err());
    }
}
