use glam::Vec2;
use layout::{LayoutState, LayoutSurface, PanelRect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ImageRef, ImageRefError};

/// Upper bound the create flow accepts for a requested panel count.
pub const MAX_PANELS: u32 = 12;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("no storyboard data in this session")]
    Missing,
    #[error("storyboard data is not valid json")]
    Malformed(#[from] serde_json::Error),
    #[error("session store could not be read")]
    Store(#[from] std::io::Error),
    #[error("storyboard has no panels")]
    NoPanels,
    #[error("{coordinates} coordinate entries for {panels} panels")]
    CoordinateMismatch { panels: usize, coordinates: usize },
    #[error("panel_count says {declared} but {actual} panels were supplied")]
    CountMismatch { declared: usize, actual: usize },
    #[error("requested panel count {0} is outside 1..=12")]
    PanelsRequested(u32),
    #[error("canvas size {width}x{height} is empty")]
    InvalidCanvas { width: u32, height: u32 },
    #[error("panel {index} has invalid geometry {rect:?}")]
    InvalidGeometry { index: usize, rect: [f32; 4] },
    #[error("{field} has an unusable image reference")]
    BadReference {
        field: String,
        #[source]
        source: ImageRefError,
    },
}

/// Session payload written by the storyboard create flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryboardPayload {
    pub panels: Vec<String>,
    pub coordinates: Vec<[f32; 4]>,
    pub total_size: [u32; 2],
    pub panel_count: usize,
    #[serde(alias = "flattened_image")]
    pub original_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n8n_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panels_requested: Option<u32>,
}

impl StoryboardPayload {
    pub fn from_json(json: &str) -> Result<Self, IntakeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Structural checks only; image references are parsed by
    /// [`Storyboard::from_payload`].
    pub fn validate(&self) -> Result<(), IntakeError> {
        if self.panels.is_empty() {
            return Err(IntakeError::NoPanels);
        }
        if self.coordinates.len() != self.panels.len() {
            return Err(IntakeError::CoordinateMismatch {
                panels: self.panels.len(),
                coordinates: self.coordinates.len(),
            });
        }
        if self.panel_count != self.panels.len() {
            return Err(IntakeError::CountMismatch {
                declared: self.panel_count,
                actual: self.panels.len(),
            });
        }
        if let Some(n) = self.panels_requested {
            if n == 0 || n > MAX_PANELS {
                return Err(IntakeError::PanelsRequested(n));
            }
        }
        let [width, height] = self.total_size;
        if width == 0 || height == 0 {
            return Err(IntakeError::InvalidCanvas { width, height });
        }
        for (index, rect) in self.coordinates.iter().enumerate() {
            let [x, y, w, h] = *rect;
            let finite = rect.iter().all(|v| v.is_finite());
            if !finite || x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
                return Err(IntakeError::InvalidGeometry { index, rect: *rect });
            }
        }
        Ok(())
    }
}

/// A validated payload with every image reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Storyboard {
    pub payload: StoryboardPayload,
    pub panels: Vec<ImageRef>,
    pub original: ImageRef,
}

impl Storyboard {
    pub fn from_payload(payload: StoryboardPayload) -> Result<Self, IntakeError> {
        payload.validate()?;
        let panels = payload
            .panels
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                ImageRef::parse(raw).map_err(|source| IntakeError::BadReference {
                    field: format!("panels[{i}]"),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let original =
            ImageRef::parse(&payload.original_image).map_err(|source| IntakeError::BadReference {
                field: "original_image".to_string(),
                source,
            })?;
        Ok(Self {
            payload,
            panels,
            original,
        })
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    pub fn canvas_size(&self) -> Vec2 {
        let [w, h] = self.payload.total_size;
        Vec2::new(w as f32, h as f32)
    }

    /// Initial geometry in display pixels.
    pub fn layout_state(&self, display_scale: f32) -> LayoutState {
        LayoutState::new(
            self.payload
                .coordinates
                .iter()
                .map(|c| PanelRect::from_array(*c).scaled(display_scale))
                .collect(),
        )
    }

    pub fn layout_surface(&self, display_scale: f32) -> LayoutSurface {
        LayoutSurface::new(
            self.layout_state(display_scale),
            self.canvas_size(),
            display_scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> StoryboardPayload {
        StoryboardPayload {
            panels: vec!["iVBORw0KGgo=".to_string(), "iVBORw0KGgo=".to_string()],
            coordinates: vec![[0.0, 0.0, 400.0, 300.0], [400.0, 0.0, 400.0, 300.0]],
            total_size: [800, 600],
            panel_count: 2,
            original_image: "iVBORw0KGgo=".to_string(),
            n8n_data: None,
            original_prompt: Some("a fox in the snow".to_string()),
            style: None,
            panels_requested: Some(2),
        }
    }

    #[test]
    fn test_valid_payload_builds_storyboard() {
        let sb = Storyboard::from_payload(payload()).unwrap();
        assert_eq!(sb.panel_count(), 2);
        assert_eq!(sb.canvas_size(), Vec2::new(800.0, 600.0));
        let layout = sb.layout_state(0.5);
        assert_eq!(layout.positions()[1], PanelRect::new(200.0, 0.0, 200.0, 150.0));
        assert_eq!(sb.layout_surface(0.5).container_size(), Vec2::new(400.0, 300.0));
    }

    #[test]
    fn test_short_coordinates_are_rejected() {
        let mut p = payload();
        p.coordinates.pop();
        assert!(matches!(
            p.validate(),
            Err(IntakeError::CoordinateMismatch { panels: 2, coordinates: 1 })
        ));
    }

    #[test]
    fn test_structural_rejections() {
        let mut p = payload();
        p.panel_count = 3;
        assert!(matches!(p.validate(), Err(IntakeError::CountMismatch { .. })));

        let mut p = payload();
        p.total_size = [0, 600];
        assert!(matches!(p.validate(), Err(IntakeError::InvalidCanvas { .. })));

        let mut p = payload();
        p.coordinates[1][2] = f32::NAN;
        assert!(matches!(p.validate(), Err(IntakeError::InvalidGeometry { index: 1, .. })));

        let mut p = payload();
        p.panels_requested = Some(13);
        assert!(matches!(p.validate(), Err(IntakeError::PanelsRequested(13))));

        let mut p = payload();
        p.panels[0] = "   ".to_string();
        assert!(matches!(
            Storyboard::from_payload(p),
            Err(IntakeError::BadReference { .. })
        ));
    }

    #[test]
    fn test_flattened_image_alias() {
        let json = r#"{
            "panels": ["iVBORw0KGgo="],
            "coordinates": [[1, 2, 30, 40]],
            "total_size": [100, 100],
            "panel_count": 1,
            "flattened_image": "https://example.com/full.png"
        }"#;
        let p = StoryboardPayload::from_json(json).unwrap();
        assert_eq!(p.original_image, "https://example.com/full.png");
        assert!(p.validate().is_ok());
    }
}
