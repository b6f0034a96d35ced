use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod drag;
pub use drag::*;
mod surface;
pub use surface::*;

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("panel index {index} out of range (panel count {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Panel placement in pixels, relative to the container origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PanelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PanelRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_array([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }

    pub fn top_left(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x <= self.x + self.width
            && point.y <= self.y + self.height
    }

    pub fn with_top_left(self, top_left: Vec2) -> Self {
        Self {
            x: top_left.x,
            y: top_left.y,
            ..self
        }
    }

    pub fn with_size(self, width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }
}

/// Geometry model: live panel rectangles, the load-time snapshot, and the
/// single optional selection.
///
/// Panel index is identity. Rectangles are replaced in place and never
/// reordered, so `positions.len() == initial_positions.len()` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutState {
    positions: Vec<PanelRect>,
    initial_positions: Vec<PanelRect>,
    selected: Option<usize>,
}

impl LayoutState {
    pub fn new(initial: Vec<PanelRect>) -> Self {
        Self {
            positions: initial.clone(),
            initial_positions: initial,
            selected: None,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[PanelRect] {
        &self.positions
    }

    pub fn initial_positions(&self) -> &[PanelRect] {
        &self.initial_positions
    }

    pub fn position(&self, index: usize) -> Option<PanelRect> {
        self.positions.get(index).copied()
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected == Some(index)
    }

    /// Replace one rectangle wholesale. Only the index is validated.
    pub fn set_position(&mut self, index: usize, rect: PanelRect) -> Result<(), LayoutError> {
        let len = self.positions.len();
        let slot = self
            .positions
            .get_mut(index)
            .ok_or(LayoutError::IndexOutOfRange { index, len })?;
        *slot = rect;
        Ok(())
    }

    /// Read the latest rectangle, compute its successor, replace it.
    pub fn update<F>(&mut self, index: usize, f: F) -> Result<PanelRect, LayoutError>
    where
        F: FnOnce(PanelRect) -> PanelRect,
    {
        let current = self
            .position(index)
            .ok_or(LayoutError::IndexOutOfRange {
                index,
                len: self.positions.len(),
            })?;
        let next = f(current);
        self.set_position(index, next)?;
        Ok(next)
    }

    pub fn reset_to_initial(&mut self) {
        self.positions = self.initial_positions.clone();
        self.selected = None;
    }

    /// Toggle selection: selecting the current selection clears it,
    /// `None` always clears.
    pub fn select(&mut self, index: Option<usize>) -> Result<Option<usize>, LayoutError> {
        match index {
            None => self.selected = None,
            Some(i) if i >= self.positions.len() => {
                return Err(LayoutError::IndexOutOfRange {
                    index: i,
                    len: self.positions.len(),
                })
            }
            Some(i) if self.selected == Some(i) => self.selected = None,
            Some(i) => self.selected = Some(i),
        }
        Ok(self.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_panels() -> LayoutState {
        LayoutState::new(vec![
            PanelRect::new(0.0, 0.0, 200.0, 200.0),
            PanelRect::new(210.0, 0.0, 200.0, 120.0),
            PanelRect::new(0.0, 210.0, 410.0, 180.0),
        ])
    }

    #[test]
    fn test_set_position_replaces_in_place() {
        let mut layout = three_panels();
        let rect = PanelRect::new(5.0, 6.0, 70.0, 80.0);
        layout.set_position(1, rect).unwrap();
        assert_eq!(layout.position(1), Some(rect));
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.initial_positions()[1].width, 200.0);
    }

    #[test]
    fn test_set_position_rejects_out_of_range() {
        let mut layout = three_panels();
        let err = layout
            .set_position(3, PanelRect::new(0.0, 0.0, 1.0, 1.0))
            .unwrap_err();
        assert_eq!(err, LayoutError::IndexOutOfRange { index: 3, len: 3 });
    }

    #[test]
    fn test_reset_restores_snapshot_and_clears_selection() {
        let mut layout = three_panels();
        let snapshot = layout.positions().to_vec();
        for step in 0..25 {
            let dx = step as f32 * 3.5;
            layout
                .update(step % 3, |r| r.with_top_left(Vec2::new(r.x + dx, r.y - dx)))
                .unwrap();
        }
        layout.select(Some(2)).unwrap();
        layout.reset_to_initial();
        assert_eq!(layout.positions(), snapshot.as_slice());
        assert_eq!(layout.selected_index(), None);

        layout.reset_to_initial();
        assert_eq!(layout.positions(), snapshot.as_slice());
    }

    #[test]
    fn test_select_toggle_law() {
        let mut layout = three_panels();
        assert_eq!(layout.select(Some(1)).unwrap(), Some(1));
        assert_eq!(layout.select(Some(1)).unwrap(), None);
        assert_eq!(layout.select(Some(0)).unwrap(), Some(0));
        assert_eq!(layout.select(Some(2)).unwrap(), Some(2));
        assert_eq!(layout.select(None).unwrap(), None);
    }

    #[test]
    fn test_select_out_of_range_keeps_selection() {
        let mut layout = three_panels();
        layout.select(Some(0)).unwrap();
        assert!(layout.select(Some(9)).is_err());
        assert_eq!(layout.selected_index(), Some(0));
    }

    #[test]
    fn test_panel_rect_serializes_as_plain_fields() {
        let rect = PanelRect::new(1.0, 2.0, 3.0, 4.0);
        let value = serde_json::to_value(rect).unwrap();
        assert_eq!(value["x"], 1.0);
        assert_eq!(value["height"], 4.0);
    }
}
