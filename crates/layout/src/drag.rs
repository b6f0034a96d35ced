use glam::Vec2;
use tracing::{debug, trace};

use crate::{LayoutError, LayoutState, PanelRect};

/// Hard floor for either side of a resized panel, in logical pixels.
pub const MIN_PANEL_SIZE: f32 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveSession {
    pub index: usize,
    /// Pointer position minus the panel's top-left at gesture start.
    pub offset: Vec2,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizeSession {
    pub index: usize,
    pub start_pointer: Vec2,
    pub start_width: f32,
    pub start_height: f32,
}

/// At most one gesture runs at a time; a resize in progress rejects a
/// competing move and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum GestureMode {
    #[default]
    Idle,
    Moving(MoveSession),
    Resizing(ResizeSession),
}

impl GestureMode {
    pub fn index(&self) -> Option<usize> {
        match self {
            GestureMode::Idle => None,
            GestureMode::Moving(s) => Some(s.index),
            GestureMode::Resizing(s) => Some(s.index),
        }
    }
}

/// A gesture returned by `pointer_up`, with the rectangle it left behind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinishedGesture {
    pub mode: GestureMode,
    pub rect: Option<PanelRect>,
}

/// Turns a pointer-down / move* / up sequence into geometry updates.
///
/// The controller holds no listener of its own: the caller forwards every
/// pointer move it sees (at window level, not per panel) while a gesture is
/// active, and always forwards the pointer-up.
#[derive(Clone, Debug, Default)]
pub struct DragController {
    mode: GestureMode,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> GestureMode {
        self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.mode == GestureMode::Idle
    }

    /// `panel_top_left` is the panel's own bounding box origin in the same
    /// coordinate space as `pointer`, measured at gesture start.
    pub fn begin_move(
        &mut self,
        layout: &LayoutState,
        index: usize,
        pointer: Vec2,
        panel_top_left: Vec2,
    ) -> Result<bool, LayoutError> {
        if layout.position(index).is_none() {
            return Err(LayoutError::IndexOutOfRange {
                index,
                len: layout.len(),
            });
        }
        if !self.is_idle() {
            trace!(mode = ?self.mode, index, "move ignored, gesture already active");
            return Ok(false);
        }
        let offset = pointer - panel_top_left;
        debug!(index, ?offset, "move gesture started");
        self.mode = GestureMode::Moving(MoveSession { index, offset });
        Ok(true)
    }

    pub fn begin_resize(
        &mut self,
        layout: &LayoutState,
        index: usize,
        pointer: Vec2,
    ) -> Result<bool, LayoutError> {
        let rect = layout.position(index).ok_or(LayoutError::IndexOutOfRange {
            index,
            len: layout.len(),
        })?;
        if !self.is_idle() {
            trace!(mode = ?self.mode, index, "resize ignored, gesture already active");
            return Ok(false);
        }
        debug!(index, width = rect.width, height = rect.height, "resize gesture started");
        self.mode = GestureMode::Resizing(ResizeSession {
            index,
            start_pointer: pointer,
            start_width: rect.width,
            start_height: rect.height,
        });
        Ok(true)
    }

    /// Apply one pointer move. `container_origin` must be measured fresh for
    /// every event so layout shifts during the drag cannot desync the panel
    /// from the pointer. Returns the updated rectangle, if any.
    pub fn pointer_move(
        &mut self,
        layout: &mut LayoutState,
        pointer: Vec2,
        container_origin: Vec2,
    ) -> Result<Option<PanelRect>, LayoutError> {
        match self.mode {
            GestureMode::Idle => Ok(None),
            GestureMode::Moving(session) => {
                let top_left = moved_top_left(pointer, container_origin, session.offset);
                let rect = layout.update(session.index, |r| r.with_top_left(top_left))?;
                Ok(Some(rect))
            }
            GestureMode::Resizing(session) => {
                let (width, height) = resized(&session, pointer);
                let rect = layout.update(session.index, |r| r.with_size(width, height))?;
                Ok(Some(rect))
            }
        }
    }

    /// End whatever gesture is active. Leaves the controller idle in every case.
    pub fn pointer_up(&mut self, layout: &LayoutState) -> Option<FinishedGesture> {
        let mode = std::mem::take(&mut self.mode);
        let index = mode.index()?;
        let rect = layout.position(index);
        debug!(index, ?rect, "gesture finished");
        Some(FinishedGesture { mode, rect })
    }

    pub fn cancel(&mut self) {
        self.mode = GestureMode::Idle;
    }
}

pub fn moved_top_left(pointer: Vec2, container_origin: Vec2, offset: Vec2) -> Vec2 {
    pointer - container_origin - offset
}

fn resized(session: &ResizeSession, pointer: Vec2) -> (f32, f32) {
    let delta = pointer - session.start_pointer;
    (
        (session.start_width + delta.x).max(MIN_PANEL_SIZE),
        (session.start_height + delta.y).max(MIN_PANEL_SIZE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> LayoutState {
        LayoutState::new(vec![
            PanelRect::new(20.0, 30.0, 200.0, 200.0),
            PanelRect::new(300.0, 30.0, 120.0, 90.0),
        ])
    }

    #[test]
    fn test_move_tracks_pointer_minus_grab_offset() {
        let mut layout = layout();
        let mut drag = DragController::new();
        let origin = Vec2::new(100.0, 50.0);
        // Panel 0 sits at (120, 80) on screen; grab it 15px right, 10px down.
        let grab = Vec2::new(135.0, 90.0);
        assert!(drag
            .begin_move(&layout, 0, grab, origin + layout.positions()[0].top_left())
            .unwrap());

        for step in 1..=40 {
            let p = grab + Vec2::new(step as f32 * 7.25, step as f32 * -1.5);
            drag.pointer_move(&mut layout, p, origin).unwrap();
        }
        let last = grab + Vec2::new(40.0 * 7.25, 40.0 * -1.5);
        let finished = drag.pointer_up(&layout).unwrap();
        let rect = finished.rect.unwrap();
        let expected = last - origin - Vec2::new(15.0, 10.0);
        assert_eq!(rect.top_left(), expected);
        assert_eq!((rect.width, rect.height), (200.0, 200.0));
        assert!(drag.is_idle());
    }

    #[test]
    fn test_move_uses_latest_container_origin() {
        let mut layout = layout();
        let mut drag = DragController::new();
        let grab = Vec2::new(30.0, 40.0);
        drag.begin_move(&layout, 0, grab, Vec2::new(20.0, 30.0))
            .unwrap();
        // Container scrolls by 25px mid-gesture.
        let shifted = Vec2::new(0.0, -25.0);
        let rect = drag
            .pointer_move(&mut layout, Vec2::new(60.0, 60.0), shifted)
            .unwrap()
            .unwrap();
        assert_eq!(rect.top_left(), Vec2::new(50.0, 75.0));
    }

    #[test]
    fn test_resize_is_clamped_to_floor() {
        let mut layout = layout();
        let mut drag = DragController::new();
        let start = Vec2::new(220.0, 230.0);
        assert!(drag.begin_resize(&layout, 0, start).unwrap());
        drag.pointer_move(&mut layout, Vec2::new(-900.0, -900.0), Vec2::ZERO)
            .unwrap();
        let rect = drag.pointer_up(&layout).unwrap().rect.unwrap();
        assert_eq!((rect.width, rect.height), (50.0, 50.0));
        assert_eq!(rect.top_left(), Vec2::new(20.0, 30.0));
    }

    #[test]
    fn test_resize_clamps_each_axis_independently() {
        let mut layout = layout();
        let mut drag = DragController::new();
        drag.begin_resize(&layout, 1, Vec2::new(420.0, 120.0)).unwrap();
        let rect = drag
            .pointer_move(&mut layout, Vec2::new(460.0, 0.0), Vec2::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(rect.width, 160.0);
        assert_eq!(rect.height, 50.0);
    }

    #[test]
    fn test_resize_suppresses_competing_move() {
        let mut layout = layout();
        let mut drag = DragController::new();
        let p = Vec2::new(215.0, 225.0);
        assert!(drag.begin_resize(&layout, 0, p).unwrap());
        assert!(!drag.begin_move(&layout, 0, p, Vec2::new(20.0, 30.0)).unwrap());
        drag.pointer_move(&mut layout, p + Vec2::new(10.0, 10.0), Vec2::ZERO)
            .unwrap();
        let rect = layout.positions()[0];
        assert_eq!(rect.top_left(), Vec2::new(20.0, 30.0));
        assert_eq!(rect.size(), Vec2::new(210.0, 210.0));
    }

    #[test]
    fn test_pointer_move_while_idle_is_noop() {
        let mut layout = layout();
        let before = layout.clone();
        let mut drag = DragController::new();
        assert_eq!(
            drag.pointer_move(&mut layout, Vec2::new(5.0, 5.0), Vec2::ZERO)
                .unwrap(),
            None
        );
        assert!(drag.pointer_up(&layout).is_none());
        assert_eq!(layout, before);
    }

    #[test]
    fn test_begin_move_rejects_unknown_panel() {
        let layout = layout();
        let mut drag = DragController::new();
        assert!(drag.begin_move(&layout, 7, Vec2::ZERO, Vec2::ZERO).is_err());
        assert!(drag.is_idle());
    }
}
