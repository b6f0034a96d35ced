use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{DragController, FinishedGesture, GestureMode, LayoutError, LayoutState, PanelRect};

/// Side of the square resize affordance in the bottom-right panel corner.
pub const RESIZE_HANDLE_SIZE: f32 = 12.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanelBorder {
    pub width: f32,
    pub rgba: [u8; 4],
}

impl PanelBorder {
    pub const SELECTED: PanelBorder = PanelBorder {
        width: 3.0,
        rgba: [236, 72, 153, 255],
    };
    pub const NORMAL: PanelBorder = PanelBorder {
        width: 1.0,
        rgba: [156, 163, 175, 255],
    };
}

/// Everything a renderer needs to draw one panel box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PanelView {
    pub index: usize,
    pub rect: PanelRect,
    pub border: PanelBorder,
    pub handle: PanelRect,
    pub selected: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitTarget {
    ResizeHandle(usize),
    Panel(usize),
    Empty,
}

pub fn handle_rect(rect: &PanelRect) -> PanelRect {
    PanelRect::new(
        rect.x + rect.width - RESIZE_HANDLE_SIZE,
        rect.y + rect.height - RESIZE_HANDLE_SIZE,
        RESIZE_HANDLE_SIZE,
        RESIZE_HANDLE_SIZE,
    )
}

/// Interactive panel canvas: owns the geometry model and the drag
/// controller, and routes pointer input between them.
///
/// Positions are display pixels relative to the container origin; the
/// container is the payload canvas scaled by `display_scale`.
#[derive(Clone, Debug)]
pub struct LayoutSurface {
    layout: LayoutState,
    drag: DragController,
    canvas_size: Vec2,
    display_scale: f32,
}

impl LayoutSurface {
    pub fn new(layout: LayoutState, canvas_size: Vec2, display_scale: f32) -> Self {
        info!(
            panels = layout.len(),
            canvas_w = canvas_size.x,
            canvas_h = canvas_size.y,
            display_scale,
            "layout surface ready"
        );
        Self {
            layout,
            drag: DragController::new(),
            canvas_size,
            display_scale,
        }
    }

    pub fn layout(&self) -> &LayoutState {
        &self.layout
    }

    pub fn gesture(&self) -> GestureMode {
        self.drag.mode()
    }

    pub fn is_dragging(&self) -> bool {
        !self.drag.is_idle()
    }

    pub fn container_size(&self) -> Vec2 {
        self.canvas_size * self.display_scale
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.layout.selected_index()
    }

    /// Topmost hit wins; later panels are painted over earlier ones.
    pub fn hit_test(&self, local: Vec2) -> HitTarget {
        for (index, rect) in self.layout.positions().iter().enumerate().rev() {
            if handle_rect(rect).contains(local) {
                return HitTarget::ResizeHandle(index);
            }
            if rect.contains(local) {
                return HitTarget::Panel(index);
            }
        }
        HitTarget::Empty
    }

    pub fn pointer_down(
        &mut self,
        pointer: Vec2,
        container_origin: Vec2,
    ) -> Result<HitTarget, LayoutError> {
        let target = self.hit_test(pointer - container_origin);
        match target {
            HitTarget::ResizeHandle(index) => {
                self.drag.begin_resize(&self.layout, index, pointer)?;
                // The press also reaches the panel body underneath; the
                // active resize makes that move a no-op.
                let top_left = container_origin + self.layout.positions()[index].top_left();
                self.drag.begin_move(&self.layout, index, pointer, top_left)?;
            }
            HitTarget::Panel(index) => {
                let top_left = container_origin + self.layout.positions()[index].top_left();
                self.drag.begin_move(&self.layout, index, pointer, top_left)?;
            }
            HitTarget::Empty => {}
        }
        Ok(target)
    }

    pub fn pointer_move(
        &mut self,
        pointer: Vec2,
        container_origin: Vec2,
    ) -> Result<Option<PanelRect>, LayoutError> {
        self.drag
            .pointer_move(&mut self.layout, pointer, container_origin)
    }

    pub fn pointer_up(&mut self) -> Option<FinishedGesture> {
        self.drag.pointer_up(&self.layout)
    }

    /// A click on a panel toggles its selection and stops there; only a
    /// click on empty container space clears the selection.
    pub fn click(&mut self, pointer: Vec2, container_origin: Vec2) -> Option<usize> {
        let selected = match self.hit_test(pointer - container_origin) {
            HitTarget::Panel(index) | HitTarget::ResizeHandle(index) => self
                .layout
                .select(Some(index))
                .unwrap_or(self.layout.selected_index()),
            HitTarget::Empty => {
                let _ = self.layout.select(None);
                None
            }
        };
        debug!(?selected, "selection changed");
        selected
    }

    pub fn reset_layout(&mut self) {
        self.drag.cancel();
        self.layout.reset_to_initial();
        info!("layout reset to initial positions");
    }

    pub fn panel_views(&self) -> Vec<PanelView> {
        self.layout
            .positions()
            .iter()
            .enumerate()
            .map(|(index, rect)| {
                let selected = self.layout.is_selected(index);
                PanelView {
                    index,
                    rect: *rect,
                    border: if selected {
                        PanelBorder::SELECTED
                    } else {
                        PanelBorder::NORMAL
                    },
                    handle: handle_rect(rect),
                    selected,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> LayoutSurface {
        let layout = LayoutState::new(vec![
            PanelRect::new(0.0, 0.0, 200.0, 200.0),
            PanelRect::new(150.0, 150.0, 100.0, 100.0),
        ]);
        LayoutSurface::new(layout, Vec2::new(800.0, 600.0), 0.5)
    }

    #[test]
    fn test_container_is_scaled_canvas() {
        assert_eq!(surface().container_size(), Vec2::new(400.0, 300.0));
    }

    #[test]
    fn test_hit_test_prefers_topmost_panel() {
        let s = surface();
        assert_eq!(s.hit_test(Vec2::new(170.0, 170.0)), HitTarget::Panel(1));
        assert_eq!(s.hit_test(Vec2::new(10.0, 10.0)), HitTarget::Panel(0));
        assert_eq!(s.hit_test(Vec2::new(245.0, 245.0)), HitTarget::ResizeHandle(1));
        assert_eq!(s.hit_test(Vec2::new(350.0, 20.0)), HitTarget::Empty);
    }

    #[test]
    fn test_handle_press_resizes_without_moving() {
        let mut s = surface();
        let origin = Vec2::new(40.0, 60.0);
        let press = origin + Vec2::new(245.0, 245.0);
        assert_eq!(
            s.pointer_down(press, origin).unwrap(),
            HitTarget::ResizeHandle(1)
        );
        assert!(matches!(s.gesture(), GestureMode::Resizing(_)));
        s.pointer_move(press + Vec2::new(30.0, 20.0), origin).unwrap();
        s.pointer_up();
        let rect = s.layout().positions()[1];
        assert_eq!(rect.top_left(), Vec2::new(150.0, 150.0));
        assert_eq!(rect.size(), Vec2::new(130.0, 120.0));
        assert!(!s.is_dragging());
    }

    #[test]
    fn test_body_press_moves_panel() {
        let mut s = surface();
        let origin = Vec2::new(40.0, 60.0);
        let press = origin + Vec2::new(50.0, 50.0);
        s.pointer_down(press, origin).unwrap();
        s.pointer_move(press + Vec2::new(10.0, 5.0), origin).unwrap();
        let finished = s.pointer_up().unwrap();
        assert_eq!(finished.rect.unwrap().top_left(), Vec2::new(10.0, 5.0));
    }

    #[test]
    fn test_click_toggles_and_empty_clears() {
        let mut s = surface();
        let origin = Vec2::ZERO;
        assert_eq!(s.click(Vec2::new(10.0, 10.0), origin), Some(0));
        assert_eq!(s.click(Vec2::new(170.0, 170.0), origin), Some(1));
        assert_eq!(s.click(Vec2::new(170.0, 170.0), origin), None);
        s.click(Vec2::new(10.0, 10.0), origin);
        assert_eq!(s.click(Vec2::new(390.0, 290.0), origin), None);
        assert_eq!(s.selected_index(), None);
    }

    #[test]
    fn test_panel_views_mark_selection() {
        let mut s = surface();
        s.click(Vec2::new(10.0, 10.0), Vec2::ZERO);
        let views = s.panel_views();
        assert_eq!(views[0].border, PanelBorder::SELECTED);
        assert_eq!(views[1].border, PanelBorder::NORMAL);
        assert_eq!(views[1].handle, PanelRect::new(238.0, 238.0, 12.0, 12.0));
    }

    #[test]
    fn test_reset_layout_cancels_gesture() {
        let mut s = surface();
        s.pointer_down(Vec2::new(20.0, 20.0), Vec2::ZERO).unwrap();
        s.pointer_move(Vec2::new(80.0, 90.0), Vec2::ZERO).unwrap();
        s.reset_layout();
        assert!(!s.is_dragging());
        assert_eq!(s.layout().positions(), s.layout().initial_positions());
        assert_eq!(s.pointer_move(Vec2::new(5.0, 5.0), Vec2::ZERO).unwrap(), None);
    }
}
