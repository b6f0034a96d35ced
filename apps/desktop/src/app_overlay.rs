use std::time::Duration;

use eframe::egui;
use egui::{pos2, vec2, Color32, Rect, Sense, Stroke, TextureHandle, TextureOptions};
use tracing::debug;

use desktop::canvas::{color_image, fit_within};
use segmentation::{OverlayController, PointLabel};

use crate::app::Action;

const INCLUDE_COLOR: Color32 = Color32::from_rgb(34, 197, 94);
const EXCLUDE_COLOR: Color32 = Color32::from_rgb(239, 68, 68);

/// The segmentation popup for one panel.
pub(crate) struct OverlayView {
    pub(crate) controller: OverlayController,
    image: TextureHandle,
    image_size: [u32; 2],
    mask: Option<TextureHandle>,
}

impl OverlayView {
    pub(crate) fn new(controller: OverlayController, image: TextureHandle, image_size: [u32; 2]) -> Self {
        Self {
            controller,
            image,
            image_size,
            mask: None,
        }
    }

    pub(crate) fn pump(&mut self, ctx: &egui::Context) {
        if self.controller.pump() > 0 {
            self.mask = self.controller.overlay().map(|raster| {
                ctx.load_texture("segment-mask", color_image(raster), TextureOptions::NEAREST)
            });
        }
        // Worker events only arrive through pump(); keep polling while busy.
        if !self.controller.is_encoded() || self.controller.is_decoding() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}

pub(crate) fn render_overlay(
    ctx: &egui::Context,
    view: &mut OverlayView,
    regenerating: bool,
    enabled: bool,
) -> Option<Action> {
    let mut open = true;
    let mut action = None;
    egui::Window::new(format!("Edit Panel {}", view.controller.panel_index() + 1))
        .id(egui::Id::new("segment-overlay"))
        .open(&mut open)
        .enabled(enabled)
        .collapsible(false)
        .resizable(true)
        .default_width(560.0)
        .show(ctx, |ui| {
            if let Some(progress) = view.controller.progress() {
                ui.add(
                    egui::ProgressBar::new(progress.progress / 100.0)
                        .text(progress.status.clone())
                        .animate(true),
                );
            }
            ui.label(view.controller.status());
            ui.add_space(4.0);
            render_image(ui, view);
            ui.add_space(6.0);

            ui.label("Edit instruction");
            ui.add(
                egui::TextEdit::multiline(view.controller.prompt_mut())
                    .hint_text("e.g. replace the hat with a red beret")
                    .desired_rows(2)
                    .desired_width(f32::INFINITY),
            );
            ui.horizontal(|ui| {
                let has_points = !view.controller.points().is_empty();
                if ui
                    .add_enabled(has_points, egui::Button::new("Clear Points"))
                    .clicked()
                {
                    view.controller.clear_points();
                    view.mask = None;
                }
                let label = if regenerating {
                    "Regenerating..."
                } else {
                    "Regenerate"
                };
                let allowed = view.controller.can_regenerate() && !regenerating;
                if ui.add_enabled(allowed, egui::Button::new(label)).clicked() {
                    action = Some(Action::Regenerate);
                }
                if ui.button("Close").clicked() {
                    action = Some(Action::CloseOverlay);
                }
            });
        });
    if !open {
        action = Some(Action::CloseOverlay);
    }
    action
}

fn render_image(ui: &mut egui::Ui, view: &mut OverlayView) {
    let max = vec2(ui.available_width().min(640.0), 480.0);
    let size = fit_within(view.image_size, max);
    // Point input stays off until the image is encoded.
    let sense = if view.controller.is_encoded() {
        Sense::click()
    } else {
        Sense::hover()
    };
    let (rect, response) = ui.allocate_exact_size(size, sense);

    let painter = ui.painter_at(rect);
    let uv = Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0));
    painter.image(view.image.id(), rect, uv, Color32::WHITE);
    if let Some(mask) = &view.mask {
        painter.image(mask.id(), rect, uv, Color32::WHITE);
    }
    for p in view.controller.points() {
        let center = rect.min + vec2(p.point[0] * rect.width(), p.point[1] * rect.height());
        let fill = match p.label {
            PointLabel::Include => INCLUDE_COLOR,
            PointLabel::Exclude => EXCLUDE_COLOR,
        };
        painter.circle(center, 5.0, fill, Stroke::new(1.5, Color32::WHITE));
    }

    let label = if response.clicked() {
        Some(PointLabel::Include)
    } else if response.secondary_clicked() {
        Some(PointLabel::Exclude)
    } else {
        None
    };
    if let (Some(label), Some(pos)) = (label, response.interact_pointer_pos()) {
        let origin = [rect.min.x, rect.min.y];
        let extent = [rect.width(), rect.height()];
        if let Err(e) = view.controller.click([pos.x, pos.y], origin, extent, label) {
            debug!("point ignored: {e}");
        }
    }
}
