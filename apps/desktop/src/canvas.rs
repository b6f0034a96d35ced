use egui::{Color32, ColorImage, Pos2, Rect, Vec2};
use image::RgbaImage;
use layout::PanelRect;

pub fn to_glam(p: Pos2) -> glam::Vec2 {
    glam::Vec2::new(p.x, p.y)
}

pub fn color32(rgba: [u8; 4]) -> Color32 {
    Color32::from_rgba_unmultiplied(rgba[0], rgba[1], rgba[2], rgba[3])
}

/// A panel rectangle placed at `origin` in screen space.
pub fn screen_rect(origin: Pos2, rect: &PanelRect) -> Rect {
    Rect::from_min_size(
        origin + Vec2::new(rect.x, rect.y),
        Vec2::new(rect.width, rect.height),
    )
}

/// Largest size with the image's aspect ratio that fits inside `max`,
/// never scaled above 1:1.
pub fn fit_within(image_size: [u32; 2], max: Vec2) -> Vec2 {
    let [w, h] = image_size;
    if w == 0 || h == 0 || max.x <= 0.0 || max.y <= 0.0 {
        return Vec2::ZERO;
    }
    let (w, h) = (w as f32, h as f32);
    let scale = (max.x / w).min(max.y / h).min(1.0);
    Vec2::new(w * scale, h * scale)
}

pub fn color_image(rgba: &RgbaImage) -> ColorImage {
    let (w, h) = rgba.dimensions();
    ColorImage::from_rgba_unmultiplied([w as usize, h as usize], rgba.as_raw())
}
