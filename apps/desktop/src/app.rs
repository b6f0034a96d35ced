use std::io;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use eframe::egui;
use egui::{
    pos2, vec2, Align2, Color32, CursorIcon, FontId, PointerButton, Rect, Sense, Stroke,
    TextureHandle, TextureOptions,
};
use image::RgbaImage;
use tracing::{error, info, warn};

use desktop::canvas::{color32, color_image, screen_rect, to_glam};
use layout::{HitTarget, LayoutSurface};
use segmentation::{AffinityLoader, OverlayController, RegenerationDraft, SegmentWorker};
use storyboard::{
    save_original, save_panel, EditorConfig, HttpRegenerationClient, ImageRef, Intake,
    RegenerationClient, RegenerationRequest, RegenerationResponse, Storyboard,
};

use crate::app_overlay::{render_overlay, OverlayView};

pub(crate) enum PanelSlot {
    Loading,
    Loaded {
        bytes: Vec<u8>,
        size: [u32; 2],
        texture: TextureHandle,
    },
    Failed(String),
}

/// Results posted back to the UI thread by background work.
pub(crate) enum AppEvent {
    PanelLoaded {
        index: usize,
        bytes: Vec<u8>,
        rgba: RgbaImage,
    },
    PanelFailed {
        index: usize,
        message: String,
    },
    Regenerated {
        panel_index: usize,
        response: RegenerationResponse,
    },
    RegenerateFailed {
        panel_index: usize,
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    ResetLayout,
    SavePanel(usize),
    SaveOriginal,
    OpenOverlay(usize),
    CloseOverlay,
    Regenerate,
}

struct Editor {
    storyboard: Storyboard,
    surface: LayoutSurface,
    panels: Vec<PanelSlot>,
    overlay: Option<OverlayView>,
    regenerating: Option<usize>,
}

pub struct EditorApp {
    ctx: egui::Context,
    config: EditorConfig,
    editor: Option<Editor>,
    redirect: Option<String>,
    events_tx: Sender<AppEvent>,
    events_rx: Receiver<AppEvent>,
    alert: Option<String>,
    notice: Option<String>,
}

impl EditorApp {
    pub fn new(ctx: egui::Context, config: EditorConfig, intake: Intake) -> Self {
        let (events_tx, events_rx) = unbounded();
        let mut app = Self {
            ctx,
            config,
            editor: None,
            redirect: None,
            events_tx,
            events_rx,
            alert: None,
            notice: None,
        };
        match intake {
            Intake::Ready(storyboard) => {
                let surface = storyboard.layout_surface(app.config.display_scale);
                let panels = storyboard.panels.iter().map(|_| PanelSlot::Loading).collect();
                let refs = storyboard.panels.iter().cloned().enumerate().collect();
                app.spawn_panel_loader(refs);
                app.editor = Some(Editor {
                    storyboard,
                    surface,
                    panels,
                    overlay: None,
                    regenerating: None,
                });
            }
            Intake::Redirect(err) => {
                warn!("no storyboard to edit: {err}");
                app.redirect = Some(err.to_string());
            }
        }
        app
    }

    fn spawn_panel_loader(&mut self, refs: Vec<(usize, ImageRef)>) {
        let tx = self.events_tx.clone();
        let ctx = self.ctx.clone();
        let spawned = thread::Builder::new()
            .name("panel-loader".into())
            .spawn(move || {
                for (index, image) in refs {
                    let event = match load_panel(&image) {
                        Ok((bytes, rgba)) => AppEvent::PanelLoaded { index, bytes, rgba },
                        Err(message) => AppEvent::PanelFailed { index, message },
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                    ctx.request_repaint();
                }
            });
        if let Err(e) = spawned {
            error!("failed to start panel loader: {e}");
            self.alert = Some(format!("Could not load panel images: {e}"));
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        let Some(editor) = self.editor.as_mut() else {
            return;
        };
        match event {
            AppEvent::PanelLoaded { index, bytes, rgba } => {
                if let Some(slot) = editor.panels.get_mut(index) {
                    let texture = self.ctx.load_texture(
                        format!("panel-{index}"),
                        color_image(&rgba),
                        TextureOptions::LINEAR,
                    );
                    *slot = PanelSlot::Loaded {
                        bytes,
                        size: [rgba.width(), rgba.height()],
                        texture,
                    };
                }
            }
            AppEvent::PanelFailed { index, message } => {
                warn!(panel = index + 1, %message, "panel image failed to load");
                if let Some(slot) = editor.panels.get_mut(index) {
                    *slot = PanelSlot::Failed(message);
                }
            }
            AppEvent::Regenerated {
                panel_index,
                response,
            } => {
                editor.regenerating = None;
                info!(panel = panel_index + 1, "panel regenerated");
                let mut text = format!("Panel {} regenerated.", panel_index + 1);
                if let Some(message) = &response.message {
                    text.push_str(&format!("\n{message}"));
                }
                self.alert = Some(text);
                let replaced = match (
                    response.image(),
                    editor.panels.get_mut(panel_index),
                    editor.storyboard.panels.get_mut(panel_index),
                ) {
                    (Some(image), Some(slot), Some(current)) => {
                        *slot = PanelSlot::Loading;
                        *current = image.clone();
                        Some(image)
                    }
                    _ => None,
                };
                if let Some(image) = replaced {
                    self.spawn_panel_loader(vec![(panel_index, image)]);
                }
            }
            AppEvent::RegenerateFailed {
                panel_index,
                message,
            } => {
                editor.regenerating = None;
                warn!(panel = panel_index + 1, %message, "regeneration failed");
                self.alert = Some(format!(
                    "Regenerating panel {} failed:\n{message}",
                    panel_index + 1
                ));
            }
        }
    }

    fn apply(&mut self, action: Action) {
        let Some(editor) = self.editor.as_mut() else {
            return;
        };
        match action {
            Action::ResetLayout => editor.surface.reset_layout(),
            Action::SavePanel(index) => {
                let Some(image) = editor.storyboard.panels.get(index) else {
                    return;
                };
                match save_panel(&self.config.download_dir(), index, image) {
                    Ok(path) => self.notice = Some(format!("Saved {}", path.display())),
                    Err(e) => {
                        self.alert = Some(format!(
                            "Could not save panel {}: {}",
                            index + 1,
                            describe(e)
                        ))
                    }
                }
            }
            Action::SaveOriginal => {
                match save_original(&self.config.download_dir(), &editor.storyboard.original) {
                    Ok(path) => self.notice = Some(format!("Saved {}", path.display())),
                    Err(e) => {
                        self.alert = Some(format!("Could not save original: {}", describe(e)))
                    }
                }
            }
            Action::OpenOverlay(index) => {
                let Some(PanelSlot::Loaded {
                    bytes,
                    size,
                    texture,
                }) = editor.panels.get(index)
                else {
                    return;
                };
                let model = self.config.model_path.clone();
                let spawner = move || SegmentWorker::spawn(AffinityLoader::new(model.clone()));
                match OverlayController::open(index, bytes.clone(), &spawner) {
                    Ok(controller) => {
                        let controller = controller.with_mask_color(self.config.mask_color);
                        editor.overlay = Some(OverlayView::new(controller, texture.clone(), *size));
                    }
                    Err(e) => {
                        self.alert = Some(format!("Could not start segmentation: {e}"));
                    }
                }
            }
            Action::CloseOverlay => {
                if let Some(mut view) = editor.overlay.take() {
                    view.controller.close();
                }
            }
            Action::Regenerate => {
                if editor.regenerating.is_some() {
                    return;
                }
                let draft = match editor
                    .overlay
                    .as_ref()
                    .map(|view| view.controller.regeneration_draft())
                {
                    Some(Ok(Some(draft))) => draft,
                    Some(Err(e)) => {
                        self.alert = Some(format!("Could not prepare the mask: {e}"));
                        return;
                    }
                    _ => return,
                };
                let panel_index = draft.panel_index;
                match spawn_regeneration(
                    self.config.clone(),
                    draft,
                    self.events_tx.clone(),
                    self.ctx.clone(),
                ) {
                    Ok(()) => editor.regenerating = Some(panel_index),
                    Err(e) => {
                        self.alert = Some(format!("Could not start regeneration: {e}"));
                    }
                }
            }
        }
    }

    fn render_alert(&mut self, ctx: &egui::Context) {
        let Some(message) = self.alert.as_deref() else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new("Alert")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.alert = None;
        }
    }
}

impl eframe::App for EditorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        if let Some(reason) = &self.redirect {
            render_redirect(ctx, reason);
            return;
        }

        let blocked = self.alert.is_some();
        let mut actions = Vec::new();
        if let Some(editor) = self.editor.as_mut() {
            render_toolbar(ctx, editor, self.notice.as_deref(), blocked, &mut actions);
            render_details(ctx, &editor.storyboard);
            egui::CentralPanel::default().show(ctx, |ui| {
                if blocked {
                    ui.disable();
                }
                egui::ScrollArea::both().show(ui, |ui| render_canvas(ui, editor));
            });
            if let Some(view) = editor.overlay.as_mut() {
                view.pump(ctx);
                let regenerating = editor.regenerating.is_some();
                if let Some(action) = render_overlay(ctx, view, regenerating, !blocked) {
                    actions.push(action);
                }
            }
        }
        for action in actions {
            self.apply(action);
        }
        self.render_alert(ctx);
    }
}

fn render_toolbar(
    ctx: &egui::Context,
    editor: &Editor,
    notice: Option<&str>,
    blocked: bool,
    actions: &mut Vec<Action>,
) {
    egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
        if blocked {
            ui.disable();
        }
        ui.horizontal(|ui| {
            if ui.button("Reset Layout").clicked() {
                actions.push(Action::ResetLayout);
            }
            ui.separator();
            let selected = editor.surface.selected_index();
            if ui
                .add_enabled(selected.is_some(), egui::Button::new("Save Panel"))
                .clicked()
            {
                actions.extend(selected.map(Action::SavePanel));
            }
            if ui.button("Save Original").clicked() {
                actions.push(Action::SaveOriginal);
            }
            let editable = selected.is_some_and(|i| {
                matches!(editor.panels.get(i), Some(PanelSlot::Loaded { .. }))
            });
            if ui
                .add_enabled(
                    editable && editor.overlay.is_none(),
                    egui::Button::new("Edit with Mask"),
                )
                .clicked()
            {
                actions.extend(selected.map(Action::OpenOverlay));
            }
            ui.separator();
            match selected {
                Some(i) => ui.label(format!("Panel {} selected", i + 1)),
                None => ui.weak("Click a panel to select it"),
            };
            if let Some(notice) = notice {
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.weak(notice);
                });
            }
        });
    });
}

fn render_details(ctx: &egui::Context, storyboard: &Storyboard) {
    egui::TopBottomPanel::bottom("details").show(ctx, |ui| {
        ui.horizontal_wrapped(|ui| {
            let [w, h] = storyboard.payload.total_size;
            ui.weak(format!("{} panels, {w}x{h}", storyboard.panel_count()));
            if let Some(style) = &storyboard.payload.style {
                ui.separator();
                ui.weak(format!("Style: {style}"));
            }
            if let Some(prompt) = &storyboard.payload.original_prompt {
                ui.separator();
                ui.weak(prompt);
            }
        });
    });
}

fn render_canvas(ui: &mut egui::Ui, editor: &mut Editor) {
    let size = editor.surface.container_size();
    let (response, painter) = ui.allocate_painter(vec2(size.x, size.y), Sense::click_and_drag());
    let origin = response.rect.min;
    let container_origin = to_glam(origin);

    if response.drag_started_by(PointerButton::Primary) {
        if let Some(press) = ui.input(|i| i.pointer.press_origin()) {
            if let Err(e) = editor.surface.pointer_down(to_glam(press), container_origin) {
                warn!("pointer down ignored: {e}");
            }
        }
    }
    if response.dragged_by(PointerButton::Primary) {
        if let Some(pos) = response.interact_pointer_pos() {
            if let Err(e) = editor.surface.pointer_move(to_glam(pos), container_origin) {
                warn!("pointer move ignored: {e}");
            }
        }
    }
    if response.drag_stopped() {
        editor.surface.pointer_up();
    }
    if response.clicked() {
        if let Some(pos) = response.interact_pointer_pos() {
            editor.surface.click(to_glam(pos), container_origin);
        }
    }

    if let Some(hover) = response.hover_pos() {
        let icon = match editor.surface.hit_test(to_glam(hover) - container_origin) {
            HitTarget::ResizeHandle(_) => CursorIcon::ResizeNwSe,
            HitTarget::Panel(_) if editor.surface.is_dragging() => CursorIcon::Grabbing,
            HitTarget::Panel(_) => CursorIcon::Grab,
            HitTarget::Empty => CursorIcon::Default,
        };
        ui.ctx().set_cursor_icon(icon);
    }

    let uv = Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0));
    painter.rect_filled(response.rect, 0.0, Color32::from_gray(243));
    for view in editor.surface.panel_views() {
        let rect = screen_rect(origin, &view.rect);
        match editor.panels.get(view.index) {
            Some(PanelSlot::Loaded { texture, .. }) => {
                painter.image(texture.id(), rect, uv, Color32::WHITE);
            }
            Some(PanelSlot::Failed(message)) => {
                painter.rect_filled(rect, 0.0, Color32::from_gray(229));
                painter.text(
                    rect.center(),
                    Align2::CENTER_CENTER,
                    format!("Failed to load: {message}"),
                    FontId::proportional(12.0),
                    Color32::DARK_RED,
                );
            }
            _ => {
                painter.rect_filled(rect, 0.0, Color32::from_gray(229));
                painter.text(
                    rect.center(),
                    Align2::CENTER_CENTER,
                    "Loading...",
                    FontId::proportional(12.0),
                    Color32::GRAY,
                );
            }
        }
        let border = color32(view.border.rgba);
        painter.rect_stroke(rect, 0.0, Stroke::new(view.border.width, border));
        painter.rect_filled(screen_rect(origin, &view.handle), 0.0, border);
        painter.text(
            rect.min + vec2(6.0, 4.0),
            Align2::LEFT_TOP,
            (view.index + 1).to_string(),
            FontId::proportional(12.0),
            Color32::from_gray(60),
        );
    }
}

fn render_redirect(ctx: &egui::Context, reason: &str) {
    egui::CentralPanel::default().show(ctx, |ui| {
        ui.vertical_centered(|ui| {
            ui.add_space(80.0);
            ui.heading("No storyboard to edit");
            ui.label(reason);
            ui.add_space(12.0);
            ui.label("Create a storyboard first, then reopen the editor:");
            ui.code("nemu-cli stage storyboard.json");
        });
    });
}

fn load_panel(image: &ImageRef) -> Result<(Vec<u8>, RgbaImage), String> {
    let bytes = image.bytes().map_err(describe)?;
    let rgba = image::load_from_memory(&bytes)
        .map_err(describe)?
        .to_rgba8();
    Ok((bytes, rgba))
}

fn spawn_regeneration(
    config: EditorConfig,
    draft: RegenerationDraft,
    tx: Sender<AppEvent>,
    ctx: egui::Context,
) -> io::Result<()> {
    thread::Builder::new()
        .name("regenerate".into())
        .spawn(move || {
            let client = HttpRegenerationClient::from_config(&config);
            let request = RegenerationRequest::new(
                draft.panel_index,
                &draft.image,
                &draft.mask_png,
                &draft.prompt,
            );
            let event = match client.regenerate(&request) {
                Ok(response) => AppEvent::Regenerated {
                    panel_index: draft.panel_index,
                    response,
                },
                Err(e) => AppEvent::RegenerateFailed {
                    panel_index: draft.panel_index,
                    message: describe(e),
                },
            };
            if tx.send(event).is_err() {
                warn!("regeneration finished after the editor closed");
                return;
            }
            ctx.request_repaint();
        })
        .map(|_| ())
}

fn describe<E>(err: E) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{:#}", anyhow::Error::new(err))
}
