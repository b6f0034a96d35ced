use anyhow::{anyhow, Context, Result};
use eframe::{egui, NativeOptions};
use storyboard::{EditorConfig, FileSessionStore, Intake, IntakeError, SessionBridge};
use tracing::info;
use tracing_subscriber::EnvFilter;

use desktop::session_pick::{resolve_session, SESSION_ENV};

mod app;
mod app_overlay;

use app::EditorApp;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let config = EditorConfig::load().context("load editor config")?;
    let root = FileSessionStore::sessions_root();
    let arg = std::env::args().nth(1);
    let session = resolve_session(arg.as_deref(), std::env::var(SESSION_ENV).ok(), &root)
        .context("pick storyboard session")?;

    // Read once at startup; nothing is re-read while the editor runs.
    let intake = match session {
        Some(id) => {
            info!(session = %id, "opening storyboard session");
            let store = FileSessionStore::open_in(&root, id)
                .with_context(|| format!("open session {id}"))?;
            SessionBridge::intake(&store)
        }
        None => Intake::Redirect(IntakeError::Missing),
    };

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1280.0, 860.0]),
        ..NativeOptions::default()
    };
    eframe::run_native(
        "Nemu Storyboard Editor",
        options,
        Box::new(move |cc| Ok(Box::new(EditorApp::new(cc.egui_ctx.clone(), config, intake)))),
    )
    .map_err(|e| anyhow!("editor window failed: {e}"))
}
