//! Storyboard data contract and the I/O around the editor: session intake,
//! image references, file export, regeneration requests and configuration.

use std::path::PathBuf;

mod config;
mod export;
mod image_ref;
mod payload;
mod regenerate;
mod session;

pub use config::{ConfigError, EditorConfig};
pub use export::{
    default_download_dir, panel_file_name, save_original, save_panel, ExportError,
    ORIGINAL_FILE_NAME,
};
pub use image_ref::{is_png, ImageRef, ImageRefError};
pub use payload::{IntakeError, Storyboard, StoryboardPayload, MAX_PANELS};
pub use regenerate::{
    HttpRegenerationClient, RegenerateError, RegenerationClient, RegenerationRequest,
    RegenerationResponse,
};
pub use session::{
    FileSessionStore, Intake, MemorySessionStore, SessionBridge, SessionStore, STORYBOARD_KEY,
};

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("nemu")
}
