use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use thiserror::Error;
use tracing::info;

use crate::{app_data_dir, is_png, ImageRef, ImageRefError};

pub const ORIGINAL_FILE_NAME: &str = "original_image.png";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not load image")]
    Source(#[from] ImageRefError),
    #[error("could not re-encode image as png")]
    Encode(#[from] image::ImageError),
    #[error("could not write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 1-based, so the first panel saves as `panel-1.png`.
pub fn panel_file_name(index: usize) -> String {
    format!("panel-{}.png", index + 1)
}

pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| app_data_dir().join("downloads"))
}

pub fn save_panel(dir: &Path, index: usize, image: &ImageRef) -> Result<PathBuf, ExportError> {
    write_png(&dir.join(panel_file_name(index)), image)
}

pub fn save_original(dir: &Path, image: &ImageRef) -> Result<PathBuf, ExportError> {
    write_png(&dir.join(ORIGINAL_FILE_NAME), image)
}

fn write_png(path: &Path, image: &ImageRef) -> Result<PathBuf, ExportError> {
    let mut bytes = image.bytes()?;
    if !is_png(&bytes) {
        let decoded = image::load_from_memory(&bytes)?;
        let mut buf = Cursor::new(Vec::new());
        decoded.write_to(&mut buf, ImageFormat::Png)?;
        bytes = buf.into_inner();
    }
    let write_err = |source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, &bytes).map_err(write_err)?;
    info!(path = %path.display(), bytes = bytes.len(), "image saved");
    Ok(path.to_path_buf())
}
