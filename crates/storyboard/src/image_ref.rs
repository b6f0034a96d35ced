use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

const MAX_FETCH_BYTES: u64 = 64 * 1024 * 1024;
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Error)]
pub enum ImageRefError {
    #[error("image reference is empty")]
    Empty,
    #[error("data url is not base64 encoded")]
    UnsupportedDataUrl,
    #[error("invalid base64 image data")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("{url} answered with status {code}")]
    Status { url: String, code: u16 },
    #[error("{url} is larger than {limit} bytes")]
    TooLarge { url: String, limit: u64 },
    #[error("failed to read image file")]
    Io(#[from] std::io::Error),
    #[error("image could not be decoded")]
    Image(#[from] image::ImageError),
}

/// Where a panel or composite image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    DataUrl { mime: String, data: String },
    /// Bare base64 as sent by the storyboard backend.
    Base64(String),
    Url(String),
    Path(PathBuf),
}

impl ImageRef {
    pub fn parse(raw: &str) -> Result<Self, ImageRefError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(ImageRefError::Empty);
        }
        if let Some(rest) = s.strip_prefix("data:") {
            let (header, data) = rest.split_once(',').ok_or(ImageRefError::UnsupportedDataUrl)?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or(ImageRefError::UnsupportedDataUrl)?;
            return Ok(ImageRef::DataUrl {
                mime: mime.to_string(),
                data: data.to_string(),
            });
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(ImageRef::Url(s.to_string()));
        }
        if let Some(path) = s.strip_prefix("file://") {
            return Ok(ImageRef::Path(PathBuf::from(path)));
        }
        if looks_like_base64(s) && !Path::new(s).exists() {
            return Ok(ImageRef::Base64(s.to_string()));
        }
        Ok(ImageRef::Path(PathBuf::from(s)))
    }

    pub fn from_png_bytes(bytes: &[u8]) -> Self {
        ImageRef::DataUrl {
            mime: "image/png".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Raw encoded bytes. Remote references are fetched on every call.
    pub fn bytes(&self) -> Result<Vec<u8>, ImageRefError> {
        match self {
            ImageRef::DataUrl { data, .. } | ImageRef::Base64(data) => decode_base64(data),
            ImageRef::Url(url) => fetch(url),
            ImageRef::Path(path) => Ok(std::fs::read(path)?),
        }
    }

    pub fn decode(&self) -> Result<DynamicImage, ImageRefError> {
        let bytes = self.bytes()?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::DataUrl { mime, data } => write!(f, "data:{mime} ({} chars)", data.len()),
            ImageRef::Base64(data) => write!(f, "base64 ({} chars)", data.len()),
            ImageRef::Url(url) => f.write_str(url),
            ImageRef::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(PNG_SIGNATURE)
}

fn looks_like_base64(s: &str) -> bool {
    s.len() >= 8
        && s.len() % 4 == 0
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

fn decode_base64(data: &str) -> Result<Vec<u8>, ImageRefError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

fn fetch(url: &str) -> Result<Vec<u8>, ImageRefError> {
    debug!(url, "fetching image");
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(60))
        .build();
    let resp = match agent.get(url).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(code, _)) => {
            return Err(ImageRefError::Status {
                url: url.to_string(),
                code,
            })
        }
        Err(err) => {
            return Err(ImageRefError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            })
        }
    };
    read_limited(resp.into_reader(), url, MAX_FETCH_BYTES)
}

/// Read a whole body, failing instead of truncating past `limit` bytes.
fn read_limited(reader: impl Read, url: &str, limit: u64) -> Result<Vec<u8>, ImageRefError> {
    let mut bytes = Vec::new();
    reader.take(limit + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(ImageRefError::TooLarge {
            url: url.to_string(),
            limit,
        });
    }
    Ok(bytes)
}
