use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::{EditorConfig, ImageRef};

#[derive(Debug, Error)]
pub enum RegenerateError {
    #[error("failed to reach regeneration service: {0}")]
    Transport(String),
    #[error("regeneration service returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("regeneration rejected: {0}")]
    Rejected(String),
    #[error("regeneration response is not valid json")]
    Decode(#[from] serde_json::Error),
}

/// Outbound request: image and mask travel as base64 PNG/JPEG bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationRequest {
    pub panel_index: usize,
    pub image: String,
    pub mask: String,
    pub prompt: String,
}

impl RegenerationRequest {
    pub fn new(panel_index: usize, image: &[u8], mask_png: &[u8], prompt: &str) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        Self {
            panel_index,
            image: b64.encode(image),
            mask: b64.encode(mask_png),
            prompt: prompt.to_string(),
        }
    }
}

/// Only `success` is fixed; anything else the service sends is kept in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegenerationResponse {
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }

    /// The new panel image, if the service sent one under a known key.
    pub fn image(&self) -> Option<ImageRef> {
        ["image", "new_image", "panel", "image_url"]
            .iter()
            .filter_map(|key| self.extra.get(*key)?.as_str())
            .find_map(|s| ImageRef::parse(s).ok())
    }
}

pub trait RegenerationClient: Send + Sync {
    fn regenerate(
        &self,
        request: &RegenerationRequest,
    ) -> Result<RegenerationResponse, RegenerateError>;
}

pub struct HttpRegenerationClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpRegenerationClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(60))
            .build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(config.regenerate_url())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RegenerationClient for HttpRegenerationClient {
    fn regenerate(
        &self,
        request: &RegenerationRequest,
    ) -> Result<RegenerationResponse, RegenerateError> {
        let payload = serde_json::to_string(request)?;
        info!(
            endpoint = %self.endpoint,
            panel_index = request.panel_index,
            "sending regeneration request"
        );
        let body = match self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_string(&payload)
        {
            Ok(resp) => resp
                .into_string()
                .map_err(|e| RegenerateError::Transport(e.to_string()))?,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(RegenerateError::Status { code, body });
            }
            Err(err) => return Err(RegenerateError::Transport(err.to_string())),
        };
        parse_response(&body)
    }
}

pub(crate) fn parse_response(body: &str) -> Result<RegenerationResponse, RegenerateError> {
    let response: RegenerationResponse = serde_json::from_str(body)?;
    if !response.success {
        let reason = response.failure_reason();
        warn!(%reason, "regeneration rejected");
        return Err(RegenerateError::Rejected(reason));
    }
    Ok(response)
}
