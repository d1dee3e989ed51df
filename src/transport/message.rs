//! Notification payloads.

use serde::Deserialize;
use thiserror::Error;

/// Request to run one analysis over one audio clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisMessage {
    pub audio_id: String,
    pub analysis_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Payload has an empty audio_id")]
    MissingAudioId,
}

#[derive(Deserialize)]
struct JsonPayload {
    audio_id: String,
    #[serde(default)]
    analysis_id: Option<String>,
}

/// Decode a raw payload.
///
/// Accepts either a bare audio id, bound to `default_analysis_id`, or a JSON
/// object `{"audio_id": ..., "analysis_id": ...}` where `analysis_id` is
/// optional.
pub fn decode_payload(payload: &[u8], default_analysis_id: &str) -> Result<AnalysisMessage, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (audio_id, analysis_id) = if text.starts_with('{') {
        let parsed: JsonPayload =
            serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        (
            parsed.audio_id,
            parsed
                .analysis_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| default_analysis_id.to_string()),
        )
    } else {
        (text.to_string(), default_analysis_id.to_string())
    };

    if audio_id.trim().is_empty() {
        return Err(DecodeError::MissingAudioId);
    }

    Ok(AnalysisMessage {
        audio_id,
        analysis_id,
    })
}
