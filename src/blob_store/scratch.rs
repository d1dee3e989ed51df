//! Lifecycle-scoped scratch paths.

use std::path::{Path, PathBuf};
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "mp3";

/// Root directory for downloaded blobs.
///
/// Layout: `<root>/<analysis_id>/<audio_id>-<lifecycle id>.<ext>`. The lifecycle
/// id keeps concurrent lifecycles for the same clip from sharing a file.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch file for one lifecycle of `audio_id` under `analysis_id`.
    pub fn path_for(&self, analysis_id: &str, audio_id: &str, uri: &str, lifecycle_id: Uuid) -> PathBuf {
        let file_name = format!(
            "{}-{}.{}",
            sanitize_component(audio_id),
            lifecycle_id,
            extension_of(uri)
        );
        self.root.join(sanitize_component(analysis_id)).join(file_name)
    }
}

/// Keep ids from escaping the scratch directory.
fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}

fn extension_of(uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    last_segment
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
