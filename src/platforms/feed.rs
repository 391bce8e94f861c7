//! Cognition signals read from a JSON file.
//!
//! The idea-generation service writes its latest verdict to a file; we
//! re-read it every cycle. A missing file means neutral signals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{CognitionInput, SignalSource};

pub struct FileSignalSource {
    path: PathBuf,
}

impl FileSignalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SignalSource for FileSignalSource {
    async fn observe(&self) -> Result<CognitionInput> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No signal file, using neutral signals");
            return Ok(CognitionInput::default());
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read signal file: {}", self.path.display()))?;

        let input: CognitionInput = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse signal file: {}", self.path.display()))?;

        Ok(input)
    }
}
