//! Persistence layer.
//!
//! The agent document is saved and loaded whole. The file store writes to
//! `{path}.tmp` and renames over the target, so a crash mid-write leaves the
//! previous checkpoint intact.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::AgentState;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "memeseer_state.json";

/// Whole-document state persistence.
pub trait StateStore: Send + Sync {
    /// Atomically replace the stored document.
    fn save(&self, state: &AgentState) -> Result<()>;

    /// Load the stored document. `None` means a fresh start.
    fn load(&self) -> Result<Option<AgentState>>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

pub struct JsonFileStore {
    path: PathBuf,
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Delete the state file (for testing or reset).
    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete state file {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn save(&self, state: &AgentState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("Failed to serialise agent state")?;

        let tmp = self.tmp_path();
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write state to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state at {}", self.path.display()))?;

        debug!(path = %self.path.display(), cycle = state.cycle_count, "State saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<AgentState>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No saved state found, starting fresh");
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state from {}", self.path.display()))?;

        let state: AgentState = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse state from {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            cycle_count = state.cycle_count,
            open = state.portfolio.active_positions.len(),
            seer = format!("{:.4}", state.economy.balances.seer),
            mon = format!("{:.4}", state.economy.balances.mon),
            "State loaded from disk"
        );

        Ok(Some(state))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps the serialised document in memory. Counts saves so tests can
/// assert on checkpoints.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<Option<String>>,
    saves: Mutex<usize>,
    fail_saves: Mutex<bool>,
    /// Saves succeed until this many have been written.
    fail_after: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    /// Make every subsequent save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        if let Ok(mut f) = self.fail_saves.lock() {
            *f = fail;
        }
    }

    /// Let `n` more saves through, then fail.
    pub fn fail_after(&self, n: usize) {
        let limit = self.save_count() + n;
        if let Ok(mut f) = self.fail_after.lock() {
            *f = Some(limit);
        }
    }

    pub fn clear_failures(&self) {
        self.set_fail_saves(false);
        if let Ok(mut f) = self.fail_after.lock() {
            *f = None;
        }
    }

    fn should_fail(&self) -> bool {
        if self.fail_saves.lock().map(|f| *f).unwrap_or(false) {
            return true;
        }
        let limit = self.fail_after.lock().map(|f| *f).unwrap_or(None);
        limit.is_some_and(|limit| self.save_count() >= limit)
    }
}

impl StateStore for MemoryStore {
    fn save(&self, state: &AgentState) -> Result<()> {
        if self.should_fail() {
            anyhow::bail!("Memory store configured to fail");
        }
        let json = serde_json::to_string(state).context("Failed to serialise agent state")?;
        let mut doc = self
            .doc
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        *doc = Some(json);
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn load(&self) -> Result<Option<AgentState>> {
        let doc = self
            .doc
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        match doc.as_deref() {
            Some(json) => Ok(Some(
                serde_json::from_str(json).context("Failed to parse stored state")?,
            )),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
