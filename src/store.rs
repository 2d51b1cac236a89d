//! Where the API key and the transcript live between runs.

use crate::transcript::Turn;
use anyhow::Context;
use std::path::{Path, PathBuf};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

pub trait CredentialStore: Send {
    fn get(&self) -> anyhow::Result<Option<String>>;
    fn set(&mut self, secret: &str) -> anyhow::Result<()>;
}

pub trait HistoryStore: Send {
    fn load(&self) -> anyhow::Result<Vec<Turn>>;
    fn save(&mut self, turns: &[Turn]) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// API key in a plain file under the state dir, shadowed by `OPENAI_API_KEY`
/// when that is set.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    env_override: Option<String>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_override: None,
        }
    }

    pub fn with_env(path: impl Into<PathBuf>) -> Self {
        let env_override = std::env::var(API_KEY_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            path: path.into(),
            env_override,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> anyhow::Result<Option<String>> {
        if let Some(key) = &self.env_override {
            return Ok(Some(key.clone()));
        }
        let s = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read API key: {}", self.path.display()))
            }
        };
        let key = s.trim();
        Ok((!key.is_empty()).then(|| key.to_string()))
    }

    fn set(&mut self, secret: &str) -> anyhow::Result<()> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Ok(());
        }
        write_atomic(&self.path, secret.as_bytes())?;
        if self.env_override.is_some() {
            tracing::warn!("{API_KEY_ENV} is set and takes precedence over the saved key");
        }
        Ok(())
    }
}

/// Transcript as a JSON array of `{role, content, ts}`.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistoryStore for FileHistoryStore {
    /// Missing or corrupt history loads as empty.
    fn load(&self) -> anyhow::Result<Vec<Turn>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read history: {}", self.path.display()))
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(turns) => Ok(turns),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable history");
                Ok(Vec::new())
            }
        }
    }

    fn save(&mut self, turns: &[Turn]) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(turns).context("failed to serialize history")?;
        write_atomic(&self.path, &bytes)
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("failed to remove history: {}", self.path.display())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    secret: Option<String>,
}

impl MemoryCredentialStore {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> anyhow::Result<Option<String>> {
        Ok(self.secret.clone())
    }

    fn set(&mut self, secret: &str) -> anyhow::Result<()> {
        let secret = secret.trim();
        if !secret.is_empty() {
            self.secret = Some(secret.to_string());
        }
        Ok(())
    }
}

/// History that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    turns: Vec<Turn>,
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self) -> anyhow::Result<Vec<Turn>> {
        Ok(self.turns.clone())
    }

    fn save(&mut self, turns: &[Turn]) -> anyhow::Result<()> {
        self.turns = turns.to_vec();
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.turns.clear();
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state dir: {}", dir.display()))?;

    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes).with_context(|| format!("failed to write: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move into place: {}", path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}
