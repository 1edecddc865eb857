//! Bearer token persisted between CLI invocations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  pub saved_at: DateTime<Utc>,
}

/// Session file on disk.
pub struct SessionStore {
  path: PathBuf,
}

impl SessionStore {
  /// Store at the default location.
  pub fn open() -> Result<Self> {
    Ok(Self::at(Self::default_path()?))
  }

  pub fn at(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Get the default session path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("carepulse").join("session.json"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load the saved session, if any.
  pub fn load(&self) -> Result<Option<Session>> {
    if !self.path.exists() {
      return Ok(None);
    }

    let contents = std::fs::read_to_string(&self.path)
      .map_err(|e| eyre!("Failed to read session file {}: {}", self.path.display(), e))?;
    let session = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse session file {}: {}", self.path.display(), e))?;

    Ok(Some(session))
  }

  pub fn save(&self, token: &str) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let session = Session {
      token: token.to_string(),
      saved_at: Utc::now(),
    };
    let contents = serde_json::to_string_pretty(&session)
      .map_err(|e| eyre!("Failed to serialize session: {}", e))?;
    std::fs::write(&self.path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))?;

    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!(
        "Failed to remove session file {}: {}",
        self.path.display(),
        e
      )),
    }
  }
}
