//! Single durable slot holding the last execution token.

use crate::error::{Result, TunerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait TokenStore {
    /// Last stored token. An empty slot and an empty string both read as `None`.
    fn get(&self) -> Result<Option<String>>;

    fn set(&mut self, token: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    token: Option<String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<String>> {
        Ok(self.token.clone().filter(|t| !t.is_empty()))
    }

    fn set(&mut self, token: &str) -> Result<()> {
        self.token = Some(token.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.token = None;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenRecord {
    token: String,
    updated_at: DateTime<Utc>,
}

/// JSON file backed store, rewritten atomically on every `set`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<String>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(&self.path, e)),
        };
        let record: TokenRecord =
            serde_json::from_slice(&data).map_err(|e| storage_error(&self.path, e))?;
        Ok(Some(record.token).filter(|t| !t.is_empty()))
    }

    fn set(&mut self, token: &str) -> Result<()> {
        let record = TokenRecord {
            token: token.to_string(),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| storage_error(&self.path, e))?;
        atomic_write_bytes(&self.path, &bytes).map_err(|e| storage_error(&self.path, e))
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(&self.path, e)),
        }
    }
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> TunerError {
    TunerError::Storage(format!("{}: {}", path.display(), err))
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
