//! On-disk state: the credential pair, the local profile and standings exports.

use crate::api::{Credentials, TokenStore};
use crate::model::{CompetitorId, CompetitorRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "season-runner";

/// `<config_dir>/season-runner`, or the working directory when the platform has none.
pub fn app_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "wrote state file");
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Credential pair persisted as JSON so sessions survive restarts.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| app_dir().join("credentials.json")),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Credentials> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn persist(&self, creds: &Credentials) -> Result<()> {
        if creds.is_empty() {
            return remove(&self.path);
        }
        write_json(&self.path, creds)
    }

    fn clear(&self) -> Result<()> {
        remove(&self.path)
    }
}

/// Application state carried across invocations: who is logged in and whom they follow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub focal: Option<CompetitorId>,
}

impl Profile {
    pub fn default_path() -> PathBuf {
        app_dir().join("profile.json")
    }

    /// A missing file yields the empty profile.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn clear(path: &Path) -> Result<()> {
        remove(path)
    }
}

/// Seasons whose completion was already announced, keyed by service base URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonState {
    #[serde(default)]
    completed: BTreeSet<String>,
}

impl SeasonState {
    pub fn default_path() -> PathBuf {
        app_dir().join("season.json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn is_complete(&self, base_url: &str) -> bool {
        self.completed.contains(base_url)
    }

    /// Returns true when the stored flag changed.
    pub fn set_complete(&mut self, base_url: &str, complete: bool) -> bool {
        if complete {
            self.completed.insert(base_url.to_string())
        } else {
            self.completed.remove(base_url)
        }
    }
}

#[derive(Serialize)]
struct StandingsExport<'a> {
    exported_at: String,
    standings: &'a [CompetitorRecord],
}

/// Write ranked standings to `path` with a UTC timestamp.
pub fn export_json(path: &Path, standings: &[CompetitorRecord]) -> Result<()> {
    let exported_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("format export timestamp")?;
    write_json(
        path,
        &StandingsExport {
            exported_at,
            standings,
        },
    )
}
