use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Terminal status recorded for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Converted,
    Skipped,
    Failed,
}

pub type StateMap = BTreeMap<String, ConversionStatus>;

/// Key under which a file's status is stored: absolute path, lower-cased.
///
/// Paths that differ only by case share a key.
pub fn state_key(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute.to_string_lossy().to_lowercase()
}

/// Persisted path -> status map shared by the scanner and all conversion workers.
///
/// Every mutation rewrites the whole file while the lock is held, so concurrent
/// workers never lose each other's updates and a crash loses at most the
/// mutation in flight.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    map: Mutex<StateMap>,
}

impl StateStore {
    /// Load state from disk; a missing or unreadable file starts empty
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StateMap>(&content) {
                Ok(map) => {
                    debug!("Loaded {} state entries from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                    StateMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateMap::new(),
            Err(e) => {
                warn!("Could not read state file {}: {}", path.display(), e);
                StateMap::new()
            }
        };

        Self { path, map: Mutex::new(map) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, file: &Path) -> Option<ConversionStatus> {
        self.lock().get(&state_key(file)).copied()
    }

    /// Record a status and persist immediately
    pub fn set(&self, file: &Path, status: ConversionStatus) {
        let mut map = self.lock();
        map.insert(state_key(file), status);
        if let Err(e) = write_state(&self.path, &map) {
            warn!("Could not save state: {:#}", e);
        }
    }

    /// Best-effort flush of the current map
    pub fn save(&self) {
        let map = self.lock();
        if let Err(e) = write_state(&self.path, &map) {
            warn!("Could not save state: {:#}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> StateMap {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StateMap> {
        // A worker that panicked mid-update left a valid map behind; keep going with it
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Write the map next to its final location, then rename over it
fn write_state(path: &Path, map: &StateMap) -> Result<()> {
    let json = serde_json::to_string_pretty(map).context("Failed to serialize state")?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write state file: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace state file: {}", path.display()))?;
    Ok(())
}
