use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use tracing::warn;

use crate::error::PreferenceError;

/// Key under which the last-used nickname is stored.
pub const NICKNAME_KEY: &str = "chatNickname";

/// `preferences.json` is expected to be tiny; larger files are refused.
pub const MAX_PREFERENCES_BYTES: u64 = 64 * 1024;

/// Small persistent key-value store for user preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

pub type Preferences = BTreeMap<String, String>;

pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PEERCHAT_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("peerchat");
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".local").join("share").join("peerchat"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn preferences_path() -> PathBuf {
    data_dir().join("preferences.json")
}

pub fn load_preferences_from_path(path: &Path) -> Result<Preferences, PreferenceError> {
    let meta = fs::metadata(path).map_err(PreferenceError::Metadata)?;
    if meta.len() > MAX_PREFERENCES_BYTES {
        return Err(PreferenceError::TooLarge {
            size: meta.len(),
            max: MAX_PREFERENCES_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(PreferenceError::Read)?;
    serde_json::from_str(&data).map_err(PreferenceError::Parse)
}

pub fn save_preferences_to_path(path: &Path, prefs: &Preferences) -> Result<(), PreferenceError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(prefs).map_err(PreferenceError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(PreferenceError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(PreferenceError::Rename)?;
    Ok(())
}

pub fn save_preferences_with_retry(
    path: &Path,
    prefs: &Preferences,
) -> Result<(), PreferenceError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt = 1;
    loop {
        match save_preferences_to_path(path, prefs) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(err) => {
                warn!(attempt, "saving preferences failed: {err}");
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}

/// Preferences kept in a JSON file. Values are cached in memory; every
/// `set` rewrites the whole file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Preferences>,
}

impl JsonFileStore {
    /// Opens the store, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match load_preferences_from_path(&path) {
            Ok(values) => values,
            Err(PreferenceError::Metadata(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Preferences::new()
            }
            Err(err) => {
                warn!(path = %path.display(), "ignoring unreadable preferences: {err}");
                Preferences::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let snapshot = {
            let Ok(mut values) = self.values.lock() else {
                return Ok(());
            };
            values.insert(key.to_owned(), value.to_owned());
            values.clone()
        };
        save_preferences_with_retry(&self.path, &snapshot)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Preferences>,
}

impl MemoryStore {
    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::default();
        if let Ok(mut values) = store.values.lock() {
            values.insert(key.to_owned(), value.to_owned());
        }
        store
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_owned(), value.to_owned());
        }
        Ok(())
    }
}
